//! 世界书工具：STATUS / USER_SETTING / WORLD_VIEW / SUPPLEMENT
//!
//! 每次成功调用都整体覆盖对应分类。三个单例分类接受单段正文（或条目数组），
//! SUPPLEMENT 必须给出条目数组，且每条至少一个触发词。

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::{WorldbookCategory, WorldbookEntry};
use crate::tools::schema::{worldbook_entry_schema_json, ParamType, ParameterSpec};
use crate::tools::{param_str, param_str_list, ExecutionResult, Tool, ToolContext};

pub struct WorldbookTool {
    category: WorldbookCategory,
    name: &'static str,
    description: &'static str,
}

impl WorldbookTool {
    pub fn new(category: WorldbookCategory) -> Self {
        let (name, description) = match category {
            WorldbookCategory::Status => (
                "STATUS",
                "Write the status worldbook entry: the character's live state block (time, location, mood, relationship values) refreshed every reply.",
            ),
            WorldbookCategory::UserSetting => (
                "USER_SETTING",
                "Write the user-setting worldbook entry: who the user plays, their identity and relationship to the character.",
            ),
            WorldbookCategory::WorldView => (
                "WORLD_VIEW",
                "Write the world-view worldbook entry: setting, rules, factions, technology or magic, tone.",
            ),
            WorldbookCategory::Supplement => (
                "SUPPLEMENT",
                "Write supplementary worldbook entries (places, people, items, events). Each entry needs trigger keys and content. Replaces all previous supplement entries, so always send the full list (at least 5).",
            ),
        };
        Self {
            category,
            name,
            description,
        }
    }

    fn parse_entries(&self, params: &Map<String, Value>) -> Result<Vec<WorldbookEntry>, String> {
        if let Some(raw) = params.get("entries") {
            let items = match raw {
                Value::Array(items) => items.clone(),
                Value::Object(_) => vec![raw.clone()],
                Value::String(s) => {
                    return Err(format!(
                        "entries must be a JSON array wrapped in CDATA, got text: {}",
                        crate::memory::truncate_chars(s, 80)
                    ))
                }
                _ => return Err("entries must be a JSON array".to_string()),
            };
            let mut entries = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let entry: WorldbookEntry = serde_json::from_value(item)
                    .map_err(|e| format!("entries[{}] is not a valid entry: {}", i, e))?;
                entries.push(entry);
            }
            return Ok(entries);
        }
        let content = param_str(params, "content").unwrap_or_default();
        if content.is_empty() {
            return Ok(Vec::new());
        }
        let comment = param_str(params, "comment").unwrap_or_else(|| self.category.label().to_string());
        Ok(vec![WorldbookEntry::new(
            param_str_list(params, "keys"),
            comment,
            content,
        )])
    }
}

#[async_trait]
impl Tool for WorldbookTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        let entries_desc = format!("Entry objects matching schema {}", worldbook_entry_schema_json());
        if self.category == WorldbookCategory::Supplement {
            return vec![ParameterSpec::required("entries", ParamType::Array, entries_desc)];
        }
        vec![
            ParameterSpec::optional("content", ParamType::String, "Entry body"),
            ParameterSpec::optional("keys", ParamType::Array, "Trigger keywords"),
            ParameterSpec::optional("comment", ParamType::String, "Entry title"),
            ParameterSpec::optional("entries", ParamType::Array, entries_desc),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let mut entries = match self.parse_entries(params) {
            Ok(e) => e,
            Err(e) => return ExecutionResult::failure(e),
        };
        entries.retain(|e| e.has_content());
        if entries.is_empty() {
            return ExecutionResult::failure(format!("{}: no entry with non-empty content", self.name));
        }
        if self.category == WorldbookCategory::Supplement {
            if let Some(pos) = entries.iter().position(|e| !e.has_keys()) {
                return ExecutionResult::failure(format!(
                    "SUPPLEMENT entries[{}] has no trigger keys",
                    pos
                ));
            }
        } else {
            for entry in entries.iter_mut().filter(|e| !e.has_keys()) {
                entry.keys = vec![self.category.label().to_string()];
                entry.constant = true;
            }
        }
        ExecutionResult::ok(json!({ "entries": entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_singleton_from_content_becomes_constant() {
        let tool = WorldbookTool::new(WorldbookCategory::WorldView);
        let mut params = Map::new();
        params.insert("content".into(), json!("永夜笼罩的雾港"));
        let r = tool.execute(&ToolContext::default(), &params).await;
        assert!(r.success);
        let entry = &r.payload.unwrap()["entries"][0];
        assert_eq!(entry["keys"][0], "world_view");
        assert_eq!(entry["constant"], true);
    }

    #[tokio::test]
    async fn test_numeric_keys_and_comment_survive_parsing() {
        let decision = crate::react::parse_decision(
            "<action>WORLD_VIEW</action><parameters><content>2049 年的雾港</content>\
             <keys>2049</keys><comment>1984</comment></parameters>",
        )
        .unwrap();
        assert_eq!(decision.parameters["keys"], json!(2049));
        let tool = WorldbookTool::new(WorldbookCategory::WorldView);
        let r = tool.execute(&ToolContext::default(), &decision.parameters).await;
        assert!(r.success);
        let entry = &r.payload.unwrap()["entries"][0];
        assert_eq!(entry["keys"], json!(["2049"]));
        assert_eq!(entry["comment"], "1984");
        assert_eq!(entry["constant"], false);
    }

    #[tokio::test]
    async fn test_supplement_requires_keys() {
        let tool = WorldbookTool::new(WorldbookCategory::Supplement);
        let mut params = Map::new();
        params.insert(
            "entries".into(),
            json!([{"keys": ["码头"], "content": "七号码头"}, {"content": "没有触发词"}]),
        );
        let r = tool.execute(&ToolContext::default(), &params).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("entries[1]"));
    }

    #[tokio::test]
    async fn test_supplement_rejects_unwrapped_text() {
        let tool = WorldbookTool::new(WorldbookCategory::Supplement);
        let mut params = Map::new();
        params.insert("entries".into(), json!("[{\"keys\": [\"码头\""));
        let r = tool.execute(&ToolContext::default(), &params).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("CDATA"));
    }
}
