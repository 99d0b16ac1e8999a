//! CHARACTER 工具：写入角色卡字段
//!
//! 规划器在参数里直接给出字段内容；只返回出现的字段，执行循环按字段增量合并。

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::{CharacterPatch, CHARACTER_FIELDS};
use crate::tools::schema::{ParamType, ParameterSpec};
use crate::tools::{ExecutionResult, Tool, ToolContext};

pub struct CharacterTool;

fn field_description(field: &str) -> &'static str {
    match field {
        "name" => "Character name",
        "description" => "Appearance, background and identity",
        "personality" => "Personality traits and speech habits",
        "scenario" => "The situation where the roleplay starts",
        "first_mes" => "Opening message in the character's voice",
        "mes_example" => "Example dialogue using <START> blocks",
        "creator_notes" => "Notes for people using the card",
        "tags" => "Keyword tags",
        "alternate_greetings" => "Alternative opening messages",
        _ => "",
    }
}

#[async_trait]
impl Tool for CharacterTool {
    fn name(&self) -> &str {
        "CHARACTER"
    }

    fn description(&self) -> &str {
        "Write or revise character card fields. Only the fields you pass are updated; fields you omit keep their current value. Build the character before the worldbook."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        CHARACTER_FIELDS
            .iter()
            .map(|f| {
                let ty = if matches!(*f, "tags" | "alternate_greetings") {
                    ParamType::Array
                } else {
                    ParamType::String
                };
                ParameterSpec::optional(f, ty, field_description(f))
            })
            .collect()
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let value = Value::Object(params.clone());
        let patch = CharacterPatch::from_value(&value);
        if patch.is_empty() {
            return ExecutionResult::failure(format!(
                "No character fields provided; expected any of: {}",
                CHARACTER_FIELDS.join(", ")
            ));
        }
        let data: Map<String, Value> = CHARACTER_FIELDS
            .iter()
            .filter_map(|f| params.get(*f).map(|v| (f.to_string(), v.clone())))
            .collect();
        ExecutionResult::ok(json!({ "character_data": data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_known_fields_are_returned() {
        let mut params = Map::new();
        params.insert("name".into(), json!("Iris"));
        params.insert("mood".into(), json!("tired"));
        let r = CharacterTool.execute(&ToolContext::default(), &params).await;
        assert!(r.success);
        let data = &r.payload.unwrap()["character_data"];
        assert_eq!(data["name"], "Iris");
        assert!(data.get("mood").is_none());
    }

    #[tokio::test]
    async fn test_empty_patch_fails() {
        let r = CharacterTool.execute(&ToolContext::default(), &Map::new()).await;
        assert!(!r.success);
    }
}
