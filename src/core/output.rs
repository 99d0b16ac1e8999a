//! 生成产物：角色卡字段 + 世界书（状态 / 用户设定 / 世界观 三个单例分类 + 补充条目列表）
//!
//! 角色字段按工具返回增量合并；世界书分类每次工具成功都整体覆盖。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 角色卡必填字段（完成判定按此顺序检查）
pub const CHARACTER_FIELDS: [&str; 9] = [
    "name",
    "description",
    "personality",
    "scenario",
    "first_mes",
    "mes_example",
    "creator_notes",
    "tags",
    "alternate_greetings",
];

/// 角色卡数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub first_mes: String,
    #[serde(default)]
    pub mes_example: String,
    #[serde(default)]
    pub creator_notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub alternate_greetings: Vec<String>,
}

impl CharacterData {
    /// 判断单个字段是否已填写（文本去空白后非空；列表至少含一个非空项）
    pub fn is_field_filled(&self, field: &str) -> bool {
        match field {
            "name" => !self.name.trim().is_empty(),
            "description" => !self.description.trim().is_empty(),
            "personality" => !self.personality.trim().is_empty(),
            "scenario" => !self.scenario.trim().is_empty(),
            "first_mes" => !self.first_mes.trim().is_empty(),
            "mes_example" => !self.mes_example.trim().is_empty(),
            "creator_notes" => !self.creator_notes.trim().is_empty(),
            "tags" => self.tags.iter().any(|t| !t.trim().is_empty()),
            "alternate_greetings" => self.alternate_greetings.iter().any(|g| !g.trim().is_empty()),
            _ => false,
        }
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        CHARACTER_FIELDS
            .iter()
            .copied()
            .filter(|f| !self.is_field_filled(f))
            .collect()
    }

    /// 合并补丁：只覆盖补丁中出现的字段，返回被更新的字段名
    pub fn merge(&mut self, patch: CharacterPatch) -> Vec<&'static str> {
        let mut updated = Vec::new();
        macro_rules! merge_field {
            ($field:ident) => {
                if let Some(v) = patch.$field {
                    self.$field = v;
                    updated.push(stringify!($field));
                }
            };
        }
        merge_field!(name);
        merge_field!(description);
        merge_field!(personality);
        merge_field!(scenario);
        merge_field!(first_mes);
        merge_field!(mes_example);
        merge_field!(creator_notes);
        merge_field!(tags);
        merge_field!(alternate_greetings);
        updated
    }
}

/// 标量参数转文本：解析器会把纯数字 / 布尔文本转成 JSON 标量，这里还原为字符串。
/// 去除首尾空白，空串视为缺失
pub fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// 列表参数：数组、逗号 / 换行分隔的字符串，或单个数字 / 布尔值
pub fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split([',', '，', '\n'])
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Value::Number(_) | Value::Bool(_) => value_text(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// 角色字段补丁：None 表示工具未返回该字段，合并时保持原值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub personality: Option<String>,
    pub scenario: Option<String>,
    pub first_mes: Option<String>,
    pub mes_example: Option<String>,
    pub creator_notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub alternate_greetings: Option<Vec<String>>,
}

impl CharacterPatch {
    /// 从工具载荷（JSON 对象）宽松解析：列表字段接受数组或逗号 / 换行分隔的字符串，
    /// 空值视为未返回
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(value_text);
        let list = |key: &str| {
            let items = value.get(key).map(value_list).unwrap_or_default();
            (!items.is_empty()).then_some(items)
        };
        Self {
            name: text("name"),
            description: text("description"),
            personality: text("personality"),
            scenario: text("scenario"),
            first_mes: text("first_mes"),
            mes_example: text("mes_example"),
            creator_notes: text("creator_notes"),
            tags: list("tags"),
            alternate_greetings: list("alternate_greetings"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == CharacterPatch::default()
    }
}

fn new_entry_id() -> String {
    format!("wb_{}", uuid::Uuid::new_v4())
}

fn default_order() -> i32 {
    100
}

/// 世界书条目：由触发词（keys）在下游上下文中激活
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorldbookEntry {
    /// 条目 ID（缺省时自动生成）
    #[serde(default = "new_entry_id")]
    pub id: String,
    /// 触发词，至少一个
    #[serde(default, alias = "key")]
    pub keys: Vec<String>,
    /// 条目标题 / 备注
    #[serde(default)]
    pub comment: String,
    /// 条目正文
    #[serde(default)]
    pub content: String,
    /// 是否常驻注入（不依赖触发词）
    #[serde(default)]
    pub constant: bool,
    /// 插入顺序，数字越小越靠前
    #[serde(default = "default_order")]
    pub order: i32,
}

impl WorldbookEntry {
    pub fn new(keys: Vec<String>, comment: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_entry_id(),
            keys,
            comment: comment.into(),
            content: content.into(),
            constant: false,
            order: default_order(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn has_keys(&self) -> bool {
        self.keys.iter().any(|k| !k.trim().is_empty())
    }
}

/// 世界书分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldbookCategory {
    Status,
    UserSetting,
    WorldView,
    Supplement,
}

impl WorldbookCategory {
    pub fn label(&self) -> &'static str {
        match self {
            WorldbookCategory::Status => "status",
            WorldbookCategory::UserSetting => "user_setting",
            WorldbookCategory::WorldView => "world_view",
            WorldbookCategory::Supplement => "supplement",
        }
    }
}

/// 产物分类（完成判定的缺项报告用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCategory {
    Character,
    Worldbook(WorldbookCategory),
}

impl std::fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputCategory::Character => write!(f, "character"),
            OutputCategory::Worldbook(c) => write!(f, "{}", c.label()),
        }
    }
}

/// 会话的生成产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default)]
    pub character_data: CharacterData,
    #[serde(default)]
    pub status_data: Option<WorldbookEntry>,
    #[serde(default)]
    pub user_setting_data: Option<WorldbookEntry>,
    #[serde(default)]
    pub world_view_data: Option<WorldbookEntry>,
    #[serde(default)]
    pub supplement_data: Vec<WorldbookEntry>,
}

impl GenerationOutput {
    pub fn singleton(&self, category: WorldbookCategory) -> Option<&WorldbookEntry> {
        match category {
            WorldbookCategory::Status => self.status_data.as_ref(),
            WorldbookCategory::UserSetting => self.user_setting_data.as_ref(),
            WorldbookCategory::WorldView => self.world_view_data.as_ref(),
            WorldbookCategory::Supplement => None,
        }
    }

    /// 整体覆盖某个世界书分类。单例分类取第一条，多余条目的正文并入其中。
    pub fn overwrite_worldbook(&mut self, category: WorldbookCategory, entries: Vec<WorldbookEntry>) {
        if category == WorldbookCategory::Supplement {
            self.supplement_data = entries;
            return;
        }
        let mut iter = entries.into_iter();
        let merged = iter.next().map(|mut first| {
            for extra in iter {
                if extra.has_content() {
                    first.content.push_str("\n\n");
                    first.content.push_str(&extra.content);
                }
                for key in extra.keys {
                    if !first.keys.contains(&key) {
                        first.keys.push(key);
                    }
                }
            }
            first
        });
        match category {
            WorldbookCategory::Status => self.status_data = merged,
            WorldbookCategory::UserSetting => self.user_setting_data = merged,
            WorldbookCategory::WorldView => self.world_view_data = merged,
            WorldbookCategory::Supplement => {}
        }
    }

    pub fn filled_supplement_count(&self) -> usize {
        self.supplement_data.iter().filter(|e| e.has_content()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let mut data = CharacterData {
            name: "Iris".into(),
            personality: "cold".into(),
            ..Default::default()
        };
        let patch = CharacterPatch::from_value(&json!({
            "description": "A detective in Neo-Shanghai",
            "tags": "sci-fi, detective",
        }));
        let updated = data.merge(patch);
        assert_eq!(updated, vec!["description", "tags"]);
        assert_eq!(data.name, "Iris");
        assert_eq!(data.personality, "cold");
        assert_eq!(data.tags, vec!["sci-fi", "detective"]);
    }

    #[test]
    fn test_patch_ignores_blank_values() {
        let patch = CharacterPatch::from_value(&json!({"name": "  ", "tags": []}));
        assert!(patch.is_empty());
    }

    #[test]
    fn test_missing_fields_in_declared_order() {
        let data = CharacterData {
            name: "Iris".into(),
            tags: vec!["noir".into()],
            ..Default::default()
        };
        let missing = data.missing_fields();
        assert_eq!(missing.first(), Some(&"description"));
        assert!(!missing.contains(&"tags"));
        assert_eq!(missing.len(), 7);
    }

    #[test]
    fn test_singleton_overwrite_merges_extra_entries() {
        let mut out = GenerationOutput::default();
        out.overwrite_worldbook(
            WorldbookCategory::Status,
            vec![
                WorldbookEntry::new(vec!["hp".into()], "状态", "HP 100"),
                WorldbookEntry::new(vec!["mood".into()], "", "mood calm"),
            ],
        );
        let status = out.status_data.as_ref().unwrap();
        assert!(status.content.contains("HP 100"));
        assert!(status.content.contains("mood calm"));
        assert_eq!(status.keys, vec!["hp", "mood"]);

        out.overwrite_worldbook(WorldbookCategory::Status, Vec::new());
        assert!(out.status_data.is_none());
    }

    #[test]
    fn test_entry_accepts_key_alias() {
        let entry: WorldbookEntry =
            serde_json::from_value(json!({"key": ["港口"], "content": "雾港"})).unwrap();
        assert_eq!(entry.keys, vec!["港口"]);
        assert!(entry.id.starts_with("wb_"));
        assert_eq!(entry.order, 100);
    }
}
