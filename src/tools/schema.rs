//! 工具参数 schema：注入规划器 prompt，也用于失败分析时比对参数
//!
//! 复合参数（世界书条目等）的 JSON Schema 由 schemars 自动生成，减少 LLM 输出格式错误。

use schemars::schema_for;
use serde::{Deserialize, Serialize};

use crate::core::WorldbookEntry;

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// 复合类型在规划器输出里需要用 CDATA 包裹
    pub fn is_composite(&self) -> bool {
        matches!(self, ParamType::Array | ParamType::Object)
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParameterSpec {
    pub fn required(name: &str, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            description: description.into(),
        }
    }
}

/// 机器可读的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSchema {
    /// 渲染为 prompt 中的一段工具说明
    pub fn to_prompt_block(&self) -> String {
        let mut s = format!("### {}\n{}\n", self.name, self.description);
        if self.parameters.is_empty() {
            s.push_str("Parameters: none\n");
            return s;
        }
        s.push_str("Parameters:\n");
        for p in &self.parameters {
            let wrap = if p.param_type.is_composite() {
                " (wrap in <![CDATA[ ]]>)"
            } else {
                ""
            };
            s.push_str(&format!(
                "- {} ({:?}, {}){}: {}\n",
                p.name,
                p.param_type,
                if p.required { "required" } else { "optional" },
                wrap,
                p.description
            ));
        }
        s
    }
}

/// 世界书条目的 JSON Schema 字符串，拼进条目类参数的说明
pub fn worldbook_entry_schema_json() -> String {
    let schema = schema_for!(WorldbookEntry);
    serde_json::to_string(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_block_marks_composite_params() {
        let schema = ToolSchema {
            name: "SUPPLEMENT".into(),
            description: "Write supplement entries".into(),
            parameters: vec![
                ParameterSpec::required("entries", ParamType::Array, "entries"),
                ParameterSpec::optional("note", ParamType::String, "free text"),
            ],
        };
        let block = schema.to_prompt_block();
        assert!(block.contains("entries (Array, required) (wrap in <![CDATA[ ]]>)"));
        assert!(block.contains("note (String, optional): free text"));
    }

    #[test]
    fn test_entry_schema_mentions_keys() {
        let json = worldbook_entry_schema_json();
        assert!(json.contains("keys"));
        assert!(json.contains("content"));
    }
}
