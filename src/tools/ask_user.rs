//! ASK_USER 工具：向用户澄清创作方向
//!
//! 工具本身只整理问题与选项；等待 / 暂停由执行循环根据是否注册了交互输入决定。

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamType, ParameterSpec};
use crate::tools::{param_str, param_str_list, ExecutionResult, Tool, ToolContext};

pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ASK_USER"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question about the creative direction (genre, tone, relationship to the user, references). Offer options when the choice space is small."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("question", ParamType::String, "The question shown to the user"),
            ParameterSpec::optional("options", ParamType::Array, "Suggested answers, e.g. [\"noir\", \"cyberpunk\"]"),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let question = param_str(params, "question").unwrap_or_default();
        if question.is_empty() {
            return ExecutionResult::failure("question must not be empty");
        }
        let options = param_str_list(params, "options");
        ExecutionResult::ok(json!({ "question": question, "options": options }))
    }
}
