//! COMPLETE 工具：声明创作已完成；finished=true 时执行循环清空任务队列，随后由结构检查决定是否真正完成

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamType, ParameterSpec};
use crate::tools::{param_str, ExecutionResult, Tool, ToolContext};

pub struct CompleteTool;

#[async_trait]
impl Tool for CompleteTool {
    fn name(&self) -> &str {
        "COMPLETE"
    }

    fn description(&self) -> &str {
        "Declare the character card and worldbook finished. The remaining task queue is cleared and a structural completeness check runs."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::optional("finished", ParamType::Boolean, "true to finish (default true)"),
            ParameterSpec::optional("summary", ParamType::String, "Short summary of the result"),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let finished = match params.get("finished") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("false"),
            _ => true,
        };
        ExecutionResult::ok(json!({
            "finished": finished,
            "summary": param_str(params, "summary").unwrap_or_default(),
        }))
    }
}
