//! REFLECT 工具：根据当前产物提出新任务，追加到队列尾部

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::payload::NewTaskSpec;
use crate::tools::schema::{ParamType, ParameterSpec};
use crate::tools::{param_str, ExecutionResult, Tool, ToolContext};

pub struct ReflectTool;

#[async_trait]
impl Tool for ReflectTool {
    fn name(&self) -> &str {
        "REFLECT"
    }

    fn description(&self) -> &str {
        "Review what is still missing and propose follow-up tasks; they are appended to the end of the task queue. Use it when the queue is empty but the output is incomplete."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "new_tasks",
                ParamType::Array,
                "[{\"description\": \"...\", \"reasoning\": \"...\", \"sub_problems\": [\"...\"]}] or a list of task descriptions",
            ),
            ParameterSpec::optional("reflection", ParamType::String, "What is missing and why"),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let tasks: Vec<NewTaskSpec> = match params.get("new_tasks") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(NewTaskSpec {
                        description: s.clone(),
                        ..Default::default()
                    }),
                    other => serde_json::from_value(other.clone()).ok(),
                })
                .filter(|t| !t.description.trim().is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![NewTaskSpec {
                description: s.trim().to_string(),
                ..Default::default()
            }],
            _ => Vec::new(),
        };
        if tasks.is_empty() {
            return ExecutionResult::failure("new_tasks must contain at least one task with a description");
        }
        ExecutionResult::ok(json!({
            "new_tasks": tasks,
            "reflection": param_str(params, "reflection").unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepts_plain_string_list() {
        let mut params = Map::new();
        params.insert("new_tasks".into(), json!(["补充两个配角", {"description": "完善状态栏", "sub_problems": ["确定字段"]}]));
        let r = ReflectTool.execute(&ToolContext::default(), &params).await;
        assert!(r.success);
        let tasks = r.payload.unwrap()["new_tasks"].as_array().unwrap().len();
        assert_eq!(tasks, 2);
    }
}
