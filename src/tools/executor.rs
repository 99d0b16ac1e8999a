//! 工具执行器
//!
//! 持有 ToolRegistry 与可选超时，execute 在超时内调用 registry.execute；
//! 超时转为失败结果（交给失败分析），每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::memory::truncate_chars;
use crate::tools::{ExecutionResult, ToolContext, ToolRegistry, ToolSchema};

/// 工具执行器：对每次调用施加超时（0 表示不限制）
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn schema_for(&self, name: &str) -> Option<ToolSchema> {
        self.registry.schema_for(name)
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> ExecutionResult {
        let start = Instant::now();
        let fut = self.registry.execute(tool_name, params, ctx);
        let (result, outcome) = match self.timeout {
            Some(limit) => match timeout(limit, fut).await {
                Ok(r) => {
                    let outcome = if r.success { "ok" } else { "error" };
                    (r, outcome)
                }
                Err(_) => (
                    ExecutionResult::failure(format!(
                        "Tool timeout: {} exceeded {}s",
                        tool_name,
                        limit.as_secs()
                    )),
                    "timeout",
                ),
            },
            None => {
                let r = fut.await;
                let outcome = if r.success { "ok" } else { "error" };
                (r, outcome)
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "session": ctx.session_id,
            "tool": tool_name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": truncate_chars(&Value::Object(params.clone()).to_string(), 200),
        });
        tracing::info!(audit = %audit, "tool");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolKind};
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> ExecutionResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ExecutionResult::ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(ToolKind::Search, SlowTool);
        let exec = ToolExecutor::new(Arc::new(reg), 1);
        let r = exec.execute("SEARCH", &Map::new(), &ToolContext::default()).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("timeout"));
    }
}
