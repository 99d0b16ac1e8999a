//! Agent 错误类型
//!
//! 只有资源上限耗尽与交互输入失败会作为终止性错误向上传播；
//! 工具失败、决策解析失败、任务分解失败都在各自的边界内降级处理，不会出现在这里。

use thiserror::Error;

/// 执行循环与持久化层可能返回的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 交互输入协作方失败：本次运行终止，会话标记为 FAILED
    #[error("User input failed: {0}")]
    UserInput(String),

    #[error("Token budget exhausted ({used}/{budget})")]
    TokenBudgetExhausted { used: u64, budget: u64 },

    #[error("Iteration limit reached ({0})")]
    IterationLimitReached(u32),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 资源上限类错误（迭代次数 / token 预算）
    pub fn is_cap_exhausted(&self) -> bool {
        matches!(
            self,
            AgentError::TokenBudgetExhausted { .. } | AgentError::IterationLimitReached(_)
        )
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}
