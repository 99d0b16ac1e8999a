//! Agent 运行时
//!
//! 进程启动时构建一次：LLM 后端、会话存储、工具注册表与执行器；
//! 之后为每个会话创建 ExecutionLoop，共享这些组件。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentError, Session};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{FileSessionStore, SessionStore};
use crate::react::ExecutionLoop;
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry};

/// 预构建的 Agent 组件，可多会话共享
pub struct Agent {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn SessionStore>,
    executor: Arc<ToolExecutor>,
}

impl Agent {
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn SessionStore>,
        registry: ToolRegistry,
    ) -> Self {
        let executor = Arc::new(ToolExecutor::new(Arc::new(registry), config.tools.tool_timeout_secs));
        Self {
            config,
            llm,
            store,
            executor,
        }
    }

    /// 按配置构建：文件会话存储（app.state_dir）、配置选择的 LLM、全部内置工具
    pub fn from_config(config: AppConfig) -> Self {
        let llm = create_llm_from_config(&config);
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&config.app.state_dir));
        let registry = builtin_registry(&config.tools);
        Self::new(config, llm, store, registry)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// 新建会话并持久化，返回会话 ID
    pub async fn create_session(&self, objective: &str) -> Result<String, AgentError> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(AgentError::ConfigError("objective must not be empty".to_string()));
        }
        let session = Session::new(
            objective,
            self.config.agent.max_iterations,
            self.config.agent.token_budget,
        );
        let id = session.id.clone();
        self.store.insert(session).await?;
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    /// 为会话创建执行循环
    pub fn execution_loop(&self, session_id: &str) -> ExecutionLoop {
        ExecutionLoop::new(
            session_id,
            self.store.clone(),
            self.llm.clone(),
            self.executor.clone(),
            &self.config.agent,
        )
    }
}
