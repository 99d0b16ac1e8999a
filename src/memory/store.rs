//! 会话存储抽象层
//!
//! 持久化协作方接口：执行循环只通过 SessionStore 读写会话。
//! 所有写操作都表达为一个 SessionUpdate，由实现方在单次加锁 / 单次落盘内应用，
//! 因此「完成子问题」这类出队操作与持久化是原子的。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{
    AgentError, CharacterPatch, KnowledgeEntry, ResearchState, Session, SessionStatus, SubProblem,
    SubProblemCompletion, Task, WorldbookCategory, WorldbookEntry,
};
use crate::memory::Message;

/// 对会话的一次写操作
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    AppendMessage(Message),
    SetStatus(SessionStatus),
    SetResearch(ResearchState),
    IncrementIteration,
    AddTokens(u64),
    MergeKnowledge(Vec<KnowledgeEntry>),
    AppendTasks(Vec<Task>),
    ClearTasks,
    CompleteActiveSubProblem,
    RewriteActiveTask {
        description: Option<String>,
        sub_problems: Option<Vec<SubProblem>>,
    },
    MergeCharacter(CharacterPatch),
    OverwriteWorldbook {
        category: WorldbookCategory,
        entries: Vec<WorldbookEntry>,
    },
}

/// 写操作的返回值
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Done,
    Iteration(u32),
    TokensUsed(u64),
    KnowledgeAdded(usize),
    SubProblem(SubProblemCompletion),
    Rewritten(bool),
    CharacterFields(Vec<&'static str>),
}

impl SessionUpdate {
    /// 在会话上应用本次写操作（各存储实现共用）
    pub fn apply(self, session: &mut Session) -> UpdateOutcome {
        let outcome = match self {
            SessionUpdate::AppendMessage(msg) => {
                session.messages.push(msg);
                UpdateOutcome::Done
            }
            SessionUpdate::SetStatus(status) => {
                session.status = status;
                UpdateOutcome::Done
            }
            SessionUpdate::SetResearch(research) => {
                session.research = research;
                UpdateOutcome::Done
            }
            SessionUpdate::IncrementIteration => {
                session.execution.iteration = session.execution.iteration.saturating_add(1);
                UpdateOutcome::Iteration(session.execution.iteration)
            }
            SessionUpdate::AddTokens(n) => {
                session.execution.tokens_used = session.execution.tokens_used.saturating_add(n);
                UpdateOutcome::TokensUsed(session.execution.tokens_used)
            }
            SessionUpdate::MergeKnowledge(entries) => {
                UpdateOutcome::KnowledgeAdded(session.research.merge_knowledge(entries))
            }
            SessionUpdate::AppendTasks(tasks) => {
                session.research.append_tasks(tasks);
                UpdateOutcome::Done
            }
            SessionUpdate::ClearTasks => {
                session.research.clear_tasks();
                UpdateOutcome::Done
            }
            SessionUpdate::CompleteActiveSubProblem => {
                UpdateOutcome::SubProblem(session.research.complete_active_sub_problem())
            }
            SessionUpdate::RewriteActiveTask {
                description,
                sub_problems,
            } => UpdateOutcome::Rewritten(
                session.research.rewrite_active_task(description, sub_problems),
            ),
            SessionUpdate::MergeCharacter(patch) => {
                UpdateOutcome::CharacterFields(session.output.character_data.merge(patch))
            }
            SessionUpdate::OverwriteWorldbook { category, entries } => {
                session.output.overwrite_worldbook(category, entries);
                UpdateOutcome::Done
            }
        };
        session.touch();
        outcome
    }
}

/// 会话存储接口：按会话 ID 提供读己之写一致性
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 新建或整体替换会话
    async fn insert(&self, session: Session) -> Result<(), AgentError>;

    /// 读取会话快照
    async fn get(&self, session_id: &str) -> Result<Session, AgentError>;

    /// 原子地应用一次写操作
    async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<UpdateOutcome, AgentError>;

    async fn append_message(&self, session_id: &str, message: Message) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::AppendMessage(message)).await.map(|_| ())
    }

    async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::SetStatus(status)).await.map(|_| ())
    }

    async fn update_research_state(&self, session_id: &str, research: ResearchState) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::SetResearch(research)).await.map(|_| ())
    }

    async fn increment_iteration(&self, session_id: &str) -> Result<u32, AgentError> {
        match self.update(session_id, SessionUpdate::IncrementIteration).await? {
            UpdateOutcome::Iteration(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn add_tokens(&self, session_id: &str, tokens: u64) -> Result<u64, AgentError> {
        match self.update(session_id, SessionUpdate::AddTokens(tokens)).await? {
            UpdateOutcome::TokensUsed(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn merge_knowledge(&self, session_id: &str, entries: Vec<KnowledgeEntry>) -> Result<usize, AgentError> {
        match self.update(session_id, SessionUpdate::MergeKnowledge(entries)).await? {
            UpdateOutcome::KnowledgeAdded(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    async fn append_tasks(&self, session_id: &str, tasks: Vec<Task>) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::AppendTasks(tasks)).await.map(|_| ())
    }

    async fn clear_tasks(&self, session_id: &str) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::ClearTasks).await.map(|_| ())
    }

    async fn complete_active_sub_problem(&self, session_id: &str) -> Result<SubProblemCompletion, AgentError> {
        match self.update(session_id, SessionUpdate::CompleteActiveSubProblem).await? {
            UpdateOutcome::SubProblem(c) => Ok(c),
            other => Err(unexpected(other)),
        }
    }

    async fn rewrite_active_task(
        &self,
        session_id: &str,
        description: Option<String>,
        sub_problems: Option<Vec<SubProblem>>,
    ) -> Result<bool, AgentError> {
        let update = SessionUpdate::RewriteActiveTask {
            description,
            sub_problems,
        };
        match self.update(session_id, update).await? {
            UpdateOutcome::Rewritten(changed) => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    async fn merge_character(&self, session_id: &str, patch: CharacterPatch) -> Result<Vec<&'static str>, AgentError> {
        match self.update(session_id, SessionUpdate::MergeCharacter(patch)).await? {
            UpdateOutcome::CharacterFields(fields) => Ok(fields),
            other => Err(unexpected(other)),
        }
    }

    async fn overwrite_worldbook(
        &self,
        session_id: &str,
        category: WorldbookCategory,
        entries: Vec<WorldbookEntry>,
    ) -> Result<(), AgentError> {
        self.update(session_id, SessionUpdate::OverwriteWorldbook { category, entries })
            .await
            .map(|_| ())
    }
}

fn unexpected(outcome: UpdateOutcome) -> AgentError {
    AgentError::Persistence(format!("unexpected update outcome: {:?}", outcome))
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), AgentError> {
        self.sessions.write().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Session, AgentError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<UpdateOutcome, AgentError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        Ok(update.apply(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip_ops() {
        let store = MemorySessionStore::new();
        let session = Session::new("a sci-fi detective story", 10, 1000);
        let id = session.id.clone();
        store.insert(session).await.unwrap();

        assert_eq!(store.increment_iteration(&id).await.unwrap(), 1);
        assert_eq!(store.increment_iteration(&id).await.unwrap(), 2);
        assert_eq!(store.add_tokens(&id, 40).await.unwrap(), 40);

        store
            .append_tasks(&id, vec![Task::new(0, "A", "", vec![("s".into(), String::new())])])
            .await
            .unwrap();
        let c = store.complete_active_sub_problem(&id).await.unwrap();
        assert!(c.finished_task.is_some());

        let loaded = store.get(&id).await.unwrap();
        assert_eq!(loaded.execution.iteration, 2);
        assert_eq!(loaded.research.completed_tasks, vec!["A"]);
        assert_eq!(loaded.research.main_objective(), "a sci-fi detective story");
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = MemorySessionStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
        assert!(store.update_status("nope", SessionStatus::Failed).await.is_err());
    }
}
