//! 会话文件持久化
//!
//! 每个会话一个 JSON 文件（`<dir>/<session_id>.json`），用于跨进程恢复暂停的会话。
//! 写入先落临时文件再 rename，避免中途崩溃留下半截 JSON。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{AgentError, Session};
use crate::memory::store::{SessionStore, SessionUpdate, UpdateOutcome};

/// 文件会话存储：读-改-写在同一把锁内完成
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AgentError::Persistence(format!(
                "invalid session id: {}",
                session_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    async fn load(&self, session_id: &str) -> Result<Session, AgentError> {
        let path = self.path_for(session_id)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    async fn save(&self, session: &Session) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&session.id)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(session)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// 列出目录下所有会话 ID
    pub async fn list(&self) -> Result<Vec<String>, AgentError> {
        let mut ids = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn insert(&self, session: Session) -> Result<(), AgentError> {
        let _guard = self.lock.lock().await;
        self.save(&session).await
    }

    async fn get(&self, session_id: &str) -> Result<Session, AgentError> {
        let _guard = self.lock.lock().await;
        self.load(session_id).await
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<UpdateOutcome, AgentError> {
        let _guard = self.lock.lock().await;
        let mut session = self.load(session_id).await?;
        let outcome = update.apply(&mut session);
        self.save(&session).await?;
        Ok(outcome)
    }
}
