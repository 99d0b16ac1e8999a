//! 记忆层：消息日志、会话存储（内存 / 文件）、token 估算

pub mod conversation;
pub mod persistence;
pub mod store;
pub mod tokens;

pub use conversation::{recent_messages, Message, MessageKind, Role};
pub use persistence::FileSessionStore;
pub use store::{MemorySessionStore, SessionStore, SessionUpdate, UpdateOutcome};
pub use tokens::{truncate_chars, TokenEstimator};
