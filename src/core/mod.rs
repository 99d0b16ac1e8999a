//! 核心数据层：错误类型、会话状态、生成产物

pub mod error;
pub mod output;
pub mod state;

pub use error::AgentError;
pub use output::{
    CharacterData, CharacterPatch, GenerationOutput, OutputCategory, WorldbookCategory,
    WorldbookEntry, CHARACTER_FIELDS,
};
pub use state::{
    DirectionClarity, ExecutionInfo, KnowledgeEntry, PlanningInsight, ResearchState, Session,
    SessionStatus, SubProblem, SubProblemCompletion, Task,
};
