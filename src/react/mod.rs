//! 认知层：决策解析、任务分解与调整、执行循环、完成判定、失败复盘

pub mod completion;
pub mod context;
pub mod decompose;
pub mod events;
pub mod failure;
pub mod input;
pub mod loop_;
pub mod parser;
pub mod planner;
pub mod tasks;

pub use completion::{Completion, CompletionEvaluator, MIN_SUPPLEMENT_ENTRIES};
pub use context::ContextSnapshot;
pub use decompose::{Decomposition, TaskDecomposer};
pub use events::AgentEvent;
pub use failure::{FailureAnalysis, FailureAnalyzer};
pub use input::{ConsoleInput, UserInput};
pub use loop_::{CompletionReport, ExecutionLoop, RunResult};
pub use parser::{parse_decision, TaskAdjustment, ToolDecision};
pub use planner::{Planner, PlannerTurn};
pub use tasks::{plan_rewrite, TaskRewrite};
