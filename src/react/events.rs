//! 执行过程事件：供 CLI 等前端展示迭代、决策、工具结果与完成情况

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 任务分解完成
    Decomposed { tasks: usize },
    /// 新一轮迭代
    IterationStarted { iteration: u32, max_iterations: u32 },
    /// 正在调用规划器
    Thinking,
    /// 规划器选择了工具
    Decision { tool: String, reasoning: String },
    /// 规划器本轮无决策
    NoDecision,
    /// 活动任务被改写
    TaskAdjusted {
        description: Option<String>,
        sub_problems: usize,
    },
    /// 工具返回（预览）
    ToolResult {
        tool: String,
        success: bool,
        preview: String,
    },
    /// 失败复盘
    FailureAnalysis { tool: String, root_cause: String },
    /// 向用户提问
    WaitingUser { question: String, options: Vec<String> },
    /// 队列为空但产物不完整
    Deficiency { category: String, detail: String },
    /// Token 累计
    TokenUsage { used: u64, budget: u64 },
    /// 生成完成
    Completed { summary: String },
    /// 终止性错误
    Error { text: String },
}

pub(crate) fn send_event(tx: &Option<UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
