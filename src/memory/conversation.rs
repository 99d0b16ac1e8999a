//! 消息日志：会话内的规划推理、工具结果、失败分析、用户问答
//!
//! 同一份 Message 既写入会话日志，也直接作为 LLM 请求消息使用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 消息类别，用于上下文摘要时筛选
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    /// 规划器本轮的推理
    Reasoning,
    /// 工具执行结果摘要
    ToolResult,
    /// 工具失败后的复盘
    FailureAnalysis,
    /// 向用户提问
    UserPrompt,
    /// 用户回答
    UserAnswer,
    /// 循环自身的提示（缺项报告、完成摘要等）
    Notice,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }
}

/// 取最近 n 条消息
pub fn recent_messages(messages: &[Message], n: usize) -> &[Message] {
    &messages[messages.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_messages_window() {
        let msgs: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let recent = recent_messages(&msgs, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent_messages(&msgs, 10).len(), 5);
    }

    #[test]
    fn test_kind_defaults_when_missing() {
        let msg: Message = serde_json::from_str(r#"{"role":"User","content":"hi"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
    }
}
