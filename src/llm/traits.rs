//! LLM 客户端抽象
//!
//! 规划器、任务分解、失败分析都通过 LlmClient 调用生成式后端。
//! 每次回复自带该次调用的 token 用量，后端不报告时由调用方按字符估算。

use async_trait::async_trait;

use crate::memory::Message;

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CallUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// 一次完成的回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReply {
    pub content: String,
    /// None 表示后端没有报告用量
    pub usage: Option<CallUsage>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: CallUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以文本返回，由调用方降级处理
    async fn complete(&self, messages: &[Message]) -> Result<LlmReply, String>;
}
