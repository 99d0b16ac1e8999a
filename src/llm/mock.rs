//! Mock / 脚本化 LLM 客户端（用于测试与无 API Key 的本地运行）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CallUsage, LlmClient, LlmReply};
use crate::memory::Message;

/// 脚本耗尽后的回复
const NO_ACTION: &str = "<action>none</action>";

/// Mock 客户端：始终回复「无动作」，执行循环会空转直到迭代上限
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<LlmReply, String> {
        Ok(LlmReply::text(
            "<think>No API key configured; nothing to plan.</think>\n<action>none</action>",
        ))
    }
}

/// 脚本化客户端：按顺序返回预置回复，耗尽后回复无动作；记录每次收到的 prompt
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    tokens_per_call: u64,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
            tokens_per_call: 0,
        }
    }

    /// 追加一次失败的回复
    pub fn push_error(self, error: impl Into<String>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error.into()));
        }
        self
    }

    /// 每次成功回复都报告固定用量（模拟返回 usage 的后端）；0 表示不报告
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// 已收到的 prompt（每次调用拼接全部消息内容）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<LlmReply, String> {
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if let Ok(mut p) = self.prompts.lock() {
            p.push(joined);
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let content = next.unwrap_or_else(|| Ok(NO_ACTION.to_string()))?;
        let reply = LlmReply::text(content);
        Ok(if self.tokens_per_call > 0 {
            reply.with_usage(CallUsage {
                prompt_tokens: self.tokens_per_call,
                completion_tokens: 0,
            })
        } else {
            reply
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlmClient::new(["one", "two"]).push_error("boom");
        let msgs = [Message::user("hi")];
        assert_eq!(llm.complete(&msgs).await.unwrap().content, "one");
        assert_eq!(llm.complete(&msgs).await.unwrap().content, "two");
        assert_eq!(llm.complete(&msgs).await.unwrap_err(), "boom");
        assert!(llm.complete(&msgs).await.unwrap().content.contains("none"));
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn test_usage_reported_per_call() {
        let llm = ScriptedLlmClient::new(["a"]).with_tokens_per_call(30);
        let reply = llm.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(reply.usage.map(|u| u.total()), Some(30));
        let plain = ScriptedLlmClient::new(["a"]);
        assert!(plain.complete(&[]).await.unwrap().usage.is_none());
    }
}
