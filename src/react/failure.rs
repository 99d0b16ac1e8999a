//! 失败分析：工具执行失败后的一次轻量 LLM 复盘
//!
//! 把工具声明的参数 schema、实际传入的参数、错误信息与最近的会话记录交给 LLM，
//! 得到「根因 / 参数问题 / 修正建议」三段，写入会话日志供下一轮规划参考。
//! 复盘调用本身失败时记录一条最小的兜底信息，不会中断执行循环。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::LlmClient;
use crate::memory::{truncate_chars, Message};
use crate::react::context::conversation_section;
use crate::react::parser::closed_block;
use crate::react::planner::metered_complete;
use crate::tools::ToolSchema;

const ANALYSIS_PROMPT: &str = "A tool call made by an autonomous writing agent failed. \
Explain why and how the next call should differ. Reply in exactly this format:
<root_cause>one sentence</root_cause>
<parameter_issue>which parameters were wrong, missing or malformed (or: none)</parameter_issue>
<recommendation>the concrete corrected call to make next</recommendation>";

const PARAMS_PREVIEW_CHARS: usize = 1500;

/// 失败复盘
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub tool: String,
    pub error: String,
    pub root_cause: String,
    pub parameter_issue: String,
    pub recommendation: String,
}

impl FailureAnalysis {
    /// 复盘调用失败时的兜底
    pub fn fallback(tool: &str, error: &str) -> Self {
        Self {
            tool: tool.to_string(),
            error: error.to_string(),
            root_cause: format!("{} failed: {}", tool, error),
            parameter_issue: "unknown (analysis unavailable)".to_string(),
            recommendation: "Check the tool's declared parameters and retry with corrected values, or choose another tool.".to_string(),
        }
    }

    /// 写入会话日志的文本
    pub fn to_log_text(&self) -> String {
        format!(
            "Tool {} failed: {}\nRoot cause: {}\nParameter issue: {}\nRecommendation: {}",
            self.tool, self.error, self.root_cause, self.parameter_issue, self.recommendation
        )
    }
}

/// 失败分析的输入
pub struct FailureContext<'a> {
    pub tool: &'a str,
    pub schema: Option<&'a ToolSchema>,
    pub parameters: &'a Map<String, Value>,
    pub error: &'a str,
    pub recent: &'a [Message],
}

pub struct FailureAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl FailureAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn render(ctx: &FailureContext<'_>) -> String {
        let schema = match ctx.schema {
            Some(s) => s.to_prompt_block(),
            None => format!("{} is not a registered tool.\n", ctx.tool),
        };
        let params = serde_json::to_string_pretty(ctx.parameters).unwrap_or_default();
        format!(
            "## Tool schema\n{}\n## Parameters supplied\n{}\n\n## Error\n{}\n\n## Recent log\n{}\n",
            schema,
            truncate_chars(&params, PARAMS_PREVIEW_CHARS),
            ctx.error,
            conversation_section(ctx.recent)
        )
    }

    /// 返回复盘与本次调用消耗的 token
    pub async fn analyze(&self, ctx: &FailureContext<'_>) -> (FailureAnalysis, u64) {
        let messages = vec![Message::system(ANALYSIS_PROMPT), Message::user(Self::render(ctx))];
        let reply = metered_complete(self.llm.as_ref(), &messages).await;
        let analysis = match reply.text {
            Ok(text) => parse_analysis(ctx.tool, ctx.error, &text),
            Err(e) => {
                tracing::warn!(tool = %ctx.tool, error = %e, "failure analysis call failed");
                FailureAnalysis::fallback(ctx.tool, ctx.error)
            }
        };
        (analysis, reply.tokens)
    }
}

/// 解析复盘输出；标签全部缺失时把整段回复当作根因
pub fn parse_analysis(tool: &str, error: &str, text: &str) -> FailureAnalysis {
    let field = |tag: &str| {
        closed_block(text, tag)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let root_cause = field("root_cause");
    let parameter_issue = field("parameter_issue");
    let recommendation = field("recommendation");
    if root_cause.is_none() && parameter_issue.is_none() && recommendation.is_none() {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return FailureAnalysis::fallback(tool, error);
        }
        let mut analysis = FailureAnalysis::fallback(tool, error);
        analysis.root_cause = truncate_chars(trimmed, 500);
        return analysis;
    }
    let fallback = FailureAnalysis::fallback(tool, error);
    FailureAnalysis {
        tool: tool.to_string(),
        error: error.to_string(),
        root_cause: root_cause.unwrap_or(fallback.root_cause),
        parameter_issue: parameter_issue.unwrap_or_else(|| "none".to_string()),
        recommendation: recommendation.unwrap_or(fallback.recommendation),
    }
}
