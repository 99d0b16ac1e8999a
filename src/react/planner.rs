//! Planner：渲染 prompt、调用 LLM、计量 token、解析决策
//!
//! LLM 调用失败或输出无法解析时本轮视为「无决策」，不会中断执行循环。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{Message, TokenEstimator};
use crate::react::context::ContextSnapshot;
use crate::react::parser::{parse_decision, ToolDecision, MAX_ADJUSTED_SUB_PROBLEMS};
use crate::tools::ToolSchema;

const PLANNER_ROLE: &str = "You are the planner of an autonomous writer that builds a roleplay character card and its worldbook. \
Each turn you pick exactly ONE tool that advances the active sub-problem.";

const PLANNER_RULES: &str = "Rules:
- Build the character card (CHARACTER) before the worldbook tools (STATUS, USER_SETTING, WORLD_VIEW, SUPPLEMENT).
- Worldbook tools replace their whole category; SUPPLEMENT must always resend the full list (at least 5 entries).
- Only use SEARCH for URLs on reference sites; use ASK_USER when the creative direction is unclear.
- When the queue is empty but something is missing, use REFLECT to add tasks. Use COMPLETE only when everything is filled.
- Every turn re-optimize the active task inside <task_adjustment>. You may rewrite its description and replace its \
remaining sub-problems, but never list more sub-problems than it currently has";

const OUTPUT_FORMAT: &str = "Reply in exactly this format:
<think>your reasoning</think>
<task_adjustment>
  <reasoning>why the active task should (not) change</reasoning>
  <task_description>new description, or: no change</task_description>
  <new_sub_problems>
    <sub_problem>...</sub_problem>
  </new_sub_problems>
</task_adjustment>
<action>TOOL_NAME</action>
<priority>high|normal|low</priority>
<parameters>
  <param_name>plain value</param_name>
  <composite_param><![CDATA[ JSON array or object ]]></composite_param>
</parameters>
If there is nothing useful to do this turn, reply with <action>none</action>.";

/// 一次 LLM 调用的结果与消耗的 token
pub struct MeteredReply {
    pub text: Result<String, String>,
    pub tokens: u64,
}

/// 调用 LLM 并计量 token：回复带用量时按用量计，否则按字符估算 prompt 与回复
pub async fn metered_complete(llm: &dyn LlmClient, messages: &[Message]) -> MeteredReply {
    let prompt_estimate = || -> u64 { messages.iter().map(|m| TokenEstimator::estimate(&m.content)).sum() };
    match llm.complete(messages).await {
        Ok(reply) => {
            let tokens = match reply.usage {
                Some(usage) if usage.total() > 0 => usage.total(),
                _ => prompt_estimate() + TokenEstimator::estimate(&reply.content),
            };
            MeteredReply {
                text: Ok(reply.content),
                tokens,
            }
        }
        Err(e) => MeteredReply {
            text: Err(e),
            tokens: prompt_estimate(),
        },
    }
}

/// 规划器单轮输出
#[derive(Debug, Clone)]
pub struct PlannerTurn {
    pub decision: Option<ToolDecision>,
    pub tokens: u64,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// system prompt：角色、规则、工具说明、输出格式
    pub fn system_prompt(tools: &[ToolSchema]) -> String {
        let mut s = format!(
            "{}\n\n{} (at most {}).\n\n## Tools\n",
            PLANNER_ROLE, PLANNER_RULES, MAX_ADJUSTED_SUB_PROBLEMS
        );
        for tool in tools {
            s.push_str(&tool.to_prompt_block());
            s.push('\n');
        }
        s.push_str(OUTPUT_FORMAT);
        s
    }

    pub async fn decide(&self, snapshot: &ContextSnapshot, tools: &[ToolSchema]) -> PlannerTurn {
        let messages = vec![
            Message::system(Self::system_prompt(tools)),
            Message::user(snapshot.render()),
        ];
        let reply = metered_complete(self.llm.as_ref(), &messages).await;
        match reply.text {
            Ok(raw) => {
                let decision = parse_decision(&raw);
                if decision.is_none() {
                    tracing::info!(session = %snapshot.session_id, "planner produced no decision");
                }
                PlannerTurn {
                    decision,
                    tokens: reply.tokens,
                }
            }
            Err(e) => {
                tracing::warn!(session = %snapshot.session_id, error = %e, "planner call failed");
                PlannerTurn {
                    decision: None,
                    tokens: reply.tokens,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Session;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{builtin_registry, ToolRegistry};
    use crate::config::ToolsSection;

    fn schemas() -> Vec<ToolSchema> {
        let reg: ToolRegistry = builtin_registry(&ToolsSection::default());
        reg.schemas()
    }

    #[tokio::test]
    async fn test_decide_parses_and_meters() {
        let llm = Arc::new(
            ScriptedLlmClient::new(["<action>REFLECT</action><parameters><new_tasks><![CDATA[[\"补充配角\"]]]></new_tasks></parameters>"])
                .with_tokens_per_call(42),
        );
        let planner = Planner::new(llm.clone());
        let session = Session::new("a sci-fi detective story", 10, 1000);
        let turn = planner.decide(&ContextSnapshot::capture(&session, 5, 5), &schemas()).await;
        assert_eq!(turn.tokens, 42);
        assert_eq!(turn.decision.unwrap().tool, "REFLECT");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("### SUPPLEMENT"));
        assert!(prompt.contains("a sci-fi detective story"));
    }

    #[tokio::test]
    async fn test_llm_error_is_no_decision_with_estimated_tokens() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).push_error("rate limited"));
        let planner = Planner::new(llm);
        let session = Session::new("x", 10, 1000);
        let turn = planner.decide(&ContextSnapshot::capture(&session, 5, 5), &schemas()).await;
        assert!(turn.decision.is_none());
        assert!(turn.tokens > 0);
    }
}
