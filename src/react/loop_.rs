//! 执行循环
//!
//! 每轮：迭代计数 +1 并持久化 → 上下文快照 → 规划器决策 → 强制任务调整 → 执行工具 →
//! 失败则复盘、成功则应用副作用并完成活动子问题 → 队列为空时做完成判定 → 节奏延迟。
//! 迭代上限与 token 预算在每轮开头检查，分别以不同的错误终止。
//! ASK_USER 在没有交互输入时暂停并返回 Paused，之后通过 continue_execution 从持久化状态恢复。

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::AgentSection;
use crate::core::{AgentError, CharacterPatch, GenerationOutput, Session, SessionStatus};
use crate::llm::LlmClient;
use crate::memory::{recent_messages, truncate_chars, Message, MessageKind, SessionStore};
use crate::react::completion::{Completion, CompletionEvaluator};
use crate::react::context::ContextSnapshot;
use crate::react::decompose::TaskDecomposer;
use crate::react::events::{send_event, AgentEvent};
use crate::react::failure::{FailureAnalyzer, FailureContext};
use crate::react::input::UserInput;
use crate::react::parser::ToolDecision;
use crate::react::planner::Planner;
use crate::react::tasks::{next_task_position, plan_rewrite};
use crate::tools::{
    AskUserPayload, CharacterPayload, CompletePayload, ReflectPayload, SearchPayload, ToolContext,
    ToolExecutor, ToolKind, WorldbookPayload,
};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 完成时返回的汇总
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub session_id: String,
    pub summary: String,
    pub iterations: u32,
    pub tokens_used: u64,
    pub completed_tasks: Vec<String>,
    pub output: GenerationOutput,
}

/// 一次 start / continue_execution 的结果
#[derive(Debug, Clone)]
pub enum RunResult {
    Completed(CompletionReport),
    /// 等待外部回答；回答后调用 continue_execution
    Paused { question: String, options: Vec<String> },
}

/// 副作用应用结果
enum Effect {
    Applied(String),
    Paused { question: String, options: Vec<String> },
    /// 载荷不可用，按工具失败处理
    Rejected(String),
}

fn decode<T: DeserializeOwned>(kind: ToolKind, payload: Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("malformed {} payload: {}", kind, e))
}

pub struct ExecutionLoop {
    session_id: String,
    store: Arc<dyn SessionStore>,
    executor: Arc<ToolExecutor>,
    planner: Planner,
    decomposer: TaskDecomposer,
    analyzer: FailureAnalyzer,
    evaluator: CompletionEvaluator,
    pacing: Duration,
    recent_messages: usize,
    recent_knowledge: usize,
    user_input: Option<Arc<dyn UserInput>>,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl ExecutionLoop {
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        cfg: &AgentSection,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            executor,
            planner: Planner::new(llm.clone()),
            decomposer: TaskDecomposer::new(llm.clone()),
            analyzer: FailureAnalyzer::new(llm),
            evaluator: CompletionEvaluator,
            pacing: Duration::from_millis(cfg.pacing_delay_ms),
            recent_messages: cfg.recent_messages,
            recent_knowledge: cfg.recent_knowledge,
            user_input: None,
            event_tx: None,
        }
    }

    /// continue_execution 使用的交互输入
    pub fn with_user_input(mut self, input: Arc<dyn UserInput>) -> Self {
        self.user_input = Some(input);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 开始执行；队列为空时先做任务分解
    pub async fn start(&self, input: Option<Arc<dyn UserInput>>) -> Result<RunResult, AgentError> {
        let outcome = self.start_inner(input).await;
        self.settle(outcome).await
    }

    /// 恢复暂停的会话。WAITING_USER / THINKING 状态下先记录回答并完成活动子问题（仅一次）
    pub async fn continue_execution(&self, answer: Option<String>) -> Result<RunResult, AgentError> {
        let outcome = self.continue_inner(answer).await;
        self.settle(outcome).await
    }

    async fn start_inner(&self, input: Option<Arc<dyn UserInput>>) -> Result<RunResult, AgentError> {
        let session = self.store.get(&self.session_id).await?;
        tracing::info!(
            session = %self.session_id,
            objective = %session.research.main_objective(),
            "execution started"
        );
        self.store.update_status(&self.session_id, SessionStatus::Thinking).await?;
        if session.research.task_queue.is_empty() {
            self.seed_tasks(&session).await?;
        }
        self.drive(input).await
    }

    async fn continue_inner(&self, answer: Option<String>) -> Result<RunResult, AgentError> {
        let session = self.store.get(&self.session_id).await?;
        match session.status {
            SessionStatus::Completed => return Ok(RunResult::Completed(report(&session))),
            SessionStatus::Idle => return self.start_inner(self.user_input.clone()).await,
            status if status.is_resumable() => {
                let answer = answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
                if let Some(answer) = answer {
                    self.store
                        .append_message(
                            &self.session_id,
                            Message::user(answer).with_kind(MessageKind::UserAnswer),
                        )
                        .await?;
                }
                let completion = self.store.complete_active_sub_problem(&self.session_id).await?;
                tracing::info!(
                    session = %self.session_id,
                    sub_problem = ?completion.sub_problem.as_ref().map(|s| s.description.as_str()),
                    finished_task = completion.finished_task.is_some(),
                    "resumed"
                );
            }
            status => {
                tracing::info!(session = %self.session_id, ?status, "resuming without completing a sub-problem");
            }
        }
        self.store.update_status(&self.session_id, SessionStatus::Thinking).await?;
        self.drive(self.user_input.clone()).await
    }

    /// 最外层边界：任何错误都把会话标记为 FAILED，已生成的产物保留
    async fn settle(&self, outcome: Result<RunResult, AgentError>) -> Result<RunResult, AgentError> {
        if let Err(e) = &outcome {
            tracing::error!(session = %self.session_id, error = %e, "execution stopped");
            send_event(&self.event_tx, AgentEvent::Error { text: e.to_string() });
            if !matches!(e, AgentError::SessionNotFound(_)) {
                if let Err(store_err) = self
                    .store
                    .update_status(&self.session_id, SessionStatus::Failed)
                    .await
                {
                    tracing::warn!(error = %store_err, "failed to mark session FAILED");
                }
                let notice = Message::system(format!("Execution stopped: {}", e)).with_kind(MessageKind::Notice);
                if let Err(store_err) = self.store.append_message(&self.session_id, notice).await {
                    tracing::warn!(error = %store_err, "failed to record stop notice");
                }
            }
        }
        outcome
    }

    async fn seed_tasks(&self, session: &Session) -> Result<(), AgentError> {
        let decomposition = self.decomposer.decompose(session.research.main_objective()).await;
        self.charge_tokens(decomposition.tokens).await?;
        if decomposition.tasks.is_empty() {
            tracing::info!(session = %self.session_id, "no tasks from decomposition; queue left empty");
            return Ok(());
        }
        let mut research = self.store.get(&self.session_id).await?.research;
        if !research.task_queue.is_empty() {
            return Ok(());
        }
        let count = decomposition.tasks.len();
        research.append_tasks(decomposition.tasks);
        research.insight = decomposition.insight;
        self.store.update_research_state(&self.session_id, research).await?;
        send_event(&self.event_tx, AgentEvent::Decomposed { tasks: count });
        Ok(())
    }

    async fn charge_tokens(&self, tokens: u64) -> Result<(), AgentError> {
        if tokens == 0 {
            return Ok(());
        }
        let used = self.store.add_tokens(&self.session_id, tokens).await?;
        let budget = self.store.get(&self.session_id).await?.execution.token_budget;
        send_event(&self.event_tx, AgentEvent::TokenUsage { used, budget });
        Ok(())
    }

    async fn drive(&self, input: Option<Arc<dyn UserInput>>) -> Result<RunResult, AgentError> {
        let schemas = self.executor.registry().schemas();
        loop {
            let session = self.store.get(&self.session_id).await?;
            let exec = session.execution;
            if exec.tokens_exhausted() {
                return Err(AgentError::TokenBudgetExhausted {
                    used: exec.tokens_used,
                    budget: exec.token_budget,
                });
            }
            if exec.iterations_exhausted() {
                return Err(AgentError::IterationLimitReached(exec.max_iterations));
            }

            let iteration = self.store.increment_iteration(&self.session_id).await?;
            tracing::info!(session = %self.session_id, iteration, max = exec.max_iterations, "iteration");
            send_event(
                &self.event_tx,
                AgentEvent::IterationStarted {
                    iteration,
                    max_iterations: exec.max_iterations,
                },
            );
            self.store.update_status(&self.session_id, SessionStatus::Thinking).await?;

            let session = self.store.get(&self.session_id).await?;
            let snapshot = ContextSnapshot::capture(&session, self.recent_messages, self.recent_knowledge);
            send_event(&self.event_tx, AgentEvent::Thinking);
            let turn = self.planner.decide(&snapshot, &schemas).await;
            self.charge_tokens(turn.tokens).await?;

            match turn.decision {
                None => send_event(&self.event_tx, AgentEvent::NoDecision),
                Some(decision) => {
                    if let Some(paused) = self.step(&session, decision, input.as_ref()).await? {
                        return Ok(paused);
                    }
                }
            }

            let session = self.store.get(&self.session_id).await?;
            if session.research.task_queue.is_empty() {
                let completion = self.evaluator.evaluate(&session.output);
                match completion.remediation_notice() {
                    None => return self.finish(&session).await.map(RunResult::Completed),
                    Some(notice) => self.record_deficiency(&session, &completion, notice).await?,
                }
            }

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
    }

    /// 单个决策：任务调整 → 执行 → 副作用或失败复盘。返回 Some 表示需要暂停
    async fn step(
        &self,
        session: &Session,
        decision: ToolDecision,
        input: Option<&Arc<dyn UserInput>>,
    ) -> Result<Option<RunResult>, AgentError> {
        if let Some(task) = session.research.active_task() {
            if let Some(rewrite) = plan_rewrite(task, &decision.adjustment) {
                let sub_problems = rewrite
                    .sub_problems
                    .as_ref()
                    .map_or(task.sub_problems.len(), Vec::len);
                let description = rewrite.description.clone();
                let changed = self
                    .store
                    .rewrite_active_task(&self.session_id, rewrite.description, rewrite.sub_problems)
                    .await?;
                if changed {
                    tracing::debug!(reason = %decision.adjustment.reasoning, "active task adjusted");
                    send_event(
                        &self.event_tx,
                        AgentEvent::TaskAdjusted {
                            description,
                            sub_problems,
                        },
                    );
                }
            }
        }

        if !decision.reasoning.is_empty() {
            let text = format!("[{}] {}", decision.tool, decision.reasoning);
            self.store
                .append_message(&self.session_id, Message::assistant(text).with_kind(MessageKind::Reasoning))
                .await?;
        }
        send_event(
            &self.event_tx,
            AgentEvent::Decision {
                tool: decision.tool.clone(),
                reasoning: decision.reasoning.clone(),
            },
        );
        self.store.update_status(&self.session_id, SessionStatus::Executing).await?;

        let session = self.store.get(&self.session_id).await?;
        let research = &session.research;
        let had_active = research.active_task().is_some();
        let ctx = ToolContext {
            session_id: self.session_id.clone(),
            main_objective: research.main_objective().to_string(),
            active_task: research.active_task().map(|t| t.description.clone()),
            active_sub_problem: research.active_sub_problem().map(|s| s.description.clone()),
        };
        let result = self.executor.execute(&decision.tool, &decision.parameters, &ctx).await;

        let effect = if result.success {
            let kind = self.executor.registry().kind_of(&decision.tool);
            let payload = result.payload.unwrap_or(Value::Null);
            self.apply_side_effect(&decision.tool, kind, payload, &session, input).await?
        } else {
            Effect::Rejected(
                result
                    .error
                    .unwrap_or_else(|| "tool reported failure without an error message".to_string()),
            )
        };

        match effect {
            Effect::Rejected(error) => {
                self.analyze_failure(&decision, &error).await?;
                Ok(None)
            }
            Effect::Paused { question, options } => Ok(Some(RunResult::Paused { question, options })),
            Effect::Applied(summary) => {
                send_event(
                    &self.event_tx,
                    AgentEvent::ToolResult {
                        tool: decision.tool.clone(),
                        success: true,
                        preview: truncate_chars(&summary, RESULT_PREVIEW_CHARS),
                    },
                );
                self.store
                    .append_message(&self.session_id, Message::system(summary).with_kind(MessageKind::ToolResult))
                    .await?;
                if had_active {
                    let completion = self.store.complete_active_sub_problem(&self.session_id).await?;
                    if let Some(task) = completion.finished_task {
                        tracing::info!(session = %self.session_id, task = %task.description, "task completed");
                    }
                }
                self.store.update_status(&self.session_id, SessionStatus::Thinking).await?;
                Ok(None)
            }
        }
    }

    async fn apply_side_effect(
        &self,
        tool: &str,
        kind: Option<ToolKind>,
        payload: Value,
        session: &Session,
        input: Option<&Arc<dyn UserInput>>,
    ) -> Result<Effect, AgentError> {
        let Some(kind) = kind else {
            return Ok(Effect::Applied(format!("{} succeeded", tool)));
        };
        let id = self.session_id.as_str();
        let effect = match kind {
            ToolKind::Search => match decode::<SearchPayload>(kind, payload) {
                Ok(p) => {
                    let added = self.store.merge_knowledge(id, p.into_entries()).await?;
                    Effect::Applied(format!("SEARCH added {} knowledge entries", added))
                }
                Err(e) => Effect::Rejected(e),
            },
            ToolKind::AskUser => match decode::<AskUserPayload>(kind, payload) {
                Ok(p) => self.ask_user(p, input).await?,
                Err(e) => Effect::Rejected(e),
            },
            ToolKind::Character => match decode::<CharacterPayload>(kind, payload) {
                Ok(p) => {
                    let patch = CharacterPatch::from_value(&p.character_data);
                    if patch.is_empty() {
                        Effect::Rejected("CHARACTER returned no usable fields".to_string())
                    } else {
                        let fields = self.store.merge_character(id, patch).await?;
                        Effect::Applied(format!("CHARACTER updated: {}", fields.join(", ")))
                    }
                }
                Err(e) => Effect::Rejected(e),
            },
            ToolKind::Status | ToolKind::UserSetting | ToolKind::WorldView | ToolKind::Supplement => {
                match (kind.worldbook_category(), decode::<WorldbookPayload>(kind, payload)) {
                    (Some(category), Ok(p)) => {
                        let entries: Vec<_> = p.entries.into_iter().filter(|e| e.has_content()).collect();
                        if entries.is_empty() {
                            Effect::Rejected(format!("{} returned no entry with content", kind))
                        } else {
                            let count = entries.len();
                            self.store.overwrite_worldbook(id, category, entries).await?;
                            Effect::Applied(format!("{} overwritten with {} entries", kind, count))
                        }
                    }
                    (_, Err(e)) => Effect::Rejected(e),
                    (None, Ok(_)) => Effect::Rejected(format!("{} has no worldbook category", kind)),
                }
            }
            ToolKind::Reflect => match decode::<ReflectPayload>(kind, payload) {
                Ok(p) => {
                    let tasks = p.into_tasks(next_task_position(&session.research));
                    if tasks.is_empty() {
                        Effect::Rejected("REFLECT proposed no tasks".to_string())
                    } else {
                        let count = tasks.len();
                        self.store.append_tasks(id, tasks).await?;
                        Effect::Applied(format!("REFLECT appended {} tasks", count))
                    }
                }
                Err(e) => Effect::Rejected(e),
            },
            ToolKind::Complete => match decode::<CompletePayload>(kind, payload) {
                Ok(p) if p.finished => {
                    self.store.clear_tasks(id).await?;
                    Effect::Applied(format!("COMPLETE: task queue cleared. {}", p.summary))
                }
                Ok(_) => Effect::Applied("COMPLETE: not finished yet".to_string()),
                Err(e) => Effect::Rejected(e),
            },
        };
        Ok(effect)
    }

    async fn ask_user(
        &self,
        payload: AskUserPayload,
        input: Option<&Arc<dyn UserInput>>,
    ) -> Result<Effect, AgentError> {
        let question = payload.question.trim().to_string();
        if question.is_empty() {
            return Ok(Effect::Rejected("ASK_USER returned an empty question".to_string()));
        }
        let options = payload.options;
        self.store.update_status(&self.session_id, SessionStatus::WaitingUser).await?;
        let mut prompt = question.clone();
        if !options.is_empty() {
            prompt.push_str(&format!("\nOptions: {}", options.join(" / ")));
        }
        self.store
            .append_message(&self.session_id, Message::assistant(prompt).with_kind(MessageKind::UserPrompt))
            .await?;
        send_event(
            &self.event_tx,
            AgentEvent::WaitingUser {
                question: question.clone(),
                options: options.clone(),
            },
        );

        let Some(input) = input else {
            tracing::info!(session = %self.session_id, "waiting for user; pausing");
            return Ok(Effect::Paused { question, options });
        };
        let answer = input
            .prompt(&question, &options)
            .await
            .map_err(AgentError::UserInput)?;
        let answer = answer.trim().to_string();
        self.store
            .append_message(&self.session_id, Message::user(answer.clone()).with_kind(MessageKind::UserAnswer))
            .await?;
        Ok(Effect::Applied(format!("ASK_USER answered: {}", answer)))
    }

    async fn analyze_failure(&self, decision: &ToolDecision, error: &str) -> Result<(), AgentError> {
        tracing::warn!(session = %self.session_id, tool = %decision.tool, error = %error, "tool failed");
        send_event(
            &self.event_tx,
            AgentEvent::ToolResult {
                tool: decision.tool.clone(),
                success: false,
                preview: truncate_chars(error, RESULT_PREVIEW_CHARS),
            },
        );
        let schema = self.executor.schema_for(&decision.tool);
        let session = self.store.get(&self.session_id).await?;
        let ctx = FailureContext {
            tool: &decision.tool,
            schema: schema.as_ref(),
            parameters: &decision.parameters,
            error,
            recent: recent_messages(&session.messages, self.recent_messages),
        };
        let (analysis, tokens) = self.analyzer.analyze(&ctx).await;
        self.charge_tokens(tokens).await?;
        self.store
            .append_message(
                &self.session_id,
                Message::system(analysis.to_log_text()).with_kind(MessageKind::FailureAnalysis),
            )
            .await?;
        send_event(
            &self.event_tx,
            AgentEvent::FailureAnalysis {
                tool: decision.tool.clone(),
                root_cause: analysis.root_cause,
            },
        );
        self.store.update_status(&self.session_id, SessionStatus::Thinking).await?;
        Ok(())
    }

    async fn record_deficiency(
        &self,
        session: &Session,
        completion: &Completion,
        notice: String,
    ) -> Result<(), AgentError> {
        if let Completion::Deficient { category, detail } = completion {
            tracing::info!(session = %self.session_id, %category, detail = %detail, "queue empty, output incomplete");
            send_event(
                &self.event_tx,
                AgentEvent::Deficiency {
                    category: category.to_string(),
                    detail: detail.clone(),
                },
            );
        }
        let repeated = session
            .messages
            .last()
            .is_some_and(|m| m.kind == MessageKind::Notice && m.content == notice);
        if !repeated {
            self.store
                .append_message(&self.session_id, Message::system(notice).with_kind(MessageKind::Notice))
                .await?;
        }
        Ok(())
    }

    async fn finish(&self, session: &Session) -> Result<CompletionReport, AgentError> {
        let report = report(session);
        self.store.update_status(&self.session_id, SessionStatus::Completed).await?;
        self.store
            .append_message(
                &self.session_id,
                Message::system(report.summary.clone()).with_kind(MessageKind::Notice),
            )
            .await?;
        tracing::info!(session = %self.session_id, iterations = report.iterations, tokens = report.tokens_used, "generation completed");
        send_event(
            &self.event_tx,
            AgentEvent::Completed {
                summary: report.summary.clone(),
            },
        );
        Ok(report)
    }
}

fn report(session: &Session) -> CompletionReport {
    let output = &session.output;
    let name = output.character_data.name.trim();
    let summary = format!(
        "Character card \"{}\" with worldbook: status, user setting, world view and {} supplement entries. \
         {} iterations, {} tokens, {} tasks completed.",
        if name.is_empty() { "(unnamed)" } else { name },
        output.filled_supplement_count(),
        session.execution.iteration,
        session.execution.tokens_used,
        session.research.completed_tasks.len()
    );
    CompletionReport {
        session_id: session.id.clone(),
        summary,
        iterations: session.execution.iteration,
        tokens_used: session.execution.tokens_used,
        completed_tasks: session.research.completed_tasks.clone(),
        output: output.clone(),
    }
}
