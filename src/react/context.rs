//! 上下文快照：每轮迭代从会话派生的摘要，拼成规划器 prompt 的各个段落

use crate::core::{CharacterData, GenerationOutput, ResearchState, Session, WorldbookEntry};
use crate::memory::{recent_messages, truncate_chars, Message, MessageKind, Role};

const KNOWLEDGE_PREVIEW_CHARS: usize = 300;
const ENTRY_PREVIEW_CHARS: usize = 120;
const MESSAGE_PREVIEW_CHARS: usize = 400;
/// 任务队列摘要中列出的后续任务数
const UPCOMING_TASKS: usize = 5;

/// 单轮迭代的上下文快照
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub main_objective: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub tokens_used: u64,
    pub token_budget: u64,
    pub active_task: Option<String>,
    pub active_sub_problem: Option<String>,
    pub queue_section: String,
    pub knowledge_section: String,
    pub output_section: String,
    pub conversation_section: String,
}

impl ContextSnapshot {
    /// recent / knowledge：拼入的最近消息数与最近资料数
    pub fn capture(session: &Session, recent: usize, knowledge: usize) -> Self {
        let research = &session.research;
        Self {
            session_id: session.id.clone(),
            main_objective: research.main_objective().to_string(),
            iteration: session.execution.iteration,
            max_iterations: session.execution.max_iterations,
            tokens_used: session.execution.tokens_used,
            token_budget: session.execution.token_budget,
            active_task: research.active_task().map(|t| t.description.clone()),
            active_sub_problem: research.active_sub_problem().map(|s| s.description.clone()),
            queue_section: queue_section(research),
            knowledge_section: knowledge_section(research, knowledge),
            output_section: output_section(&session.output),
            conversation_section: conversation_section(recent_messages(&session.messages, recent)),
        }
    }

    /// 渲染为规划器的用户消息
    pub fn render(&self) -> String {
        let mut s = format!("## Objective\n{}\n", self.main_objective);
        s.push_str(&format!(
            "\n## Progress\nIteration {}/{}, tokens {}/{}\n",
            self.iteration, self.max_iterations, self.tokens_used, self.token_budget
        ));
        s.push_str(&format!(
            "\n## Current focus\nTask: {}\nSub-problem: {}\n",
            self.active_task.as_deref().unwrap_or("(queue empty)"),
            self.active_sub_problem.as_deref().unwrap_or("(none)")
        ));
        s.push_str(&format!("\n## Task queue\n{}\n", self.queue_section));
        s.push_str(&format!("\n## Generated so far\n{}\n", self.output_section));
        if !self.knowledge_section.is_empty() {
            s.push_str(&format!("\n## Reference material\n{}\n", self.knowledge_section));
        }
        if !self.conversation_section.is_empty() {
            s.push_str(&format!("\n## Recent log\n{}\n", self.conversation_section));
        }
        s
    }
}

pub fn queue_section(research: &ResearchState) -> String {
    let mut s = String::new();
    if let Some(insight) = &research.insight {
        s.push_str(&format!(
            "Direction: {:?}; existing work: {}\n",
            insight.direction_clarity,
            match (&insight.existing_work_name, insight.references_existing_work) {
                (Some(name), true) => name.as_str(),
                (None, true) => "yes",
                _ => "none",
            }
        ));
    }
    match research.active_task() {
        None => s.push_str("(empty)\n"),
        Some(task) => {
            s.push_str(&format!("* ACTIVE {}\n", task.description));
            for (i, sub) in task.sub_problems.iter().enumerate() {
                let marker = if i == 0 { "->" } else { "  " };
                s.push_str(&format!("  {} {}\n", marker, sub.description));
            }
            for task in research.task_queue.iter().skip(1).take(UPCOMING_TASKS) {
                s.push_str(&format!("- {} ({} sub-problems)\n", task.description, task.sub_problems.len()));
            }
            let rest = research.task_queue.len().saturating_sub(UPCOMING_TASKS + 1);
            if rest > 0 {
                s.push_str(&format!("- ... {} more\n", rest));
            }
        }
    }
    if !research.completed_tasks.is_empty() {
        s.push_str(&format!("Completed: {}\n", research.completed_tasks.join("; ")));
    }
    s.trim_end().to_string()
}

/// 只列出最近 limit 条资料，更早的只给出条数
pub fn knowledge_section(research: &ResearchState, limit: usize) -> String {
    let all = &research.knowledge_base;
    let skipped = all.len().saturating_sub(limit);
    let mut lines: Vec<String> = all[skipped..]
        .iter()
        .map(|k| {
            format!(
                "- [{}] {}: {}",
                k.source,
                k.title,
                truncate_chars(k.content.trim(), KNOWLEDGE_PREVIEW_CHARS)
            )
        })
        .collect();
    if skipped > 0 {
        lines.insert(0, format!("({} earlier entries omitted)", skipped));
    }
    lines.join("\n")
}

fn character_summary(data: &CharacterData) -> String {
    let missing = data.missing_fields();
    let name = if data.name.trim().is_empty() {
        "(unnamed)"
    } else {
        data.name.as_str()
    };
    if missing.is_empty() {
        format!("Character {}: all fields filled", name)
    } else {
        format!("Character {}: missing {}", name, missing.join(", "))
    }
}

fn entry_line(label: &str, entry: Option<&WorldbookEntry>) -> String {
    match entry.filter(|e| e.has_content()) {
        Some(e) => format!(
            "{}: [{}] {}",
            label,
            e.keys.join(", "),
            truncate_chars(e.content.trim(), ENTRY_PREVIEW_CHARS)
        ),
        None => format!("{}: (empty)", label),
    }
}

pub fn output_section(output: &GenerationOutput) -> String {
    let mut lines = vec![
        character_summary(&output.character_data),
        entry_line("Status", output.status_data.as_ref()),
        entry_line("User setting", output.user_setting_data.as_ref()),
        entry_line("World view", output.world_view_data.as_ref()),
        format!("Supplement: {} entries", output.filled_supplement_count()),
    ];
    for e in output.supplement_data.iter().filter(|e| e.has_content()) {
        lines.push(format!("  - {} [{}]", e.comment, e.keys.join(", ")));
    }
    lines.join("\n")
}

pub fn conversation_section(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match (&m.role, m.kind) {
                (_, MessageKind::FailureAnalysis) => "failure",
                (_, MessageKind::ToolResult) => "tool",
                (_, MessageKind::UserPrompt) => "question",
                (_, MessageKind::UserAnswer) => "user",
                (_, MessageKind::Notice) => "notice",
                (Role::User, _) => "user",
                (Role::Assistant, _) => "planner",
                (Role::System, _) => "system",
            };
            format!("[{}] {}", who, truncate_chars(m.content.trim(), MESSAGE_PREVIEW_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
