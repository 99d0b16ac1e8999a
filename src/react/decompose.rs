//! 任务分解：会话开始且队列为空时调用一次
//!
//! 请求 LLM 判断是否引用已有作品、创作方向是否清晰，并给出 5–8 个有序任务（每个 2–5 个子问题）。
//! 各字段独立解析，缺失时使用确定的占位文本；整体无法解析时返回空队列，留给后续 REFLECT 补充。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::core::{DirectionClarity, PlanningInsight, Task};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::parser::closed_block;
use crate::react::planner::metered_complete;

/// 期望的任务数下限；不足时照常接受，只记录告警
pub const MIN_TASKS: usize = 5;
pub const MAX_TASKS: usize = 8;
pub const MAX_SUB_PROBLEMS: usize = 5;

const CLARIFY_KEYWORDS: [&str; 7] = ["ask", "clarify", "confirm", "询问", "确认", "澄清", "偏好"];
const RESEARCH_KEYWORDS: [&str; 8] = [
    "search", "research", "reference", "搜索", "资料", "查阅", "调研", "检索",
];

const DECOMPOSE_PROMPT: &str = "You plan the creation of a roleplay character card plus worldbook \
(status, user setting, world view, at least 5 supplement entries) for the objective given by the user.

1. Decide whether the objective references existing fictional material (a novel, game, anime, film...).
2. Assess how clear the creative direction is: clear, partial or unclear.
3. Produce 5-8 ordered tasks, each with 2-5 ordered sub-problems. Build the character before the worldbook.
   At least one sub-problem must ask the user to clarify the direction and at least one must search reference material.

Reply in exactly this format:
<decomposition>
  <existing_work><references>true|false</references><name>work name or none</name></existing_work>
  <creative_direction><clarity>clear|partial|unclear</clarity><notes>...</notes></creative_direction>
  <tasks>
    <task>
      <description>...</description>
      <reasoning>...</reasoning>
      <sub_problems><sub_problem>...</sub_problem></sub_problems>
    </task>
  </tasks>
</decomposition>";

fn task_re() -> &'static Option<Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<task\s*>(.*?)</task\s*>").ok())
}

fn sub_problem_re() -> &'static Option<Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<sub_problem\s*>(.*?)</sub_problem\s*>").ok())
}

/// 分解结果
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub tasks: Vec<Task>,
    pub insight: Option<PlanningInsight>,
    pub tokens: u64,
}

/// 解析出的任务（尚未分配 ID）
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub description: String,
    pub reasoning: String,
    pub sub_problems: Vec<String>,
}

pub struct TaskDecomposer {
    llm: Arc<dyn LlmClient>,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 分解主目标；任何失败都返回空任务列表
    pub async fn decompose(&self, objective: &str) -> Decomposition {
        let messages = vec![
            Message::system(DECOMPOSE_PROMPT),
            Message::user(format!("Objective: {}", objective)),
        ];
        let reply = metered_complete(self.llm.as_ref(), &messages).await;
        let text = match reply.text {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "decomposition call failed, starting with empty queue");
                return Decomposition {
                    tasks: Vec::new(),
                    insight: None,
                    tokens: reply.tokens,
                };
            }
        };
        let Some((mut planned, insight)) = parse_decomposition(&text) else {
            tracing::warn!("decomposition output unparseable, starting with empty queue");
            return Decomposition {
                tasks: Vec::new(),
                insight: None,
                tokens: reply.tokens,
            };
        };
        if planned.len() < MIN_TASKS {
            tracing::warn!(tasks = planned.len(), min = MIN_TASKS, "decomposition returned fewer tasks than requested");
        }
        ensure_coverage(&mut planned, &insight);
        let tasks: Vec<Task> = planned
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let subs = t.sub_problems.into_iter().map(|s| (s, String::new())).collect();
                Task::new(i, t.description, t.reasoning, subs)
            })
            .collect();
        tracing::info!(tasks = tasks.len(), clarity = ?insight.direction_clarity, "objective decomposed");
        Decomposition {
            tasks,
            insight: Some(insight),
            tokens: reply.tokens,
        }
    }
}

fn parse_flag(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    matches!(lower.as_str(), "true" | "yes" | "y" | "是" | "有")
}

fn parse_clarity(text: &str) -> DirectionClarity {
    let lower = text.trim().to_lowercase();
    if lower.contains("unclear") || lower.contains("不清") || lower.contains("模糊") {
        DirectionClarity::Unclear
    } else if lower.contains("partial") || lower.contains("部分") {
        DirectionClarity::Partial
    } else if lower.contains("clear") || lower.contains("清晰") || lower.contains("明确") {
        DirectionClarity::Clear
    } else {
        DirectionClarity::Partial
    }
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .map(String::from)
}

/// 解析分解输出；一个任务都没有时返回 None
pub fn parse_decomposition(text: &str) -> Option<(Vec<PlannedTask>, PlanningInsight)> {
    let root = closed_block(text, "decomposition").unwrap_or(text);

    let existing = closed_block(root, "existing_work").unwrap_or("");
    let existing_work_name = non_empty(closed_block(existing, "name"));
    let references_existing_work = closed_block(existing, "references")
        .map(parse_flag)
        .unwrap_or(existing_work_name.is_some());
    let direction = closed_block(root, "creative_direction").unwrap_or("");
    let insight = PlanningInsight {
        references_existing_work,
        existing_work_name,
        direction_clarity: closed_block(direction, "clarity")
            .map(parse_clarity)
            .unwrap_or(DirectionClarity::Partial),
        notes: non_empty(closed_block(direction, "notes")).unwrap_or_default(),
    };

    let (Some(task_re), Some(sub_re)) = (task_re(), sub_problem_re()) else {
        return None;
    };
    let tasks: Vec<PlannedTask> = task_re
        .captures_iter(root)
        .filter_map(|c| c.get(1))
        .take(MAX_TASKS)
        .enumerate()
        .map(|(i, m)| {
            let body = m.as_str();
            let description =
                non_empty(closed_block(body, "description")).unwrap_or_else(|| format!("Task {}", i + 1));
            let reasoning = non_empty(closed_block(body, "reasoning")).unwrap_or_default();
            let mut sub_problems: Vec<String> = sub_re
                .captures_iter(body)
                .filter_map(|c| c.get(1))
                .map(|s| s.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
                .take(MAX_SUB_PROBLEMS)
                .collect();
            if sub_problems.is_empty() {
                sub_problems.push(format!("Work through: {}", description));
            }
            PlannedTask {
                description,
                reasoning,
                sub_problems,
            }
        })
        .collect();

    if tasks.is_empty() {
        return None;
    }
    Some((tasks, insight))
}

/// 英文关键词按词首匹配（避免 "task" 命中 "ask"），中文关键词按子串匹配
fn mentions_keyword(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| {
        if k.is_ascii() {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word.starts_with(k))
        } else {
            lower.contains(k)
        }
    })
}

fn mentions(tasks: &[PlannedTask], keywords: &[&str]) -> bool {
    tasks
        .iter()
        .flat_map(|t| t.sub_problems.iter())
        .any(|s| mentions_keyword(s, keywords))
}

fn insert_capped(subs: &mut Vec<String>, index: usize, item: String) {
    if subs.len() >= MAX_SUB_PROBLEMS {
        subs.pop();
    }
    let index = index.min(subs.len());
    subs.insert(index, item);
}

/// 保证至少一个澄清类子问题和一个检索类子问题，缺少时注入到第一个任务
pub fn ensure_coverage(tasks: &mut [PlannedTask], insight: &PlanningInsight) {
    let needs_clarify = !mentions(tasks, &CLARIFY_KEYWORDS);
    let needs_research = !mentions(tasks, &RESEARCH_KEYWORDS);
    let Some(first) = tasks.first_mut() else {
        return;
    };
    if needs_clarify {
        insert_capped(
            &mut first.sub_problems,
            0,
            "Ask the user to confirm the creative direction (genre, tone, relationship to the user)".to_string(),
        );
    }
    if needs_research {
        let item = match &insight.existing_work_name {
            Some(name) if insight.references_existing_work => {
                format!("Search reference material about {}", name)
            }
            _ => "Search reference material for the setting and genre".to_string(),
        };
        let index = if needs_clarify { 1 } else { 0 };
        insert_capped(&mut first.sub_problems, index, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn task_xml(desc: &str, subs: &[&str]) -> String {
        let subs: String = subs
            .iter()
            .map(|s| format!("<sub_problem>{}</sub_problem>", s))
            .collect();
        format!(
            "<task><description>{}</description><reasoning>r</reasoning><sub_problems>{}</sub_problems></task>",
            desc, subs
        )
    }

    #[test]
    fn test_missing_fields_get_fallback_labels() {
        let text = "<decomposition><tasks><task><reasoning>x</reasoning></task>\
                    <task><description>写世界观</description><sub_problems></sub_problems></task></tasks></decomposition>";
        let (tasks, insight) = parse_decomposition(text).unwrap();
        assert_eq!(tasks[0].description, "Task 1");
        assert_eq!(tasks[1].sub_problems, vec!["Work through: 写世界观"]);
        assert!(!insight.references_existing_work);
        assert_eq!(insight.direction_clarity, DirectionClarity::Partial);
    }

    #[test]
    fn test_no_tasks_is_none() {
        assert!(parse_decomposition("I cannot help with that.").is_none());
    }

    #[test]
    fn test_caps_tasks_and_sub_problems() {
        let subs = ["a", "b", "c", "d", "e", "f", "g"];
        let body: String = (0..10).map(|i| task_xml(&format!("t{i}"), &subs)).collect();
        let (tasks, _) = parse_decomposition(&format!("<tasks>{}</tasks>", body)).unwrap();
        assert_eq!(tasks.len(), MAX_TASKS);
        assert!(tasks.iter().all(|t| t.sub_problems.len() == MAX_SUB_PROBLEMS));
    }

    #[test]
    fn test_coverage_injected_into_full_first_task() {
        let mut tasks = vec![PlannedTask {
            description: "塑造主角".into(),
            reasoning: String::new(),
            sub_problems: (0..5).map(|i| format!("写设定{i}")).collect(),
        }];
        let insight = PlanningInsight {
            references_existing_work: true,
            existing_work_name: Some("银翼杀手".into()),
            direction_clarity: DirectionClarity::Clear,
            notes: String::new(),
        };
        ensure_coverage(&mut tasks, &insight);
        let subs = &tasks[0].sub_problems;
        assert_eq!(subs.len(), MAX_SUB_PROBLEMS);
        assert!(subs[0].starts_with("Ask the user"));
        assert_eq!(subs[1], "Search reference material about 银翼杀手");
    }

    #[test]
    fn test_keyword_matching_respects_word_starts() {
        assert!(!mentions_keyword("Review the task list", &CLARIFY_KEYWORDS));
        assert!(mentions_keyword("Asking the user about tone", &CLARIFY_KEYWORDS));
        assert!(mentions_keyword("检索原作资料", &RESEARCH_KEYWORDS));
    }

    #[tokio::test]
    async fn test_llm_failure_leaves_empty_queue() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).push_error("offline"));
        let d = TaskDecomposer::new(llm).decompose("a sci-fi detective story").await;
        assert!(d.tasks.is_empty());
        assert!(d.insight.is_none());
    }

    #[tokio::test]
    async fn test_short_decomposition_is_kept() {
        let reply = "<tasks><task><description>塑造主角</description>\
            <sub_problems><sub_problem>确认基调</sub_problem><sub_problem>查阅资料</sub_problem></sub_problems></task>\
            <task><description>构建世界观</description></task></tasks>";
        let llm = Arc::new(ScriptedLlmClient::new([reply]));
        let d = TaskDecomposer::new(llm).decompose("a sci-fi detective story").await;
        assert!(d.tasks.len() < MIN_TASKS);
        assert_eq!(d.tasks.len(), 2);
        assert_eq!(d.tasks[1].sub_problems[0].description, "Work through: 构建世界观");
    }
}
