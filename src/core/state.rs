//! 会话状态：Session / ResearchState / 任务队列
//!
//! 持久化协作方拥有这些数据；执行循环每轮只持有一份快照。
//! 队列变更（完成子问题、改写活动任务、追加、清空）以纯函数方法定义在这里，
//! 由各 SessionStore 实现在同一把锁 / 同一次写盘中调用，保证出队与持久化原子。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::output::GenerationOutput;
use crate::memory::Message;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Idle,
    Thinking,
    Executing,
    WaitingUser,
    Completed,
    Failed,
}

impl SessionStatus {
    /// 可以通过 continue_execution 恢复的状态
    pub fn is_resumable(&self) -> bool {
        matches!(self, SessionStatus::WaitingUser | SessionStatus::Thinking)
    }
}

/// 执行计数与硬上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub iteration: u32,
    pub max_iterations: u32,
    pub token_budget: u64,
    pub tokens_used: u64,
}

impl ExecutionInfo {
    pub fn new(max_iterations: u32, token_budget: u64) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            token_budget,
            tokens_used: 0,
        }
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn tokens_exhausted(&self) -> bool {
        self.tokens_used >= self.token_budget
    }
}

/// 子问题：任务内按 FIFO 完成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProblem {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
}

/// 任务：队首为活动任务，其 sub_problems[0] 为活动子问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub sub_problems: VecDeque<SubProblem>,
}

impl Task {
    /// 生成任务：ID 采用 `task_<毫秒时间戳>_<位置>`，子问题 ID 为 `<任务ID>_sub_<位置>`
    pub fn new(
        position: usize,
        description: impl Into<String>,
        reasoning: impl Into<String>,
        sub_problems: Vec<(String, String)>,
    ) -> Self {
        let id = format!("task_{}_{}", Utc::now().timestamp_millis(), position);
        let sub_problems = sub_problems
            .into_iter()
            .enumerate()
            .map(|(i, (description, reasoning))| SubProblem {
                id: format!("{}_sub_{}", id, i),
                description,
                reasoning,
            })
            .collect();
        Self {
            id,
            description: description.into(),
            reasoning: reasoning.into(),
            sub_problems,
        }
    }

    pub fn active_sub_problem(&self) -> Option<&SubProblem> {
        self.sub_problems.front()
    }
}

/// 外部资料条目（搜索工具结果合并而来）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(source: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("kb_{}", uuid::Uuid::new_v4()),
            source: source.into(),
            title: title.into(),
            content: content.into(),
            url: None,
            created_at: Utc::now(),
        }
    }
}

/// 创作方向清晰度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionClarity {
    Clear,
    Partial,
    Unclear,
}

/// 任务分解时得到的判断：是否引用已有作品、创作方向是否清晰
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningInsight {
    pub references_existing_work: bool,
    #[serde(default)]
    pub existing_work_name: Option<String>,
    pub direction_clarity: DirectionClarity,
    #[serde(default)]
    pub notes: String,
}

/// 子问题完成的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubProblemCompletion {
    pub sub_problem: Option<SubProblem>,
    /// 子问题耗尽后出队的任务
    pub finished_task: Option<Task>,
}

/// 研究状态：主目标不可变，其余随执行推进
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    main_objective: String,
    #[serde(default)]
    pub task_queue: VecDeque<Task>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub knowledge_base: Vec<KnowledgeEntry>,
    #[serde(default)]
    pub insight: Option<PlanningInsight>,
}

impl ResearchState {
    pub fn new(main_objective: impl Into<String>) -> Self {
        Self {
            main_objective: main_objective.into(),
            task_queue: VecDeque::new(),
            completed_tasks: Vec::new(),
            knowledge_base: Vec::new(),
            insight: None,
        }
    }

    pub fn main_objective(&self) -> &str {
        &self.main_objective
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.task_queue.front()
    }

    pub fn active_sub_problem(&self) -> Option<&SubProblem> {
        self.active_task().and_then(Task::active_sub_problem)
    }

    pub fn append_tasks(&mut self, tasks: Vec<Task>) {
        self.task_queue.extend(tasks);
    }

    pub fn clear_tasks(&mut self) {
        self.task_queue.clear();
    }

    /// 完成活动子问题；活动任务的子问题耗尽时整个任务出队并记入 completed_tasks。
    /// 没有子问题的活动任务直接视为完成。
    pub fn complete_active_sub_problem(&mut self) -> SubProblemCompletion {
        let mut completion = SubProblemCompletion::default();
        let Some(task) = self.task_queue.front_mut() else {
            return completion;
        };
        completion.sub_problem = task.sub_problems.pop_front();
        if task.sub_problems.is_empty() {
            if let Some(done) = self.task_queue.pop_front() {
                self.completed_tasks.push(done.description.clone());
                completion.finished_task = Some(done);
            }
        }
        completion
    }

    /// 改写活动任务。子问题列表只能替换为不多于原数量的新列表。
    /// 返回是否有改动。
    pub fn rewrite_active_task(
        &mut self,
        description: Option<String>,
        sub_problems: Option<Vec<SubProblem>>,
    ) -> bool {
        let Some(task) = self.task_queue.front_mut() else {
            return false;
        };
        let mut changed = false;
        if let Some(desc) = description {
            let desc = desc.trim().to_string();
            if !desc.is_empty() && desc != task.description {
                task.description = desc;
                changed = true;
            }
        }
        if let Some(mut subs) = sub_problems {
            subs.truncate(task.sub_problems.len());
            if !subs.is_empty() {
                task.sub_problems = subs.into();
                changed = true;
            }
        }
        changed
    }

    /// 合并资料条目，正文完全相同的条目跳过；返回新增数量
    pub fn merge_knowledge(&mut self, entries: Vec<KnowledgeEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if entry.content.trim().is_empty() {
                continue;
            }
            if self.knowledge_base.iter().any(|e| e.content == entry.content) {
                continue;
            }
            self.knowledge_base.push(entry);
            added += 1;
        }
        added
    }
}

/// 一次端到端生成运行的全部可变状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub research: ResearchState,
    #[serde(default)]
    pub output: GenerationOutput,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub execution: ExecutionInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(objective: impl Into<String>, max_iterations: u32, token_budget: u64) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            status: SessionStatus::Idle,
            research: ResearchState::new(objective),
            output: GenerationOutput::default(),
            messages: Vec::new(),
            execution: ExecutionInfo::new(max_iterations, token_budget),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
