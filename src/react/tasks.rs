//! 任务队列管理：把决策附带的任务调整落到活动任务上
//!
//! 调整在每次决策后、工具执行前强制应用。新子问题列表的上界是 min(3, 原子问题数)，
//! 所以调整只会让活动任务的子问题变少或不变。

use chrono::Utc;

use crate::core::{ResearchState, SubProblem, Task};
use crate::react::parser::{TaskAdjustment, MAX_ADJUSTED_SUB_PROBLEMS};

/// 对活动任务的一次改写
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRewrite {
    pub description: Option<String>,
    pub sub_problems: Option<Vec<SubProblem>>,
}

/// 改写后子问题数量上界
pub fn sub_problem_bound(current: usize) -> usize {
    current.min(MAX_ADJUSTED_SUB_PROBLEMS)
}

/// 计算调整对活动任务的改写；没有实际改动时返回 None
pub fn plan_rewrite(task: &Task, adjustment: &TaskAdjustment) -> Option<TaskRewrite> {
    let description = adjustment
        .new_task_description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty() && *d != task.description)
        .map(String::from);

    let bound = sub_problem_bound(task.sub_problems.len());
    let stamp = Utc::now().timestamp_millis();
    let sub_problems = adjustment
        .new_sub_problems
        .as_ref()
        .map(|subs| {
            subs.iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .take(bound)
                .enumerate()
                .map(|(i, s)| SubProblem {
                    id: format!("{}_sub_{}_{}", task.id, stamp, i),
                    description: s.to_string(),
                    reasoning: adjustment.reasoning.clone(),
                })
                .collect::<Vec<_>>()
        })
        .filter(|subs| !subs.is_empty());

    if description.is_none() && sub_problems.is_none() {
        return None;
    }
    Some(TaskRewrite {
        description,
        sub_problems,
    })
}

/// REFLECT 生成新任务时用的位置偏移，保证 ID 在会话内不重复
pub fn next_task_position(research: &ResearchState) -> usize {
    research.task_queue.len() + research.completed_tasks.len()
}
