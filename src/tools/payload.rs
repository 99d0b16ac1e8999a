//! 内置工具载荷格式
//!
//! 这是工具与执行循环之间的约定：外部实现的同类工具只要返回同样结构的 payload，
//! 就能得到相同的副作用（合并资料、进入等待、覆盖世界书分类、追加任务、清空队列）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{KnowledgeEntry, Task, WorldbookEntry};

/// SEARCH 返回的资料
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    pub entries: Vec<KnowledgeInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeInput {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl SearchPayload {
    pub fn into_entries(self) -> Vec<KnowledgeEntry> {
        self.entries
            .into_iter()
            .filter(|e| !e.content.trim().is_empty())
            .map(|e| {
                let mut entry = KnowledgeEntry::new(e.source, e.title, e.content);
                entry.url = e.url;
                entry
            })
            .collect()
    }
}

/// ASK_USER 返回的问题
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskUserPayload {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// CHARACTER 返回的字段（部分字段即可）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterPayload {
    #[serde(default)]
    pub character_data: Value,
}

/// 世界书类工具返回的条目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldbookPayload {
    #[serde(default)]
    pub entries: Vec<WorldbookEntry>,
}

/// REFLECT 提出的新任务
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectPayload {
    #[serde(default)]
    pub new_tasks: Vec<NewTaskSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTaskSpec {
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub sub_problems: Vec<String>,
}

impl ReflectPayload {
    /// 转为任务；position_offset 用于生成队列内唯一 ID
    pub fn into_tasks(self, position_offset: usize) -> Vec<Task> {
        self.new_tasks
            .into_iter()
            .filter(|t| !t.description.trim().is_empty())
            .enumerate()
            .map(|(i, t)| {
                let subs = t
                    .sub_problems
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(|s| (s, String::new()))
                    .collect();
                Task::new(position_offset + i, t.description.trim(), t.reasoning, subs)
            })
            .collect()
    }
}

/// COMPLETE 的收尾信号
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletePayload {
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reflect_payload_skips_blank_tasks() {
        let payload: ReflectPayload = serde_json::from_value(json!({
            "new_tasks": [
                {"description": "补充地标条目", "sub_problems": ["列出三个地标", " "]},
                {"description": "  "}
            ]
        }))
        .unwrap();
        let tasks = payload.into_tasks(10);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].sub_problems.len(), 1);
        assert!(tasks[0].id.ends_with("_10"));
    }

    #[test]
    fn test_search_payload_drops_empty_content() {
        let payload: SearchPayload = serde_json::from_value(json!({
            "entries": [{"title": "a", "content": ""}, {"title": "b", "content": "text", "url": "https://x"}]
        }))
        .unwrap();
        let entries = payload.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url.as_deref(), Some("https://x"));
    }
}
