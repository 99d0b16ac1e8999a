//! 完成判定：对生成产物做确定性的结构检查，不调用 LLM
//!
//! 检查顺序即补救顺序：角色卡 → 状态 → 用户设定 → 世界观 → 补充条目（至少 5 条有正文）。

use serde::Serialize;

use crate::core::{GenerationOutput, OutputCategory, WorldbookCategory};

/// 补充条目的最低数量
pub const MIN_SUPPLEMENT_ENTRIES: usize = 5;

const SINGLETONS: [WorldbookCategory; 3] = [
    WorldbookCategory::Status,
    WorldbookCategory::UserSetting,
    WorldbookCategory::WorldView,
];

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Completion {
    Satisfied,
    /// 下一步应补救的分类与说明
    Deficient {
        category: OutputCategory,
        detail: String,
    },
}

impl Completion {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Completion::Satisfied)
    }

    /// 写入会话日志、供下一轮规划参考的提示
    pub fn remediation_notice(&self) -> Option<String> {
        match self {
            Completion::Satisfied => None,
            Completion::Deficient { category, detail } => Some(format!(
                "Output incomplete: {} ({}). Task queue is empty; use REFLECT to plan the remaining work or call the {} tool directly.",
                category,
                detail,
                remediation_tool(*category)
            )),
        }
    }
}

fn remediation_tool(category: OutputCategory) -> &'static str {
    match category {
        OutputCategory::Character => "CHARACTER",
        OutputCategory::Worldbook(WorldbookCategory::Status) => "STATUS",
        OutputCategory::Worldbook(WorldbookCategory::UserSetting) => "USER_SETTING",
        OutputCategory::Worldbook(WorldbookCategory::WorldView) => "WORLD_VIEW",
        OutputCategory::Worldbook(WorldbookCategory::Supplement) => "SUPPLEMENT",
    }
}

/// 结构完整性检查
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionEvaluator;

impl CompletionEvaluator {
    pub fn evaluate(&self, output: &GenerationOutput) -> Completion {
        let missing = output.character_data.missing_fields();
        if !missing.is_empty() {
            return Completion::Deficient {
                category: OutputCategory::Character,
                detail: format!("missing fields: {}", missing.join(", ")),
            };
        }
        for category in SINGLETONS {
            if !output.singleton(category).is_some_and(|e| e.has_content()) {
                return Completion::Deficient {
                    category: OutputCategory::Worldbook(category),
                    detail: format!("no {} entry", category.label()),
                };
            }
        }
        let filled = output.filled_supplement_count();
        if filled < MIN_SUPPLEMENT_ENTRIES {
            return Completion::Deficient {
                category: OutputCategory::Worldbook(WorldbookCategory::Supplement),
                detail: format!(
                    "{} of {} supplement entries, need {} more",
                    filled,
                    MIN_SUPPLEMENT_ENTRIES,
                    MIN_SUPPLEMENT_ENTRIES - filled
                ),
            };
        }
        Completion::Satisfied
    }
}
