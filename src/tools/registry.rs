//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute）。
//! 注册表由两部分组成：按 ToolKind 枚举注册的内置能力，以及按名字动态添加的扩展能力，
//! 查找时两者合并（枚举优先）。注册表在进程启动时显式构造一次，以引用传给执行循环。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::WorldbookCategory;
use crate::tools::schema::{ParameterSpec, ToolSchema};

/// 内置工具种类：决定执行成功后的副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolKind {
    /// 外部资料检索 → 合并进 knowledge_base
    Search,
    /// 向用户澄清 → WAITING_USER
    AskUser,
    /// 角色卡字段 → 增量合并
    Character,
    /// 世界书：状态
    Status,
    /// 世界书：用户设定
    UserSetting,
    /// 世界书：世界观
    WorldView,
    /// 世界书：补充条目
    Supplement,
    /// 反思 → 追加新任务
    Reflect,
    /// 收尾 → 清空任务队列
    Complete,
}

impl ToolKind {
    pub const ALL: [ToolKind; 9] = [
        ToolKind::Search,
        ToolKind::AskUser,
        ToolKind::Character,
        ToolKind::Status,
        ToolKind::UserSetting,
        ToolKind::WorldView,
        ToolKind::Supplement,
        ToolKind::Reflect,
        ToolKind::Complete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Search => "SEARCH",
            ToolKind::AskUser => "ASK_USER",
            ToolKind::Character => "CHARACTER",
            ToolKind::Status => "STATUS",
            ToolKind::UserSetting => "USER_SETTING",
            ToolKind::WorldView => "WORLD_VIEW",
            ToolKind::Supplement => "SUPPLEMENT",
            ToolKind::Reflect => "REFLECT",
            ToolKind::Complete => "COMPLETE",
        }
    }

    /// 大小写不敏感，`-` 与空格视同 `_`
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|k| k.name() == normalized)
    }

    pub fn worldbook_category(&self) -> Option<WorldbookCategory> {
        match self {
            ToolKind::Status => Some(WorldbookCategory::Status),
            ToolKind::UserSetting => Some(WorldbookCategory::UserSetting),
            ToolKind::WorldView => Some(WorldbookCategory::WorldView),
            ToolKind::Supplement => Some(WorldbookCategory::Supplement),
            _ => None,
        }
    }

    pub fn for_category(category: WorldbookCategory) -> Self {
        match category {
            WorldbookCategory::Status => ToolKind::Status,
            WorldbookCategory::UserSetting => ToolKind::UserSetting,
            WorldbookCategory::WorldView => ToolKind::WorldView,
            WorldbookCategory::Supplement => ToolKind::Supplement,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 工具执行时可见的会话上下文
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub main_objective: String,
    pub active_task: Option<String>,
    pub active_sub_problem: Option<String>,
}

/// 工具执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（规划器 `<action>` 中使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数声明，默认无参数
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// 执行工具
    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// 查找结果：内置工具带 ToolKind
#[derive(Clone)]
pub struct ResolvedTool {
    pub kind: Option<ToolKind>,
    pub tool: Arc<dyn Tool>,
}

/// 工具注册表：内置枚举表 + 动态名字表
#[derive(Default)]
pub struct ToolRegistry {
    builtin: HashMap<ToolKind, Arc<dyn Tool>>,
    dynamic: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置工具（同一 kind 重复注册时覆盖）
    pub fn register_builtin(&mut self, kind: ToolKind, tool: impl Tool + 'static) {
        self.builtin.insert(kind, Arc::new(tool));
    }

    /// 动态注册扩展工具；与内置工具同名时查找仍以内置为准
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if ToolKind::parse(&name).is_some_and(|k| self.builtin.contains_key(&k)) {
            tracing::warn!(tool = %name, "dynamic tool shadowed by builtin");
        }
        self.dynamic.insert(name, Arc::new(tool));
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedTool> {
        if let Some(kind) = ToolKind::parse(name) {
            if let Some(tool) = self.builtin.get(&kind) {
                return Some(ResolvedTool {
                    kind: Some(kind),
                    tool: tool.clone(),
                });
            }
        }
        self.dynamic.get(name.trim()).map(|tool| ResolvedTool {
            kind: None,
            tool: tool.clone(),
        })
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.resolve(name).and_then(|r| r.kind)
    }

    pub fn schema_for(&self, name: &str) -> Option<ToolSchema> {
        self.resolve(name).map(|r| {
            let mut schema = r.tool.schema();
            if let Some(kind) = r.kind {
                schema.name = kind.name().to_string();
            }
            schema
        })
    }

    /// 全部工具 schema：内置按枚举顺序，动态按名字排序
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut out: Vec<ToolSchema> = ToolKind::ALL
            .iter()
            .filter_map(|k| {
                self.builtin.get(k).map(|t| {
                    let mut s = t.schema();
                    s.name = k.name().to_string();
                    s
                })
            })
            .collect();
        let mut names: Vec<&String> = self.dynamic.keys().collect();
        names.sort();
        for name in names {
            if ToolKind::parse(name).is_some_and(|k| self.builtin.contains_key(&k)) {
                continue;
            }
            if let Some(t) = self.dynamic.get(name) {
                out.push(t.schema());
            }
        }
        out
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.schemas().into_iter().map(|s| s.name).collect()
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.schemas()).unwrap_or_else(|_| "[]".to_string())
    }

    /// 执行工具：未知工具或缺少必填参数直接返回失败结果
    pub async fn execute(
        &self,
        name: &str,
        params: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> ExecutionResult {
        let Some(resolved) = self.resolve(name) else {
            return ExecutionResult::failure(format!("Unknown tool: {}", name));
        };
        let missing: Vec<String> = resolved
            .tool
            .parameters()
            .into_iter()
            .filter(|p| p.required)
            .filter(|p| params.get(&p.name).map_or(true, Value::is_null))
            .map(|p| p.name)
            .collect();
        if !missing.is_empty() {
            return ExecutionResult::failure(format!(
                "Missing required parameter(s): {}",
                missing.join(", ")
            ));
        }
        resolved.tool.execute(ctx, params).await
    }
}
