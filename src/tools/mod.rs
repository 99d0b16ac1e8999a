//! 工具层：Tool trait、注册表、执行器与内置创作工具

pub mod ask_user;
pub mod character;
pub mod complete;
pub mod executor;
pub mod payload;
pub mod reflect;
pub mod registry;
pub mod schema;
pub mod search;
pub mod worldbook;

use serde_json::{Map, Value};

pub use ask_user::AskUserTool;
pub use character::CharacterTool;
pub use complete::CompleteTool;
pub use executor::ToolExecutor;
pub use payload::{
    AskUserPayload, CharacterPayload, CompletePayload, KnowledgeInput, NewTaskSpec, ReflectPayload,
    SearchPayload, WorldbookPayload,
};
pub use reflect::ReflectTool;
pub use registry::{ExecutionResult, ResolvedTool, Tool, ToolContext, ToolKind, ToolRegistry};
pub use schema::{worldbook_entry_schema_json, ParamType, ParameterSpec, ToolSchema};
pub use search::SearchTool;
pub use worldbook::WorldbookTool;

use crate::config::ToolsSection;
use crate::core::output::{value_list, value_text};
use crate::core::WorldbookCategory;

/// 读取字符串参数：数字与布尔值按文本读取，空串视为缺失
pub fn param_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(value_text)
}

/// 读取字符串列表参数：数组、逗号分隔的字符串或单个标量均可
pub fn param_str_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    params.get(key).map(value_list).unwrap_or_default()
}

/// 构造包含全部内置工具的注册表
pub fn builtin_registry(cfg: &ToolsSection) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register_builtin(
        ToolKind::Search,
        SearchTool::new(
            cfg.search.allowed_domains.clone(),
            cfg.search.timeout_secs,
            cfg.search.max_result_chars,
        ),
    );
    reg.register_builtin(ToolKind::AskUser, AskUserTool);
    reg.register_builtin(ToolKind::Character, CharacterTool);
    for category in [
        WorldbookCategory::Status,
        WorldbookCategory::UserSetting,
        WorldbookCategory::WorldView,
        WorldbookCategory::Supplement,
    ] {
        reg.register_builtin(ToolKind::for_category(category), WorldbookTool::new(category));
    }
    reg.register_builtin(ToolKind::Reflect, ReflectTool);
    reg.register_builtin(ToolKind::Complete, CompleteTool);
    reg
}
