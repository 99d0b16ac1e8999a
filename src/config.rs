//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `QUILL__*` 覆盖（双下划线表示嵌套，如 `QUILL__AGENT__MAX_ITERATIONS=60`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、会话状态目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话 JSON 文件目录
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("workspace/sessions")
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmModelSection,
    #[serde(default)]
    pub openai: LlmModelSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// [agent] 段：执行循环的硬上限与节奏
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单个会话的最大迭代次数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// 单个会话的累计 token 上限
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    /// 两次迭代之间的固定间隔（毫秒）
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    /// 拼入 prompt 的最近消息条数
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
    /// 拼入 prompt 的最近资料条数
    #[serde(default = "default_recent_knowledge")]
    pub recent_knowledge: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            pacing_delay_ms: default_pacing_delay_ms(),
            recent_messages: default_recent_messages(),
            recent_knowledge: default_recent_knowledge(),
        }
    }
}

fn default_max_iterations() -> u32 {
    40
}

fn default_token_budget() -> u64 {
    200_000
}

fn default_pacing_delay_ms() -> u64 {
    500
}

fn default_recent_messages() -> usize {
    12
}

fn default_recent_knowledge() -> usize {
    8
}

/// [tools] 段：工具超时、Search 域名
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），0 表示不限制
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.search] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    6000
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        // 百科
        "en.wikipedia.org".into(),
        "zh.wikipedia.org".into(),
        "ja.wikipedia.org".into(),
        "baike.baidu.com".into(),
        // 作品资料 / 同人设定
        "fandom.com".into(),
        "www.fandom.com".into(),
        "moegirl.org.cn".into(),
        "zh.moegirl.org.cn".into(),
        "bangumi.tv".into(),
        "bgm.tv".into(),
        "www.douban.com".into(),
        "book.douban.com".into(),
        "movie.douban.com".into(),
        "www.zhihu.com".into(),
        "tvtropes.org".into(),
    ]
}

/// 从 config 目录加载配置，环境变量 QUILL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 QUILL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QUILL")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 40);
        assert_eq!(cfg.agent.token_budget, 200_000);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert!(cfg.tools.search.allowed_domains.iter().any(|d| d == "zh.wikipedia.org"));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quill.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 7\npacing_delay_ms = 0\n\n[llm]\nprovider = \"mock\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 7);
        assert_eq!(cfg.agent.pacing_delay_ms, 0);
        assert_eq!(cfg.agent.token_budget, 200_000);
        assert_eq!(cfg.llm.provider, "mock");
    }
}
