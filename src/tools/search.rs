//! SEARCH 工具：抓取参考资料页面，域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名（百科、作品资料站等）；GET 请求带超时与 User-Agent；
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。
//! 对 HTML 响应使用 html2text 提取可读文本，去除标签与脚本。

use std::collections::HashSet;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamType, ParameterSpec};
use crate::tools::{param_str, ExecutionResult, Tool, ToolContext};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Search 工具：抓取 URL 内容，仅允许白名单域名
pub struct SearchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20
            && s.contains('<')
            && (s.contains("</") || s.contains("<meta") || s.contains("<head")))
}

/// 从 URL 中提取 host（不含端口与路径）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    Some(host.to_lowercase())
}

impl SearchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains.into_iter().map(|s| s.to_lowercase()).collect();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    fn check_allowed(&self, url: &str) -> Result<String, String> {
        let domain = extract_domain(url).ok_or_else(|| "Invalid or missing URL".to_string())?;
        if self.allowed_domains.contains(&domain) {
            Ok(domain)
        } else {
            Err(format!("Domain not in allowlist: {}", domain))
        }
    }

    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        let body = body.strip_prefix('\u{FEFF}').unwrap_or(&body);
        let body = if looks_like_html(body) {
            self.html_to_text(body)
        } else {
            body.to_string()
        };
        if body.chars().count() > self.max_result_chars {
            Ok(body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]")
        } else {
            Ok(body)
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "SEARCH"
    }

    fn description(&self) -> &str {
        "Fetch a reference page (encyclopedias, fandom wikis, Bangumi, Douban...) and store its text in the knowledge base. Use it when the objective references existing fictional material or needs factual grounding."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("url", ParamType::String, "Full https URL on an allowlisted domain"),
            ParameterSpec::optional("title", ParamType::String, "Short label for the knowledge entry"),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> ExecutionResult {
        let url = param_str(params, "url").unwrap_or_default();
        if url.is_empty() {
            return ExecutionResult::failure("Missing url");
        }
        let domain = match self.check_allowed(&url) {
            Ok(d) => d,
            Err(e) => return ExecutionResult::failure(e),
        };
        tracing::info!(url = %url, "search tool fetch");
        match self.fetch(&url).await {
            Ok(text) => {
                let title = param_str(params, "title").unwrap_or_else(|| url.clone());
                ExecutionResult::ok(json!({
                    "entries": [{
                        "source": domain,
                        "title": title,
                        "content": text,
                        "url": url,
                    }]
                }))
            }
            Err(e) => ExecutionResult::failure(e),
        }
    }
}
