//! 决策解析：把规划器的自由文本转成 ToolDecision
//!
//! 约定格式（XML 风格标签，复合参数用 CDATA 包裹）：
//!
//! ```text
//! <think>...</think>
//! <task_adjustment>
//!   <reasoning>...</reasoning>
//!   <task_description>...</task_description>
//!   <new_sub_problems><sub_problem>...</sub_problem></new_sub_problems>
//! </task_adjustment>
//! <action>SUPPLEMENT</action>
//! <priority>high</priority>
//! <parameters>
//!   <entries><![CDATA[[{"keys": ["码头"], "content": "..."}]]]></entries>
//! </parameters>
//! ```
//!
//! 复合值解析顺序：严格 JSON → 补全未闭合括号 → 补全奇数引号后再补括号 → 原文作为字符串。
//! 解析过程不会 panic，任何异常都退化为「无决策」。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// 单次任务调整最多给出的子问题数
pub const MAX_ADJUSTED_SUB_PROBLEMS: usize = 3;

const NO_DECISION_MARKERS: [&str; 5] = ["none", "null", "no_action", "no action", "n/a"];
/// 「不调整」标记：整句等于短标记，或以某个短语开头（"No change needed."、"保持不变" 等）
const NO_CHANGE_EXACT: [&str; 5] = ["none", "n/a", "same", "无", "同上"];
const NO_CHANGE_PREFIXES: [&str; 16] = [
    "no change",
    "unchanged",
    "no adjustment",
    "no update",
    "keep as is",
    "keep current",
    "无变化",
    "无需",
    "不变",
    "不需要",
    "不调整",
    "没有变化",
    "保持不变",
    "维持不变",
    "保持原样",
    "维持原样",
];
const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// 每轮决策附带的任务调整
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAdjustment {
    pub reasoning: String,
    #[serde(default)]
    pub new_task_description: Option<String>,
    #[serde(default)]
    pub new_sub_problems: Option<Vec<String>>,
}

impl TaskAdjustment {
    pub fn no_change() -> Self {
        Self {
            reasoning: "no change".to_string(),
            new_task_description: None,
            new_sub_problems: None,
        }
    }

    pub fn is_no_change(&self) -> bool {
        self.new_task_description.is_none() && self.new_sub_problems.is_none()
    }
}

impl Default for TaskAdjustment {
    fn default() -> Self {
        Self::no_change()
    }
}

/// 规划器本轮选择的工具与参数
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDecision {
    pub tool: String,
    pub parameters: Map<String, Value>,
    pub reasoning: String,
    pub priority: Option<String>,
    pub adjustment: TaskAdjustment,
}

fn open_tag_re() -> &'static Option<Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_\-]*)\s*>").ok())
}

fn sub_problem_re() -> &'static Option<Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<sub_problem\s*>(.*?)</sub_problem\s*>").ok())
}

/// 取标签内容；缺少闭合标签时取到文本末尾
pub(crate) fn block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    Some(match rest.find(&close) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

/// 取标签内容，要求闭合
pub(crate) fn closed_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    rest.find(&close).map(|end| &rest[..end])
}

fn is_marker(text: &str, markers: &[&str]) -> bool {
    let lower = text.trim().to_lowercase();
    markers.iter().any(|m| lower == *m)
}

/// 小写、去掉首尾标点、空白合并为单个空格
fn normalize_marker(text: &str) -> String {
    let lower = text.to_lowercase();
    let trimmed = lower.trim_matches(|c: char| {
        c.is_whitespace() || c.is_ascii_punctuation() || "。！？，、；：…（）【】「」".contains(c)
    });
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_no_change_marker(text: &str) -> bool {
    let normalized = normalize_marker(text);
    normalized.is_empty()
        || NO_CHANGE_EXACT.contains(&normalized.as_str())
        || NO_CHANGE_PREFIXES.iter().any(|p| normalized.starts_with(p))
}

/// 分离 `<think>` 推理与其后的正文
fn split_think(text: &str) -> (String, &str) {
    let Some(start) = text.find("<think>") else {
        return (String::new(), text);
    };
    let inner_start = start + "<think>".len();
    match text[inner_start..].find("</think>") {
        Some(end) => (
            text[inner_start..inner_start + end].trim().to_string(),
            &text[inner_start + end + "</think>".len()..],
        ),
        None => {
            // 未闭合：推理截到第一个结构标签为止
            let rest = &text[inner_start..];
            let cut = ["<task_adjustment>", "<action>"]
                .iter()
                .filter_map(|t| rest.find(t))
                .min()
                .unwrap_or(rest.len());
            (rest[..cut].trim().to_string(), &rest[cut..])
        }
    }
}

/// 解析规划器输出；返回 None 表示本轮无决策
pub fn parse_decision(text: &str) -> Option<ToolDecision> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (reasoning, body) = split_think(text);

    let action = block(body, "action")?;
    let tool = action
        .split('<')
        .next()
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*'))
        .trim()
        .to_string();
    if tool.is_empty() || is_marker(&tool, &NO_DECISION_MARKERS) {
        tracing::debug!("planner returned no action");
        return None;
    }

    let parameters = block(body, "parameters")
        .map(parse_parameters)
        .unwrap_or_default();
    let adjustment = block(body, "task_adjustment")
        .map(parse_adjustment)
        .unwrap_or_default();
    let priority = closed_block(body, "priority")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from);

    Some(ToolDecision {
        tool,
        parameters,
        reasoning,
        priority,
        adjustment,
    })
}

/// 解析任务调整块：子问题最多 3 条，缺项视为「不变」
pub fn parse_adjustment(text: &str) -> TaskAdjustment {
    let reasoning = closed_block(text, "reasoning")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("no change")
        .to_string();
    let new_task_description = closed_block(text, "task_description")
        .map(str::trim)
        .filter(|d| !is_no_change_marker(d))
        .map(String::from);
    let list_text = block(text, "new_sub_problems").unwrap_or(text);
    let subs: Vec<String> = match sub_problem_re() {
        Some(re) => re
            .captures_iter(list_text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !is_no_change_marker(s))
            .take(MAX_ADJUSTED_SUB_PROBLEMS)
            .collect(),
        None => Vec::new(),
    };
    TaskAdjustment {
        reasoning,
        new_task_description,
        new_sub_problems: (!subs.is_empty()).then_some(subs),
    }
}

/// 解析 `<parameters>` 块：每个子元素一个参数
pub fn parse_parameters(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let Some(re) = open_tag_re() else {
        return params;
    };
    let mut rest = text;
    while let Some(caps) = re.captures(rest) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let name = name.as_str().to_string();
        let close = format!("</{}>", name);
        let after = &rest[whole.end()..];
        let trimmed = after.trim_start();
        let lead = after.len() - trimmed.len();

        let (value, consumed) = if let Some(cdata) = trimmed.strip_prefix(CDATA_OPEN) {
            let body_start = lead + CDATA_OPEN.len();
            match cdata.find(CDATA_CLOSE) {
                Some(end) => {
                    let tail = &cdata[end + CDATA_CLOSE.len()..];
                    let tail_used = tail.find(&close).map_or(0, |i| i + close.len());
                    (
                        parse_composite(&cdata[..end]),
                        body_start + end + CDATA_CLOSE.len() + tail_used,
                    )
                }
                None => {
                    // CDATA 被截断：取到闭合标签或文本末尾
                    let (end, used) = match cdata.find(&close) {
                        Some(i) => (i, i + close.len()),
                        None => (cdata.len(), cdata.len()),
                    };
                    (parse_composite(&cdata[..end]), body_start + used)
                }
            }
        } else {
            match after.find(&close) {
                Some(end) => (coerce_scalar(&after[..end]), end + close.len()),
                None => {
                    let end = re.find(after).map_or(after.len(), |m| m.start());
                    (coerce_scalar(&after[..end]), end)
                }
            }
        };
        params.insert(name, value);
        rest = &after[consumed.min(after.len())..];
    }
    params
}

/// 复合值修复阶梯
pub fn parse_composite(raw: &str) -> Value {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return v;
    }
    if let Some(repaired) = close_brackets(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
            tracing::debug!("composite value repaired by closing brackets");
            return v;
        }
    }
    if has_odd_quotes(text) {
        let quoted = format!("{}\"", text);
        if let Some(repaired) = close_brackets(&quoted) {
            if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
                tracing::debug!("composite value repaired by closing quote and brackets");
                return v;
            }
        }
    }
    tracing::warn!(preview = %crate::memory::truncate_chars(text, 80), "composite value kept as raw text");
    Value::String(text.to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 为未闭合的 `[` / `{` 依次补上闭合符；结尾仍在字符串内时返回 None
fn close_brackets(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    if in_string || stack.is_empty() {
        return None;
    }
    let mut out = text.trim_end().trim_end_matches(',').to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    Some(out)
}

fn has_odd_quotes(text: &str) -> bool {
    let mut count = 0usize;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => count += 1,
            _ => {}
        }
    }
    count % 2 == 1
}

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// 标量强制转换：true/false → 布尔，数字 → 数值，其余保持字符串
pub fn coerce_scalar(raw: &str) -> Value {
    let text = unescape_entities(raw.trim());
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    let looks_composite = (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'));
    if looks_composite {
        if let Ok(v) = serde_json::from_str::<Value>(&text) {
            return v;
        }
    }
    Value::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FULL: &str = r#"
<think>角色卡还缺性格与标签。</think>
<task_adjustment>
  <reasoning>先补性格</reasoning>
  <task_description>完善角色性格</task_description>
  <new_sub_problems>
    <sub_problem>写性格</sub_problem>
    <sub_problem>  </sub_problem>
    <sub_problem>写标签</sub_problem>
  </new_sub_problems>
</task_adjustment>
<action>CHARACTER</action>
<priority>high</priority>
<parameters>
  <personality>冷静，话少</personality>
  <tags><![CDATA[["侦探", "科幻"]]]></tags>
  <age>32</age>
  <is_android>TRUE</is_android>
</parameters>"#;

    #[test]
    fn test_parse_full_decision() {
        let d = parse_decision(FULL).unwrap();
        assert_eq!(d.tool, "CHARACTER");
        assert_eq!(d.reasoning, "角色卡还缺性格与标签。");
        assert_eq!(d.priority.as_deref(), Some("high"));
        assert_eq!(d.parameters["personality"], "冷静，话少");
        assert_eq!(d.parameters["tags"], json!(["侦探", "科幻"]));
        assert_eq!(d.parameters["age"], json!(32));
        assert_eq!(d.parameters["is_android"], json!(true));
        assert_eq!(d.adjustment.new_task_description.as_deref(), Some("完善角色性格"));
        assert_eq!(
            d.adjustment.new_sub_problems,
            Some(vec!["写性格".to_string(), "写标签".to_string()])
        );
    }

    #[test]
    fn test_missing_action_or_sentinel_is_no_decision() {
        assert!(parse_decision("<think>hmm</think><parameters><a>1</a></parameters>").is_none());
        assert!(parse_decision("<action>none</action>").is_none());
        assert!(parse_decision("<action> NO_ACTION </action>").is_none());
        assert!(parse_decision("<action></action>").is_none());
        assert!(parse_decision("").is_none());
        assert!(parse_decision("just prose, no tags at all").is_none());
    }

    #[test]
    fn test_truncated_array_is_repaired() {
        let text = "<action>SUPPLEMENT</action><parameters><entries><![CDATA[[{\"keys\": [\"港口\"], \"content\": \"雾港\"}, {\"keys\": [\"灯塔\"], \"content\": \"旧灯塔\"}";
        let d = parse_decision(text).unwrap();
        let entries = d.parameters["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["content"], "旧灯塔");
    }

    #[test]
    fn test_odd_quote_is_repaired() {
        let v = parse_composite(r#"["侦探", "黑色电影"#);
        assert_eq!(v, json!(["侦探", "黑色电影"]));
    }

    #[test]
    fn test_unrepairable_value_kept_as_string() {
        let v = parse_composite(r#"{"a": }"#);
        assert_eq!(v, json!(r#"{"a": }"#));
    }

    #[test]
    fn test_adjustment_caps_at_three() {
        let adj = parse_adjustment(
            "<new_sub_problems><sub_problem>a</sub_problem><sub_problem>b</sub_problem>\
             <sub_problem>c</sub_problem><sub_problem>d</sub_problem></new_sub_problems>",
        );
        assert_eq!(adj.new_sub_problems.unwrap().len(), 3);
        assert_eq!(adj.reasoning, "no change");
        assert!(adj.new_task_description.is_none());
    }

    #[test]
    fn test_missing_adjustment_defaults_to_no_change() {
        let d = parse_decision("<action>REFLECT</action>").unwrap();
        assert!(d.adjustment.is_no_change());
        assert!(d.parameters.is_empty());
        let adj = parse_adjustment("<task_description>无变化</task_description>");
        assert!(adj.is_no_change());
    }

    #[test]
    fn test_no_change_variants_keep_description() {
        for marker in ["No change.", "no changes", "No change needed", "保持不变", "Unchanged!", "无变化。", " n/a "] {
            let adj = parse_adjustment(&format!("<task_description>{}</task_description>", marker));
            assert!(adj.new_task_description.is_none(), "{:?} was taken as a description", marker);
        }
        let adj = parse_adjustment("<task_description>塑造不变的雾港侦探</task_description>");
        assert_eq!(adj.new_task_description.as_deref(), Some("塑造不变的雾港侦探"));
    }

    #[test]
    fn test_no_change_sub_problem_does_not_replace_plan() {
        let adj = parse_adjustment(
            "<task_description>No change.</task_description>\
             <new_sub_problems><sub_problem>No change needed</sub_problem></new_sub_problems>",
        );
        assert!(adj.is_no_change());

        let adj = parse_adjustment(
            "<new_sub_problems><sub_problem>保持不变</sub_problem><sub_problem>补写口癖</sub_problem></new_sub_problems>",
        );
        assert_eq!(adj.new_sub_problems, Some(vec!["补写口癖".to_string()]));
    }

    #[test]
    fn test_unclosed_action_and_think() {
        let d = parse_decision("<think>先搜资料\n<action>SEARCH\n<parameters><url>https://zh.wikipedia.org/wiki/x</url></parameters>")
            .unwrap();
        assert_eq!(d.tool, "SEARCH");
        assert_eq!(d.reasoning, "先搜资料");
        assert_eq!(d.parameters["url"], "https://zh.wikipedia.org/wiki/x");
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(coerce_scalar(" false "), json!(false));
        assert_eq!(coerce_scalar("2.5"), json!(2.5));
        assert_eq!(coerce_scalar("NaN"), json!("NaN"));
        assert_eq!(coerce_scalar("a &lt;b&gt;"), json!("a <b>"));
    }
}
