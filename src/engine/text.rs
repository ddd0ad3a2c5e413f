//! 标题/话题文本工具

use once_cell::sync::Lazy;
use regex::Regex;

static BOOK_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"《(.*?)》").expect("book title regex"));
static HASH_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[^\s#@]+").expect("hash token regex"));
static AT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[^\s#@]+").expect("at token regex"));

/// 按字符数截断标题
pub fn truncate_title(title: &str, max_chars: usize) -> String {
    title.trim().chars().take(max_chars).collect()
}

/// 规范化话题
///
/// 去掉首尾空白和所有前导 `#`，再统一加一个 `#`；丢弃空项，去重（保留先出现的），
/// 最后截取前 `max` 个。
pub fn normalize_tags<S: AsRef<str>>(tags: &[S], max: usize) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for tag in tags {
        let bare = tag.as_ref().trim().trim_start_matches('#').trim();
        if bare.is_empty() {
            continue;
        }
        let normalized = format!("#{}", bare);
        if !result.contains(&normalized) {
            result.push(normalized);
        }
    }
    result.truncate(max);
    result
}

/// 从 `《剧名》` 格式中提取剧名，没有书名号时返回去空白后的原文
pub fn canonical_title(raw: &str) -> String {
    BOOK_TITLE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// 保留字母数字（含中文）以及 `_` `-`
fn clean_tag_punctuation(tag: &str) -> Option<String> {
    let mut chars = tag.chars();
    let prefix = chars.next()?;
    let content: String = chars
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if content.is_empty() {
        None
    } else {
        Some(format!("{}{}", prefix, content))
    }
}

/// 从任务"硬性要求"中提取 `#话题` 和 `@账号`
///
/// 文本本身以 `#`/`@` 开头时整行作为一个要求；否则分别提取行内的
/// `#` 和 `@` 项并去掉标点。
pub fn extract_requirement_tags(content: &str) -> Vec<String> {
    let line = content.trim();
    if line.is_empty() {
        return Vec::new();
    }
    if line.starts_with('#') || line.starts_with('@') {
        return vec![line.to_string()];
    }

    HASH_TOKEN
        .find_iter(line)
        .chain(AT_TOKEN.find_iter(line))
        .filter_map(|m| clean_tag_punctuation(m.as_str()))
        .collect()
}

/// 把硬性要求拼到标题前
pub fn prefix_requirements(title: &str, requirements: &[String]) -> String {
    if requirements.is_empty() {
        return title.to_string();
    }
    let joined = requirements.join(" ").replace('！', "！！");
    format!("{} {}", joined, title)
}
