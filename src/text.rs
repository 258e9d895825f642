//! Text helpers shared by the resolvers and the template filters: slugs, sentence
//! capitalization, markdown expansion, search highlighting.

use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn dash_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-\s]+").expect("static regex"))
}

/// Lower-cased, ASCII-only, dash separated form of `value`.
/// e.g. "Sci-Fi & Fantasy" -> "sci-fi-fantasy"
pub fn slugify(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    dash_runs()
        .replace_all(kept.trim(), "-")
        .trim_matches(|c| c == '-' || c == '_')
        .to_string()
}

/// Upper-case the first character, leave the rest untouched.
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Markdown to HTML.
pub fn markdown(value: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(value, options);
    let mut out = String::with_capacity(value.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Whether a help text marks the field as markdown-formatted.
pub fn is_markdown_hint(help_text: Option<&str>) -> bool {
    help_text
        .map(|h| h.to_lowercase().contains("markdown"))
        .unwrap_or(false)
}

/// Wrap every case-insensitive occurrence of `query` in a highlight span, preserving
/// the original casing.
pub fn highlight(value: &str, query: &str) -> String {
    if query.is_empty() {
        return value.to_string();
    }
    let re = match Regex::new(&format!("(?i){}", regex::escape(query))) {
        Ok(re) => re,
        Err(_) => return value.to_string(),
    };
    re.replace_all(value, "<span class='highlight'>$0</span>")
        .into_owned()
}

/// `replace:"what|to"`. Arguments that do not split into exactly two parts leave the
/// value untouched.
pub fn replace_pair(value: &str, arg: &str) -> String {
    let parts: Vec<&str> = arg.split('|').collect();
    if parts.len() != 2 {
        return value.to_string();
    }
    value.replace(parts[0], parts[1])
}

/// Escape text for inclusion in HTML.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Plain string form of a JSON scalar. Null renders as an empty string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Sci-Fi"), "sci-fi");
        assert_eq!(slugify("  Hello   World  "), "hello-world");
        assert_eq!(slugify("Sci-Fi & Fantasy!"), "sci-fi-fantasy");
        assert_eq!(slugify("--edge_"), "edge");
    }

    #[test]
    fn capitalize_only_touches_first_char() {
        assert_eq!(capitalize("no model named 'Book'"), "No model named 'Book'");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn markdown_renders_emphasis() {
        let html = markdown("Some *emphasis*");
        assert!(html.contains("<em>emphasis</em>"));
    }

    #[test]
    fn markdown_hint_is_case_insensitive() {
        assert!(is_markdown_hint(Some("Supports MarkDown syntax")));
        assert!(!is_markdown_hint(Some("plain text")));
        assert!(!is_markdown_hint(None));
    }

    #[test]
    fn highlight_preserves_case() {
        assert_eq!(
            highlight("First Lastname", "last"),
            "First <span class='highlight'>Last</span>name"
        );
        assert_eq!(highlight("abc", ""), "abc");
        assert_eq!(highlight("a+b", "+"), "a<span class='highlight'>+</span>b");
    }

    #[test]
    fn escape_html_covers_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn replace_pair_requires_two_parts() {
        assert_eq!(replace_pair("aaa", "a|b"), "bbb");
        assert_eq!(replace_pair("aaa", "a"), "aaa");
    }
}
