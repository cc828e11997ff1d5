//! Context loading: wraps the raw text an `execute()` call operates over
//! with the metadata the system prompt builder needs (length, a rough
//! token estimate, and a best-effort content-type guess), and the
//! escaping applied when the context is spliced into sandbox source.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A best-effort guess at what kind of text the context holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Json,
    Code,
    Markdown,
    Plain,
}

/// The loaded context plus the metadata derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedContext {
    pub text: String,
    pub length: usize,
    pub token_estimate: u64,
    pub content_type: ContentType,
}

impl LoadedContext {
    /// Load a context from raw text, computing length/token-estimate/type.
    pub fn load(text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        let token_estimate = token_estimate(length);
        let content_type = detect_content_type(&text);
        Self {
            text,
            length,
            token_estimate,
            content_type,
        }
    }

    /// The context text, escaped for splicing into sandbox source as the
    /// body of a triple-quoted string literal.
    pub fn escaped(&self) -> String {
        escape_for_embedding(&self.text)
    }
}

/// `ceil(length / 4)`, the system's fixed token-estimation heuristic.
fn token_estimate(length: usize) -> u64 {
    ((length as u64) + 3) / 4
}

/// Content-type detection, checked in a fixed priority order: JSON
/// parses-as-JSON wins first, then a code-fingerprint regex, then a
/// markdown-fingerprint regex, else plain text.
fn detect_content_type(text: &str) -> ContentType {
    let trimmed = text.trim();
    if !trimmed.is_empty() && looks_like_json(trimmed) {
        return ContentType::Json;
    }
    if code_pattern().is_match(text) {
        return ContentType::Code;
    }
    if markdown_pattern().is_match(text) {
        return ContentType::Markdown;
    }
    ContentType::Plain
}

fn looks_like_json(trimmed: &str) -> bool {
    let starts_ok = trimmed.starts_with('{') || trimmed.starts_with('[');
    starts_ok && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
}

fn code_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?m)^\s*(def |class |function |import |fn |#include|public (class|static)|from \S+ import)",
        )
        .unwrap()
    })
}

fn markdown_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?m)^(#{1,6} |```|\* |- |\d+\. )").unwrap())
}

/// Escape a context string for embedding as the body of a Python triple
/// double-quoted string: backslashes first, then embedded triple-quote
/// runs, then normalize CRLF to LF.
fn escape_for_embedding(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let backslashes_escaped = normalized.replace('\\', "\\\\");
    backslashes_escaped.replace("\"\"\"", "\\\"\\\"\\\"")
}
