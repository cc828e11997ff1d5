//! Extraction of code blocks and termination markers from model output.
//!
//! A total function over strings: every utterance parses to a
//! [`ParsedResponse`], even one containing neither code nor a marker.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The kind of termination marker a model utterance carried, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// `FINAL(<text>)` — the literal answer text.
    Direct { text: String },
    /// `FINAL_VAR(<ident>)` — the name of a sandbox variable to resolve.
    Variable { name: String },
}

/// The result of parsing one model utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Free prose with code blocks and markers stripped, whitespace normalized.
    pub thinking: String,
    /// Fenced "repl"/"python" code blocks, in source order.
    pub code_blocks: Vec<String>,
    /// The first recognized termination marker, if any.
    pub termination: Option<Termination>,
}

struct Patterns {
    code_block: Regex,
    final_var: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // ```repl or ```python fences; non-greedy body, tolerant of trailing
        // language-tag whitespace and CRLF line endings.
        code_block: Regex::new(r"(?s)```(?:repl|python)[^\n]*\n(.*?)```").unwrap(),
        final_var: Regex::new(r"FINAL_VAR\((\w+)\)").unwrap(),
    })
}

/// Locate the outermost `FINAL(...)` call in `s`, if any.
///
/// A single non-greedy regex can't track paren nesting, so content like
/// `FINAL(line (two))` needs a manual scan: walk forward counting `(`/`)`
/// from the opening paren and stop where the depth returns to zero. The
/// "closing paren not immediately followed by a word character" rule (so
/// `FINAL(x)y` does not match) only applies to candidates with no nested
/// parens — once nesting is observed, the depth count alone disambiguates
/// the true close, and a trailing identifier no longer rejects it.
fn find_final_direct(s: &str) -> Option<(usize, usize, String)> {
    const MARKER: &str = "FINAL(";
    let marker_start = s.find(MARKER)?;
    let content_start = marker_start + MARKER.len();
    let rest = &s[content_start..];

    let mut depth: i32 = 1;
    let mut nested = false;

    for (offset, ch) in rest.char_indices() {
        match ch {
            '(' => {
                depth += 1;
                nested = true;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let close_end = content_start + offset + ch.len_utf8();
                    let followed_by_word = s[close_end..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_');

                    if nested || !followed_by_word {
                        let text = s[content_start..content_start + offset].to_string();
                        return Some((marker_start, close_end, text));
                    }
                    // Unnested and followed by an identifier character: not
                    // a valid terminator. Keep scanning past it in case a
                    // later, properly nested close exists further along.
                    depth = 1;
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one model utterance into a [`ParsedResponse`].
pub fn parse_response(utterance: &str) -> ParsedResponse {
    let p = patterns();

    let mut code_blocks = Vec::new();
    let mut stripped = String::with_capacity(utterance.len());
    let mut last_end = 0;

    for m in p.code_block.captures_iter(utterance) {
        let whole = m.get(0).unwrap();
        let body = m.get(1).unwrap().as_str().trim().to_string();
        stripped.push_str(&utterance[last_end..whole.start()]);
        code_blocks.push(body);
        last_end = whole.end();
    }
    stripped.push_str(&utterance[last_end..]);

    // FINAL takes priority over FINAL_VAR when both appear anywhere in the
    // original utterance (markers are matched against the code-stripped
    // text so a marker accidentally embedded in a code block's source text
    // does not fire, matching the "first-match-wins across the whole
    // utterance" rule applied to the model's actual prose).
    let (termination, marker_span) = if let Some((start, end, text)) = find_final_direct(&stripped) {
        (Some(Termination::Direct { text: text.trim().to_string() }), Some((start, end)))
    } else if let Some(caps) = p.final_var.captures(&stripped) {
        let whole = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();
        (Some(Termination::Variable { name }), Some((whole.start(), whole.end())))
    } else {
        (None, None)
    };

    let thinking_raw = if let Some((start, end)) = marker_span {
        format!("{}{}", &stripped[..start], &stripped[end.min(stripped.len())..])
    } else {
        stripped
    };

    let thinking = normalize_whitespace(&thinking_raw);

    ParsedResponse {
        thinking,
        code_blocks,
        termination,
    }
}

/// Collapse runs of three or more newlines to two, then trim.
fn normalize_whitespace(s: &str) -> String {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    let re = RUNS.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    re.replace_all(s, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_turn_direct_answer() {
        let parsed = parse_response("FINAL(42)");
        assert_eq!(parsed.termination, Some(Termination::Direct { text: "42".to_string() }));
    }

    #[test]
    fn variable_answer_with_code_block() {
        let utterance = "```repl\nresult = 'x'\n```\nFINAL_VAR(result)";
        let parsed = parse_response(utterance);
        assert_eq!(parsed.code_blocks, vec!["result = 'x'".to_string()]);
        assert_eq!(
            parsed.termination,
            Some(Termination::Variable { name: "result".to_string() })
        );
    }

    #[test]
    fn final_takes_priority_over_final_var() {
        let parsed = parse_response("FINAL(the answer) FINAL_VAR(ignored)");
        assert_eq!(
            parsed.termination,
            Some(Termination::Direct { text: "the answer".to_string() })
        );
    }

    #[test]
    fn final_not_followed_by_word_char_b3() {
        let parsed = parse_response("FINAL(line one\nline (two))y and more");
        match parsed.termination {
            Some(Termination::Direct { text }) => {
                assert!(text.contains("line (two)"));
            }
            other => panic!("expected direct termination, got {:?}", other),
        }
    }

    #[test]
    fn final_immediately_followed_by_identifier_does_not_match() {
        let parsed = parse_response("FINAL(x)y");
        assert_eq!(parsed.termination, None);
    }

    #[test]
    fn multiple_code_blocks_preserve_order() {
        let utterance = "```python\na = 1\n```\ntext\n```repl\nb = 2\n```";
        let parsed = parse_response(utterance);
        assert_eq!(parsed.code_blocks, vec!["a = 1".to_string(), "b = 2".to_string()]);
    }

    #[test]
    fn thinking_strips_code_and_markers_and_collapses_blank_lines() {
        let utterance = "Some analysis.\n\n\n\n```repl\nx = 1\n```\n\n\nFINAL(done)";
        let parsed = parse_response(utterance);
        assert!(!parsed.thinking.contains("```"));
        assert!(!parsed.thinking.contains("FINAL"));
        assert!(!parsed.thinking.contains("\n\n\n"));
    }

    #[test]
    fn parse_is_total_over_empty_input() {
        let parsed = parse_response("");
        assert_eq!(parsed.thinking, "");
        assert!(parsed.code_blocks.is_empty());
        assert_eq!(parsed.termination, None);
    }

    #[test]
    fn idempotent_reparse_of_thinking_r1_p7() {
        let utterance = "Reasoning here.\n```repl\ncode()\n```\nFINAL(answer)";
        let first = parse_response(utterance);
        let second = parse_response(&first.thinking);
        assert!(second.code_blocks.is_empty());
        assert_eq!(second.termination, None);
    }
}
