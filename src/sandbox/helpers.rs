//! The text-inspection helper library exposed inside the sandbox REPL:
//! chunking, pattern search, and JSON/section extraction over one bound
//! `context` string. Mirrored function-for-function by the Python
//! companion script so code written against either backend behaves the
//! same way.

use crate::error::{Error, Result};
use regex::Regex;

const MAX_PATTERN_LEN: usize = 500;

/// Compile `pattern` case-insensitively, rejecting overlong or malformed
/// input rather than letting a pathological regex hang the sandbox.
fn compile(pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(Error::InvalidPattern(format!(
            "pattern too long ({} > {MAX_PATTERN_LEN})",
            pattern.len()
        )));
    }
    Regex::new(&format!("(?i){pattern}")).map_err(|e| Error::InvalidPattern(e.to_string()))
}

/// Splits `context` into overlapping fixed-size chunks.
pub fn chunk_by_size(context: &str, chars: usize, overlap: usize) -> Result<Vec<String>> {
    if chars == 0 {
        return Err(Error::InvalidPattern("chunk size must be positive".to_string()));
    }
    let all: Vec<char> = context.chars().collect();
    let step = chars.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < all.len() {
        let end = (start + chars).min(all.len());
        chunks.push(all[start..end].iter().collect());
        start += step;
    }
    Ok(chunks)
}

/// Alias kept for parity with the companion script's naming.
pub fn chunk_text(context: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    chunk_by_size(context, size, overlap)
}

/// Splits `context` at each Markdown header of exactly `level` (e.g.
/// `level=2` splits on `## `), each chunk running up to the next header
/// of that level or end of text.
pub fn chunk_by_headers(context: &str, level: usize) -> Vec<String> {
    let marker = "#".repeat(level.max(1));
    let pattern = format!(r"(?m)^{}\s+.*$", regex::escape(&marker));
    let re = Regex::new(&pattern).expect("constructed from a fixed template");

    let starts: Vec<usize> = re.find_iter(context).map(|m| m.start()).collect();
    if starts.is_empty() {
        return if context.is_empty() { Vec::new() } else { vec![context.to_string()] };
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(context.len());
            context[start..end].to_string()
        })
        .collect()
}

/// Returns up to `max_results` windows of `window` characters on either
/// side of each match of `pattern`.
pub fn search_context(context: &str, pattern: &str, window: usize, max_results: usize) -> Result<Vec<String>> {
    let re = compile(pattern)?;
    let mut results = Vec::new();
    for m in re.find_iter(context) {
        let start = m.start().saturating_sub(window);
        let end = (m.end() + window).min(context.len());
        results.push(context[start..end].to_string());
        if results.len() >= max_results {
            break;
        }
    }
    Ok(results)
}

/// Counts non-overlapping matches of `pattern` in `context`.
pub fn count_matches(context: &str, pattern: &str) -> Result<usize> {
    let re = compile(pattern)?;
    Ok(re.find_iter(context).count())
}

/// Extracts the first balanced `{...}`/`[...]` JSON value found in
/// `context`, or `None` if nothing parses.
pub fn extract_json(context: &str) -> Option<serde_json::Value> {
    let bytes = context.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        for end in (i + 1..=bytes.len()).rev() {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&context[i..end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Splits `context` at each line matching `header_pattern`, analogous to
/// [`chunk_by_headers`] but for an arbitrary delimiter regex.
pub fn extract_sections(context: &str, header_pattern: &str) -> Result<Vec<String>> {
    let re = compile(header_pattern)?;
    let starts: Vec<usize> = re.find_iter(context).map(|m| m.start()).collect();
    Ok(starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(context.len());
            context[start..end].to_string()
        })
        .collect())
}

/// The 1-indexed line number of the first line matching `pattern`.
pub fn find_line(context: &str, pattern: &str) -> Result<Option<usize>> {
    let re = compile(pattern)?;
    for (i, line) in context.lines().enumerate() {
        if re.is_match(line) {
            return Ok(Some(i + 1));
        }
    }
    Ok(None)
}

/// Total line count, or the count of lines matching `pattern` if given.
pub fn count_lines(context: &str, pattern: Option<&str>) -> Result<usize> {
    match pattern {
        None => Ok(context.lines().count()),
        Some(p) => {
            let re = compile(p)?;
            Ok(context.lines().filter(|line| re.is_match(line)).count())
        }
    }
}

/// The 1-indexed `n`th line, or `None` if out of range.
pub fn get_line(context: &str, n: usize) -> Option<String> {
    if n == 0 {
        return None;
    }
    context.lines().nth(n - 1).map(str::to_string)
}

/// The first match of `pattern`, truncated to `max_length` characters
/// with an ellipsis, or `None` if nothing matches.
pub fn quote_match(context: &str, pattern: &str, max_length: usize) -> Result<Option<String>> {
    let re = compile(pattern)?;
    Ok(re.find(context).map(|m| {
        let quote = m.as_str();
        if quote.chars().count() > max_length {
            let truncated: String = quote.chars().take(max_length).collect();
            format!("{truncated}...")
        } else {
            quote.to_string()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_by_size_respects_overlap() {
        let chunks = chunk_by_size("abcdefghij", 4, 2).unwrap();
        assert_eq!(chunks[0], "abcd");
        assert_eq!(chunks[1], "cdef");
    }

    #[test]
    fn chunk_by_size_rejects_zero_size() {
        assert!(chunk_by_size("abc", 0, 0).is_err());
    }

    #[test]
    fn chunk_by_headers_splits_on_exact_level() {
        let text = "# Title\nintro\n## A\nbody a\n## B\nbody b\n";
        let chunks = chunk_by_headers(text, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("## A"));
        assert!(chunks[1].starts_with("## B"));
    }

    #[test]
    fn chunk_by_headers_with_no_match_returns_whole_text() {
        let chunks = chunk_by_headers("no headers here", 2);
        assert_eq!(chunks, vec!["no headers here".to_string()]);
    }

    #[test]
    fn search_context_is_case_insensitive_by_default() {
        let results = search_context("The Quick Fox", "quick", 3, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].to_lowercase().contains("quick"));
    }

    #[test]
    fn count_matches_counts_non_overlapping() {
        assert_eq!(count_matches("aaaa", "aa").unwrap(), 2);
    }

    #[test]
    fn rejects_overlong_pattern() {
        let pattern = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(matches!(count_matches("x", &pattern), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn extract_json_finds_first_balanced_object() {
        let text = "prefix noise {\"a\": 1, \"b\": [1,2]} suffix";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_json_returns_none_without_valid_json() {
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn find_line_is_one_indexed() {
        let text = "first\nsecond\nthird";
        assert_eq!(find_line(text, "second").unwrap(), Some(2));
    }

    #[test]
    fn get_line_out_of_range_is_none() {
        let text = "only one line";
        assert_eq!(get_line(text, 2), None);
        assert_eq!(get_line(text, 0), None);
        assert_eq!(get_line(text, 1), Some("only one line".to_string()));
    }

    #[test]
    fn count_lines_with_and_without_pattern() {
        let text = "apple\nbanana\napricot";
        assert_eq!(count_lines(text, None).unwrap(), 3);
        assert_eq!(count_lines(text, Some("^ap")).unwrap(), 2);
    }

    #[test]
    fn quote_match_truncates_long_matches() {
        let text = "x".repeat(300);
        let quote = quote_match(&text, "x+", 10).unwrap().unwrap();
        assert_eq!(quote, format!("{}...", "x".repeat(10)));
    }
}
