//! Text helpers shared by the node handlers: variable substitution,
//! artifact-fence elision, score extraction, and chunk windowing.
//!
//! All windowing and truncation here counts characters, not bytes, so
//! multi-byte input never splits inside a code point.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{var:([A-Za-z0-9_]+)\}").expect("valid regex"))
}

fn artifact_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```artifact\s*\n[\s\S]*?```").expect("valid regex"))
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d+(?:\.\d+)?)\b").expect("valid regex"))
}

/// Replace every `{var:NAME}` occurrence with the variable's value.
/// Unknown names are left unchanged.
pub fn substitute_variables(input: &str, variables: &HashMap<String, String>) -> String {
    var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Elide embedded ```` ```artifact ```` code fences so large binary payloads
/// never reach a language model.
pub fn strip_artifacts(input: &str) -> String {
    artifact_pattern()
        .replace_all(input, "[artifact removed]")
        .into_owned()
}

/// Extract the last decimal number in the text, the convention critics and
/// validators use to report scores ("Quality: 8.5/10" yields 8.5... then 10;
/// the last number in a `score: N` line is N).
pub fn last_number(input: &str) -> Option<f64> {
    number_pattern()
        .find_iter(input)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// First `n` characters of the text (char-safe prefix).
pub fn prefix_chars(input: &str, n: usize) -> &str {
    match input.char_indices().nth(n) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Truncate to `n` characters, used for status-snapshot results.
pub fn truncate_chars(input: &str, n: usize) -> String {
    prefix_chars(input, n).to_string()
}

/// Split text into fixed-size character windows with overlap. Input no
/// longer than `chunk_size` produces exactly one window. The overlap is
/// clamped below `chunk_size` so the stride is always positive.
pub fn split_chunks(input: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= chunk_size {
        return vec![input.to_string()];
    }

    let overlap = overlap.min(chunk_size - 1);
    let stride = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}
