//! Lenient recovery of JSON from free-form model output.
//!
//! Completion backends are asked for strict JSON but routinely wrap it in
//! prose, markdown fences, or an envelope object, and produce almost-JSON
//! (single quotes, trailing commas, bare keys). [`parse_json_text`] extracts
//! the best structured value it can, or `None`. It never panics.
//!
//! Recovery order, first success wins:
//! 1. strict parse of the trimmed text,
//! 2. strict parse of a fenced code block interior,
//! 3. strict parse of the first balanced `{...}`/`[...]` substring,
//! each falling back to a repaired variant of the same candidate.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("fence regex");
    static ref TRAILING_COMMA_RE: Regex = Regex::new(r",\s*([}\]])").expect("trailing comma regex");
}

/// Extract a JSON value from raw model text.
///
/// If the recovered value is an object whose `output`, `result`, or `data`
/// field holds a JSON string, one level of that envelope is unwrapped.
pub fn parse_json_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(value) = try_parse_candidate(trimmed) {
        return Some(unwrap_container(value));
    }

    if let Some(captures) = FENCE_RE.captures(trimmed) {
        if let Some(inside) = captures.get(1) {
            if let Some(value) = try_parse_candidate(inside.as_str().trim()) {
                return Some(unwrap_container(value));
            }
        }
    }

    let substring = find_first_json_substring(trimmed)?;
    try_parse_candidate(&substring).map(unwrap_container)
}

/// Strict parse, then a single repaired retry. `null` counts as a miss so a
/// bare "null" never masquerades as recovered structure.
fn try_parse_candidate(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(value) = parse_strict(trimmed) {
        return Some(value);
    }

    let repaired = repair_json_text(trimmed);
    if repaired != trimmed {
        let value = parse_strict(&repaired);
        if value.is_some() {
            tracing::debug!("recovered JSON after lenient repair");
        }
        return value;
    }

    None
}

fn parse_strict(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

fn repair_json_text(text: &str) -> String {
    let mut repaired = text.trim().to_string();
    if repaired.is_empty() {
        return repaired;
    }

    repaired = normalize_smart_quotes(&repaired);
    repaired = convert_single_quoted_strings(&repaired);
    repaired = remove_trailing_commas(&repaired);
    repaired = quote_unquoted_keys(&repaired);
    // quoting keys can expose a fresh trailing comma
    remove_trailing_commas(&repaired)
}

fn normalize_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA_RE.replace_all(text, "$1").into_owned()
}

/// Convert single-quoted string literals to double-quoted ones, re-escaping
/// embedded double quotes and preserving escape sequences. Content inside
/// existing double-quoted strings is left untouched.
fn convert_single_quoted_strings(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_single {
            if escaped {
                match ch {
                    '"' => result.push_str("\\\""),
                    '\'' => result.push('\''),
                    other => result.push(other),
                }
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    result.push('\\');
                    escaped = true;
                }
                '\'' => {
                    result.push('"');
                    in_single = false;
                }
                '"' => result.push_str("\\\""),
                other => result.push(other),
            }
            continue;
        }

        if in_double {
            result.push(ch);
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => in_double = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '\'' => {
                in_single = true;
                result.push('"');
            }
            '"' => {
                in_double = true;
                result.push('"');
            }
            other => result.push(other),
        }
    }

    result
}

/// Quote bare identifier keys that precede a colon, e.g. `{key: 1}`.
fn quote_unquoted_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    let mut in_double = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if in_double {
            result.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }

        if ch == '"' {
            in_double = true;
            result.push(ch);
            i += 1;
            continue;
        }

        if ch == '{' || ch == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }

            let start = j;
            if j < chars.len() && (chars[j].is_ascii_alphabetic() || chars[j] == '_') {
                j += 1;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }

                let key: String = chars[start..j].iter().collect();
                let mut k = j;
                while k < chars.len() && chars[k].is_whitespace() {
                    k += 1;
                }

                if k < chars.len() && chars[k] == ':' {
                    result.push(ch);
                    for ws in &chars[i + 1..start] {
                        result.push(*ws);
                    }
                    result.push('"');
                    result.push_str(&key);
                    result.push('"');
                    for ws in &chars[j..k] {
                        result.push(*ws);
                    }
                    result.push(':');
                    i = k + 1;
                    continue;
                }
            }
        }

        result.push(ch);
        i += 1;
    }

    result
}

/// Find the first balanced `{...}` or `[...]` substring, ignoring brackets
/// inside string literals and honoring backslash escapes.
fn find_first_json_substring(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();

    for start in 0..chars.len() {
        let opener = chars[start];
        if opener != '{' && opener != '[' {
            continue;
        }

        let mut stack: Vec<char> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &c) in chars[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match c {
                '"' => in_string = true,
                '{' => stack.push('}'),
                '[' => stack.push(']'),
                '}' | ']' => {
                    if stack.pop() != Some(c) {
                        break;
                    }
                    if stack.is_empty() {
                        return Some(chars[start..=start + offset].iter().collect());
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// Unwrap a single envelope level: `{"output": "<json string>"}` and friends.
fn unwrap_container(value: Value) -> Value {
    let Value::Object(ref map) = value else {
        return value;
    };

    for key in ["output", "result", "data"] {
        match map.get(key) {
            Some(Value::String(inner)) => {
                if let Some(parsed) = try_parse_candidate(inner) {
                    return parsed;
                }
            }
            Some(inner @ Value::Object(_)) | Some(inner @ Value::Array(_)) => {
                return inner.clone();
            }
            _ => {}
        }
    }

    value
}
