//! JSON extraction for model replies.
//!
//! Models wrap JSON in code fences, surround it with prose, leave trailing
//! commas or stop before closing brackets. Callers treat a `None` as a
//! structural mismatch and fall back deterministically.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Parse a model reply into a typed value, repairing common defects
pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let value = extract_json(raw)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Model JSON did not match the expected shape: {}", e);
            None
        }
    }
}

/// Locate and parse the JSON value in a model reply
pub fn extract_json(raw: &str) -> Option<Value> {
    let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Some(value);
    }

    let candidate = slice_from_first_bracket(&cleaned)?;
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let repaired = close_open_brackets(&remove_trailing_commas(candidate));
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("Model JSON repaired");
            Some(value)
        }
        Err(_) => None,
    }
}

fn strip_code_fences(s: &str) -> String {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(i) => &body[i + 1..],
            None => "",
        };
    }
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// From the first `{` or `[` to its matching closer, or to the end if unclosed
fn slice_from_first_bracket(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    Some(&s[start..])
}

fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if escape {
            escape = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some('}') | Some(']') | None) {
                    continue;
                }
            }
            _ => {}
        }
        out.push(ch);
    }
    out
}

/// Close an unterminated string and any open brackets, innermost first
fn close_open_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
