use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Direct,
    FenceStripped,
    BalancedScan,
    Repaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    Empty,
    NoJson,
    NullPayload,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::Empty => "empty response",
            ParseErrorKind::NoJson => "no parseable json payload",
            ParseErrorKind::NullPayload => "json payload is null",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJson {
    pub value: Value,
    pub strategy: ParseStrategy,
}

pub fn parse_json_response(raw: &str) -> Result<ParsedJson, ParseErrorKind> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseErrorKind::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return accept(value, ParseStrategy::Direct);
    }

    if let Some(inner) = strip_fences(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(inner.trim())
    {
        return accept(value, ParseStrategy::FenceStripped);
    }

    for candidate in balanced_candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return accept(value, ParseStrategy::BalancedScan);
        }
    }

    Err(ParseErrorKind::NoJson)
}

pub fn recover_json_map(raw: &str) -> Map<String, Value> {
    match parse_json_response(raw) {
        Ok(ParsedJson {
            value: Value::Object(map),
            ..
        }) => map,
        Ok(ParsedJson {
            value: Value::Array(items),
            ..
        }) => {
            let mut map = Map::new();
            map.insert("items".to_string(), Value::Array(items));
            map
        }
        _ => Map::new(),
    }
}

pub fn items_under(value: &Value, keys: &[&str]) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn accept(value: Value, strategy: ParseStrategy) -> Result<ParsedJson, ParseErrorKind> {
    if value.is_null() {
        return Err(ParseErrorKind::NullPayload);
    }
    Ok(ParsedJson { value, strategy })
}

fn strip_fences(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip an info string such as "json".
    let body_start = after_open.find('\n').map(|index| index + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(&body[..close])
}

/// Balanced `{...}` / `[...]` spans in order of their opening bracket, so
/// an enclosing structure is tried before anything nested in it.
fn balanced_candidates(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    for (start, opener) in text.char_indices() {
        if opener != '{' && opener != '[' {
            continue;
        }
        if let Some(end) = matching_close(text, start) {
            spans.push(&text[start..end]);
        }
    }
    spans
}

fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut stack = Vec::<char>::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, character) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == '"' {
                in_string = false;
            }
            continue;
        }

        match character {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(character) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + character.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
