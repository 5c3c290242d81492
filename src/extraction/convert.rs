use std::fmt;

use super::table::{ParameterSpec, ValueType};
use crate::model::ParameterValue;

pub const BASE_EXACT: f64 = 0.9;
pub const BASE_BOOLEAN: f64 = 0.8;
pub const BASE_PARTIAL: f64 = 0.7;
pub const BASE_LENIENT: f64 = 0.5;

const FALSE_WORDS: &[&str] = &["no", "false", "absent", "none", "not", "without", "n"];

#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub value: ParameterValue,
    pub base_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    Empty,
    NotNumeric(String),
    NotInteger(String),
    NotInSet(String),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::Empty => f.write_str("empty value"),
            ConversionError::NotNumeric(raw) => write!(f, "'{raw}' is not a number"),
            ConversionError::NotInteger(raw) => write!(f, "'{raw}' is not a whole number"),
            ConversionError::NotInSet(raw) => write!(f, "'{raw}' is not an allowed value"),
        }
    }
}

pub fn convert_value(raw: &str, spec: &ParameterSpec) -> Result<Converted, ConversionError> {
    let trimmed = raw.trim().trim_end_matches(['.', ',', ';', ':']).trim();
    if trimmed.is_empty() {
        return Err(ConversionError::Empty);
    }

    match spec.value_type {
        ValueType::Integer => convert_integer(trimmed),
        ValueType::Float => convert_float(trimmed),
        ValueType::Boolean => Ok(Converted {
            value: ParameterValue::Boolean(convert_boolean(trimmed)),
            base_confidence: BASE_BOOLEAN,
        }),
        ValueType::Enumerated => convert_enumerated(trimmed, spec),
        ValueType::String => Ok(Converted {
            value: ParameterValue::Text(trimmed.split_whitespace().collect::<Vec<&str>>().join(" ")),
            base_confidence: BASE_PARTIAL,
        }),
    }
}

fn convert_integer(raw: &str) -> Result<Converted, ConversionError> {
    let digits = raw.replace(',', "");
    if let Ok(value) = digits.parse::<i64>() {
        return Ok(Converted {
            value: ParameterValue::Integer(value),
            base_confidence: BASE_EXACT,
        });
    }
    if let Ok(value) = digits.parse::<f64>() {
        if value.fract() == 0.0 && value.is_finite() {
            return Ok(Converted {
                value: ParameterValue::Integer(value as i64),
                base_confidence: BASE_LENIENT,
            });
        }
        return Err(ConversionError::NotInteger(raw.to_string()));
    }
    match parse_number_words(raw) {
        Some(value) => Ok(Converted {
            value: ParameterValue::Integer(value),
            base_confidence: BASE_LENIENT,
        }),
        None => Err(ConversionError::NotNumeric(raw.to_string())),
    }
}

fn convert_float(raw: &str) -> Result<Converted, ConversionError> {
    let digits = raw.replace(',', "");
    if let Ok(value) = digits.parse::<f64>()
        && value.is_finite()
    {
        return Ok(Converted {
            value: ParameterValue::Float(value),
            base_confidence: BASE_EXACT,
        });
    }
    match parse_number_words(raw) {
        Some(value) => Ok(Converted {
            value: ParameterValue::Float(value as f64),
            base_confidence: BASE_LENIENT,
        }),
        None => Err(ConversionError::NotNumeric(raw.to_string())),
    }
}

pub fn convert_boolean(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    if FALSE_WORDS.contains(&lower.as_str()) || lower.starts_with("no ") || lower.starts_with("not ")
    {
        return false;
    }
    !lower.is_empty()
}

fn convert_enumerated(raw: &str, spec: &ParameterSpec) -> Result<Converted, ConversionError> {
    let needle = enum_key(raw);

    for option in &spec.enum_values {
        let exact = enum_key(&option.value) == needle
            || option.aliases.iter().any(|alias| enum_key(alias) == needle);
        if exact {
            return Ok(Converted {
                value: ParameterValue::Text(option.value.clone()),
                base_confidence: BASE_EXACT,
            });
        }
    }

    for option in &spec.enum_values {
        let partial = std::iter::once(&option.value)
            .chain(option.aliases.iter())
            .map(|surface| enum_key(surface))
            .any(|surface| needle.contains(&surface) || surface.contains(&needle));
        if partial {
            return Ok(Converted {
                value: ParameterValue::Text(option.value.clone()),
                base_confidence: BASE_PARTIAL,
            });
        }
    }

    Err(ConversionError::NotInSet(raw.to_string()))
}

fn enum_key(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

pub fn parse_number_words(raw: &str) -> Option<i64> {
    let lower = raw.to_lowercase().replace('-', " ");
    let words = lower
        .split_whitespace()
        .filter(|word| *word != "and")
        .collect::<Vec<&str>>();
    if words.is_empty() {
        return None;
    }

    let mut current = 0i64;
    for word in words {
        if word == "hundred" {
            current = current.max(1) * 100;
            continue;
        }
        current += word_value(word)?;
    }
    Some(current)
}

fn word_value(word: &str) -> Option<i64> {
    let value = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    };
    Some(value)
}
