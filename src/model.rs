use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Abstract,
    Introduction,
    Methods,
    Participants,
    Results,
    Discussion,
    Other,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Abstract,
        SectionKind::Introduction,
        SectionKind::Methods,
        SectionKind::Participants,
        SectionKind::Results,
        SectionKind::Discussion,
        SectionKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Abstract => "abstract",
            SectionKind::Introduction => "introduction",
            SectionKind::Methods => "methods",
            SectionKind::Participants => "participants",
            SectionKind::Results => "results",
            SectionKind::Discussion => "discussion",
            SectionKind::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        let kind = match normalized.as_str() {
            "abstract" | "summary" => SectionKind::Abstract,
            "introduction" | "intro" | "background" => SectionKind::Introduction,
            "method" | "methods" | "materials and methods" | "methodology" | "procedure"
            | "experimental procedure" => SectionKind::Methods,
            "participants" | "subjects" | "sample" | "observers" => SectionKind::Participants,
            "results" | "findings" => SectionKind::Results,
            "discussion" | "general discussion" | "conclusion" | "conclusions" => {
                SectionKind::Discussion
            }
            "other" => SectionKind::Other,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_methods_like(self) -> bool {
        matches!(self, SectionKind::Methods | SectionKind::Participants)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentSource {
    DetectedByHeader,
    KeywordFallback,
    LineFallback,
    Supplied,
    WholeDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SectionKind,
    pub text: String,
    pub source: SegmentSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRange {
    pub number: u32,
    pub title: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub has_local_methods: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        let number = match self {
            ParameterValue::Integer(value) => Some(*value as f64),
            ParameterValue::Float(value) => Some(*value),
            ParameterValue::Text(value) => value.trim().replace(',', "").parse::<f64>().ok(),
            ParameterValue::Boolean(_) => None,
        };
        number.filter(|number| number.is_finite())
    }

    pub fn normalized_key(&self) -> String {
        match self {
            ParameterValue::Boolean(value) => value.to_string(),
            ParameterValue::Integer(value) => value.to_string(),
            ParameterValue::Float(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", *value as i64)
                } else {
                    format!("{value}")
                }
            }
            ParameterValue::Text(value) => match self.as_f64() {
                Some(number) => ParameterValue::Float(number).normalized_key(),
                None => value
                    .split_whitespace()
                    .collect::<Vec<&str>>()
                    .join(" ")
                    .to_lowercase(),
            },
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(flag) => Some(ParameterValue::Boolean(*flag)),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(ParameterValue::Integer)
                .or_else(|| number.as_f64().map(ParameterValue::Float)),
            serde_json::Value::String(text) if !text.trim().is_empty() => {
                Some(ParameterValue::Text(text.trim().to_string()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Boolean(value) => write!(f, "{value}"),
            ParameterValue::Integer(value) => write!(f, "{value}"),
            ParameterValue::Float(value) => write!(f, "{value}"),
            ParameterValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rule,
    LlmVerify,
    LlmMissed,
    LlmDiscover,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Rule => "rule",
            SourceType::LlmVerify => "llm_verify",
            SourceType::LlmMissed => "llm_missed",
            SourceType::LlmDiscover => "llm_discover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub parameter: String,
    pub value: ParameterValue,
    pub confidence: f64,
    pub source_type: SourceType,
    pub evidence: String,
    pub evidence_location: String,
    pub method_tag: String,
    pub extracted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub parameter: String,
    pub accepted: Candidate,
    pub alternatives: Vec<Candidate>,
    pub conflict_detected: bool,
    pub requires_manual_review: bool,
    pub resolution_policy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub document_id: Option<String>,
    pub full_text: String,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default, alias = "extraction_method_tag")]
    pub extraction_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRunEntry {
    pub document_id: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub status: String,
    pub experiment_count: usize,
    pub record_count: usize,
    pub cache_hit: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub parameter_table_version: String,
    pub policy_table_version: String,
    pub llm_enabled: bool,
    pub llm_budget_usd: f64,
    pub llm_spent_usd: f64,
    pub document_count: usize,
    pub failed_count: usize,
    pub documents: Vec<ExtractRunEntry>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_labels_map_onto_kinds() {
        assert_eq!(SectionKind::from_label("Materials_and-Methods"), Some(SectionKind::Methods));
        assert_eq!(SectionKind::from_label(" Subjects "), Some(SectionKind::Participants));
        assert_eq!(SectionKind::from_label("appendix"), None);
    }

    #[test]
    fn normalized_key_unifies_numeric_spellings() {
        assert_eq!(ParameterValue::Integer(24).normalized_key(), "24");
        assert_eq!(ParameterValue::Float(24.0).normalized_key(), "24");
        assert_eq!(ParameterValue::Text("1,024".to_string()).normalized_key(), "1024");
        assert_eq!(
            ParameterValue::Text("Within  Subjects".to_string()).normalized_key(),
            "within subjects"
        );
    }

    #[test]
    fn non_finite_text_is_not_numeric() {
        for raw in ["nan", "NaN", "inf", "-infinity"] {
            let value = ParameterValue::Text(raw.to_string());
            assert_eq!(value.as_f64(), None, "{raw}");
            assert_eq!(value.normalized_key(), raw.to_lowercase());
        }
        assert_eq!(ParameterValue::Text("2.5".to_string()).as_f64(), Some(2.5));
    }

    #[test]
    fn parameter_values_deserialize_untagged() {
        let values: Vec<ParameterValue> =
            serde_json::from_str(r#"[true, 12, 0.5, "between"]"#).expect("values parse");
        assert_eq!(
            values,
            vec![
                ParameterValue::Boolean(true),
                ParameterValue::Integer(12),
                ParameterValue::Float(0.5),
                ParameterValue::Text("between".to_string()),
            ]
        );
        assert_eq!(ParameterValue::from_json(&serde_json::Value::Null), None);
    }
}
