use std::collections::BTreeMap;

use super::*;
use crate::model::{Candidate, ParameterValue, SectionKind, SourceType};

fn resolver() -> ConflictResolver {
    ConflictResolver::new(PolicyTable::load(None).expect("policy table loads"))
}

fn candidate(parameter: &str, value: ParameterValue, confidence: f64, source_type: SourceType) -> Candidate {
    Candidate {
        parameter: parameter.to_string(),
        value,
        confidence,
        source_type,
        evidence: format!("evidence {confidence}"),
        evidence_location: "methods@0".to_string(),
        method_tag: format!("{}:{parameter}", source_type.as_str()),
        extracted_at: "2024-06-01T00:00:00Z".to_string(),
    }
}

#[test]
fn single_candidate_is_accepted_without_conflict() {
    let record = resolver()
        .resolve(
            "sample_size",
            vec![candidate("sample_size", ParameterValue::Integer(24), 0.7, SourceType::Rule)],
        )
        .expect("record");
    assert_eq!(record.accepted.value, ParameterValue::Integer(24));
    assert!(record.alternatives.is_empty());
    assert!(!record.conflict_detected);
    assert!(!record.requires_manual_review);
    assert_eq!(record.resolution_policy, "single_candidate");
}

#[test]
fn nothing_to_resolve_yields_none() {
    assert!(resolver().resolve("sample_size", Vec::new()).is_none());
}

#[test]
fn precedence_follows_source_priority_before_confidence() {
    let record = resolver()
        .resolve(
            "sample_size",
            vec![
                candidate("sample_size", ParameterValue::Integer(24), 0.95, SourceType::Rule),
                candidate("sample_size", ParameterValue::Integer(30), 0.6, SourceType::LlmMissed),
                candidate("sample_size", ParameterValue::Integer(26), 0.7, SourceType::LlmVerify),
            ],
        )
        .expect("record");

    assert_eq!(record.resolution_policy, "precedence");
    assert_eq!(record.accepted.value, ParameterValue::Integer(26));
    assert_eq!(record.accepted.source_type, SourceType::LlmVerify);
    let alternatives = record
        .alternatives
        .iter()
        .map(|alternative| alternative.source_type)
        .collect::<Vec<SourceType>>();
    assert_eq!(alternatives, vec![SourceType::Rule, SourceType::LlmMissed]);
    assert!(record.conflict_detected);
}

#[test]
fn agreeing_candidates_are_not_a_conflict() {
    let record = resolver()
        .resolve(
            "num_trials",
            vec![
                candidate("num_trials", ParameterValue::Integer(480), 0.9, SourceType::Rule),
                candidate("num_trials", ParameterValue::Float(480.0), 0.8, SourceType::LlmVerify),
            ],
        )
        .expect("record");
    assert!(!record.conflict_detected);
    assert_eq!(record.alternatives.len(), 1);
}

#[test]
fn tolerance_accepts_mean_within_percent() {
    let record = resolver()
        .resolve(
            "mean_age",
            vec![
                candidate("mean_age", ParameterValue::Float(21.0), 0.8, SourceType::Rule),
                candidate("mean_age", ParameterValue::Float(22.0), 0.9, SourceType::LlmVerify),
            ],
        )
        .expect("record");

    assert_eq!(record.resolution_policy, "tolerance");
    assert_eq!(record.accepted.value, ParameterValue::Float(21.5));
    assert_eq!(record.accepted.method_tag, "tolerance_mean");
    assert_eq!(record.accepted.confidence, 0.9);
    assert_eq!(record.alternatives.len(), 2);
    assert!(record.conflict_detected);
}

#[test]
fn tolerance_falls_back_to_precedence_when_spread_is_wide() {
    let record = resolver()
        .resolve(
            "mean_age",
            vec![
                candidate("mean_age", ParameterValue::Float(19.0), 0.8, SourceType::Rule),
                candidate("mean_age", ParameterValue::Float(24.0), 0.6, SourceType::LlmMissed),
            ],
        )
        .expect("record");
    assert_eq!(record.resolution_policy, "tolerance_fallback_precedence");
    assert_eq!(record.accepted.value, ParameterValue::Float(19.0));
}

#[test]
fn declared_section_order_breaks_confidence_ties() {
    let located = |value: i64, location: &str| Candidate {
        evidence_location: location.to_string(),
        ..candidate("sample_size", ParameterValue::Integer(value), 0.7, SourceType::Rule)
    };
    let candidates = vec![located(20, "results@5"), located(24, "participants@40")];

    let unordered = resolver()
        .resolve("sample_size", candidates.clone())
        .expect("record");
    assert_eq!(unordered.accepted.value, ParameterValue::Integer(20));

    let preferred = resolver()
        .with_section_preferences(BTreeMap::from([(
            "sample_size".to_string(),
            vec![SectionKind::Participants, SectionKind::Methods, SectionKind::Results],
        )]))
        .resolve("sample_size", candidates)
        .expect("record");
    assert_eq!(preferred.accepted.value, ParameterValue::Integer(24));
    assert_eq!(preferred.resolution_policy, "precedence");
    assert!(preferred.conflict_detected);
}

#[test]
fn non_finite_text_never_becomes_a_tolerance_mean() {
    let record = resolver()
        .resolve(
            "mean_age",
            vec![
                candidate("mean_age", ParameterValue::Float(21.0), 0.8, SourceType::Rule),
                candidate("mean_age", ParameterValue::Text("NaN".to_string()), 0.9, SourceType::LlmMissed),
            ],
        )
        .expect("record");
    assert_eq!(record.resolution_policy, "tolerance_fallback_precedence");
    assert_eq!(record.accepted.value, ParameterValue::Float(21.0));
}

#[test]
fn consensus_takes_majority_value() {
    let within = ParameterValue::Text("within-subjects".to_string());
    let between = ParameterValue::Text("between-subjects".to_string());
    let record = resolver()
        .resolve(
            "design_type",
            vec![
                candidate("design_type", between.clone(), 0.9, SourceType::LlmVerify),
                candidate("design_type", within.clone(), 0.7, SourceType::Rule),
                candidate("design_type", within.clone(), 0.6, SourceType::LlmMissed),
            ],
        )
        .expect("record");
    assert_eq!(record.resolution_policy, "consensus");
    assert_eq!(record.accepted.value, within);
    assert_eq!(record.accepted.source_type, SourceType::Rule);
    assert!(!record.requires_manual_review);
}

#[test]
fn consensus_without_agreement_goes_to_manual_review() {
    let record = resolver()
        .resolve(
            "design_type",
            vec![
                candidate("design_type", ParameterValue::Text("mixed".into()), 0.9, SourceType::Rule),
                candidate(
                    "design_type",
                    ParameterValue::Text("within-subjects".into()),
                    0.7,
                    SourceType::LlmMissed,
                ),
            ],
        )
        .expect("record");
    assert_eq!(record.resolution_policy, "consensus_fallback_manual");
    assert!(record.requires_manual_review);
    assert_eq!(record.accepted.value, ParameterValue::Text("mixed".into()));
}

#[test]
fn manual_policy_flags_review() {
    let record = resolver()
        .resolve(
            "response_device",
            vec![
                candidate("response_device", ParameterValue::Text("keyboard".into()), 0.7, SourceType::Rule),
                candidate("response_device", ParameterValue::Text("button box".into()), 0.7, SourceType::LlmMissed),
            ],
        )
        .expect("record");
    assert_eq!(record.resolution_policy, "manual");
    assert!(record.requires_manual_review);
    assert_eq!(record.accepted.value, ParameterValue::Text("keyboard".into()));
}

#[test]
fn resolution_is_independent_of_input_order() {
    let candidates = vec![
        candidate("sample_size", ParameterValue::Integer(24), 0.8, SourceType::Rule),
        candidate("sample_size", ParameterValue::Integer(48), 0.8, SourceType::Rule),
        candidate("sample_size", ParameterValue::Integer(30), 0.9, SourceType::LlmMissed),
        candidate("sample_size", ParameterValue::Integer(20), 0.8, SourceType::Rule),
    ];
    let mut reversed = candidates.clone();
    reversed.reverse();

    let resolver = resolver();
    let first = resolver.resolve("sample_size", candidates).expect("record");
    let second = resolver.resolve("sample_size", reversed).expect("record");
    assert_eq!(first, second);
    assert_eq!(first.accepted.value, ParameterValue::Integer(20));
}

#[test]
fn unmatched_parameter_defaults_to_precedence() {
    let table = PolicyTable::load(None).expect("policy table loads");
    assert_eq!(table.strategy_for("num_blocks"), &Strategy::Precedence);
    assert_eq!(table.strategy_for("mean_age"), &Strategy::Tolerance { percent: 5.0 });
    // Patterns match whole names only.
    assert_eq!(table.strategy_for("mean_age_sd"), &Strategy::Precedence);
}

#[test]
fn malformed_policy_tables_are_rejected() {
    let cases = [
        r#"{"version": "x", "policies": [{"parameter_pattern": "(", "strategy": "manual"}]}"#,
        r#"{"version": "x", "policies": [{"parameter_pattern": "a", "strategy": "tolerance", "percent": -1}]}"#,
        r#"{"version": "x", "policies": [{"parameter_pattern": "a", "strategy": "consensus", "min_agreement": 0}]}"#,
        r#"{"version": "x", "policies": [{"parameter_pattern": "a", "strategy": "vote"}]}"#,
        r#"{"version": "x", "source_priority": ["rule", "rule"]}"#,
    ];
    for raw in cases {
        assert!(PolicyTable::from_json_str(raw, "test").is_err(), "accepted: {raw}");
    }
}
