use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};

use super::*;
use crate::config::LlmSettings;
use crate::extraction::{DEFAULT_PARAMETER_TABLE, ParameterTable};
use crate::model::{Candidate, ParameterValue, SourceType};
use crate::segment::SegmentedSections;

const AT: &str = "2024-06-01T00:00:00Z";
const CONTEXT: &str = "## METHODS\nParticipants: 24 were recruited. The mean age was 21.5 years.";

/// Replays canned replies in order and remembers every prompt it saw.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("prompt lock").len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &str, _limits: &GenerationLimits) -> Result<String> {
        self.prompts.lock().expect("prompt lock").push(prompt.to_string());
        match self.replies.lock().expect("reply lock").pop_front() {
            Some(reply) => reply,
            None => bail!("script exhausted"),
        }
    }
}

fn table() -> ParameterTable {
    ParameterTable::load(None, DEFAULT_PARAMETER_TABLE).expect("table loads")
}

fn rule_candidate(parameter: &str, value: ParameterValue) -> Candidate {
    Candidate {
        parameter: parameter.to_string(),
        value,
        confidence: 0.9,
        source_type: SourceType::Rule,
        evidence: String::new(),
        evidence_location: "methods@0".to_string(),
        method_tag: format!("rule:{parameter}#0"),
        extracted_at: AT.to_string(),
    }
}

#[test]
fn parse_strategies_are_tried_in_order() {
    let direct = parse_json_response(r#"{"a": 1}"#).expect("direct");
    assert_eq!(direct.strategy, ParseStrategy::Direct);

    let fenced = parse_json_response("Here you go:\n```json\n{\"a\": 1}\n```\nDone.")
        .expect("fenced");
    assert_eq!(fenced.strategy, ParseStrategy::FenceStripped);

    let scanned = parse_json_response(r#"The answer is {"a": {"b": "}"}} as requested."#)
        .expect("balanced");
    assert_eq!(scanned.strategy, ParseStrategy::BalancedScan);
    assert_eq!(scanned.value["a"]["b"], "}");
}

#[test]
fn empty_and_null_payloads_are_errors() {
    assert_eq!(parse_json_response("   "), Err(ParseErrorKind::Empty));
    assert_eq!(parse_json_response("null"), Err(ParseErrorKind::NullPayload));
    assert_eq!(
        parse_json_response("I could not find anything."),
        Err(ParseErrorKind::NoJson)
    );
}

#[test]
fn progressively_truncated_json_never_panics() {
    let raw = r#"{"parameters": [{"parameter_name": "mean_age", "value": 21.5, "evidence": "mean age was 21.5 years"}]}"#;
    for (cut, _) in raw.char_indices() {
        let _ = recover_json_map(&raw[..cut]);
        let _ = recover_json_map(&raw[cut..]);
    }

    assert!(recover_json_map(raw).contains_key("parameters"));
    assert!(recover_json_map(&raw[..10]).is_empty());
    assert!(recover_json_map("").is_empty());

    // The inner array survives losing the closing brace.
    let truncated = recover_json_map(&raw[..raw.len() - 1]);
    assert!(truncated.contains_key("items"));
}

#[test]
fn budget_refuses_without_spending_and_refunds() {
    let budget = CostBudget::new(0.01);
    let charged = budget.try_charge(0.006).expect("fits");
    let refused = budget.try_charge(0.006).expect_err("over limit");
    assert!((refused.remaining_usd - 0.004).abs() < 1e-9);
    assert!((budget.spent_usd() - 0.006).abs() < 1e-9);

    budget.refund(charged);
    assert_eq!(budget.spent_usd(), 0.0);
    assert!((budget.remaining_usd() - 0.01).abs() < 1e-9);
}

#[test]
fn concurrent_charges_never_overspend() {
    let budget = CostBudget::new(5.0);
    let accepted = std::thread::scope(|scope| {
        let handles = (0..16)
            .map(|_| {
                scope.spawn(|| {
                    (0..1_000)
                        .filter(|_| budget.try_charge(0.001).is_ok())
                        .count()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker joins"))
            .sum::<usize>()
    });

    assert_eq!(accepted, 5_000);
    assert!(budget.spent_usd() <= 5.0 + 1e-9);
    assert!((budget.spent_usd() - 5.0).abs() < 1e-9);
    assert!(budget.try_charge(0.001).is_err());
}

#[test]
fn cost_estimate_counts_prompt_and_completion_tokens() {
    let cost = CostBudget::estimate_cost(4_000, 1_000, 0.002);
    assert!((cost - 0.004).abs() < 1e-12);
}

#[test]
fn verify_keeps_only_evidenced_non_abstained_entries() {
    let reply = r#"{"parameters": {
        "sample_size": {"verified": true, "value": 24, "confidence": 0.9,
                        "evidence": "Participants: 24 were recruited.", "abstained": false},
        "num_trials": {"verified": false, "abstained": true, "evidence": ""},
        "mean_age": {"verified": true, "value": 21.5, "confidence": 0.8, "evidence": ""}
    }}"#;
    let provider = ScriptedProvider::new(vec![Ok(reply.to_string())]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);
    let rules = vec![
        rule_candidate("sample_size", ParameterValue::Integer(24)),
        rule_candidate("num_trials", ParameterValue::Integer(480)),
        rule_candidate("mean_age", ParameterValue::Float(21.5)),
    ];

    let mut calls = Vec::new();
    let verified = engine.verify(CONTEXT, &rules, &table(), AT, &mut calls);

    assert_eq!(verified.len(), 1);
    let accepted = &verified[0];
    assert_eq!(accepted.parameter, "sample_size");
    assert_eq!(accepted.value, ParameterValue::Integer(24));
    assert_eq!(accepted.source_type, SourceType::LlmVerify);
    assert!(accepted.confidence > 0.0 && accepted.confidence <= 0.9);

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].outcome, CallOutcome::Accepted);
    assert_eq!(calls[0].accepted_items, 1);
    assert_eq!(calls[0].rejected_items, 2);
    assert_eq!(calls[0].parse_strategy, Some(ParseStrategy::Direct));
}

#[test]
fn recovered_values_must_clear_the_evidence_floor() {
    let reply = r#"{"parameters": [
        {"parameter_name": "num_groups", "value": 2, "confidence": 0.9, "evidence": "2"},
        {"parameter_name": "mean_age", "value": 21.5, "confidence": 0.3,
         "evidence": "The mean age was 21.5 years", "evidence_location": "participants"},
        {"parameter_name": "sample_size", "value": 30, "confidence": 0.9,
         "evidence": "30 students took part"},
        {"parameter_name": "lunar_phase", "value": "full", "confidence": 0.9,
         "evidence": "testing happened at full moon"}
    ]}"#;
    let provider = ScriptedProvider::new(vec![Ok(reply.to_string())]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let mut calls = Vec::new();
    let recovered = engine.recover_missed(
        CONTEXT,
        &["sample_size".to_string()],
        &table(),
        AT,
        &mut calls,
    );

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].parameter, "mean_age");
    assert_eq!(recovered[0].value, ParameterValue::Float(21.5));
    assert_eq!(recovered[0].source_type, SourceType::LlmMissed);
    assert_eq!(recovered[0].evidence_location, "participants");
    assert_eq!(calls[0].rejected_items, 3);
}

#[test]
fn strict_evidence_raises_the_uncertain_floor() {
    let reply = r#"[{"parameter_name": "mean_age", "value": 21.5, "confidence": 0.3,
                     "evidence": "mean age 21.5 years"}]"#;
    let provider = ScriptedProvider::new(vec![Ok(reply.to_string())]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings {
        strict_evidence: true,
        ..LlmSettings::default()
    };
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let mut calls = Vec::new();
    let recovered = engine.recover_missed(CONTEXT, &[], &table(), AT, &mut calls);
    assert!(recovered.is_empty());
    assert_eq!(calls[0].outcome, CallOutcome::Empty);
}

#[test]
fn provider_failure_refunds_and_is_recorded() {
    let provider = ScriptedProvider::new(vec![Err(anyhow!("connection refused"))]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let mut calls = Vec::new();
    let recovered = engine.recover_missed(CONTEXT, &[], &table(), AT, &mut calls);

    assert!(recovered.is_empty());
    assert_eq!(calls[0].outcome, CallOutcome::ProviderError);
    assert_eq!(budget.spent_usd(), 0.0);
}

#[test]
fn exhausted_budget_skips_the_provider() {
    let provider = ScriptedProvider::new(vec![Ok("{}".to_string())]);
    let budget = CostBudget::new(0.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let mut calls = Vec::new();
    let recovered = engine.recover_missed(CONTEXT, &[], &table(), AT, &mut calls);

    assert!(recovered.is_empty());
    assert_eq!(calls[0].outcome, CallOutcome::BudgetRefused);
    assert_eq!(provider.prompt_count(), 0);
}

#[test]
fn unparseable_reply_gets_one_repair_round_trip() {
    let repaired = r#"{"parameters": {"sample_size": {"verified": true, "value": 24,
        "confidence": 0.9, "evidence": "Participants: 24 were recruited."}}}"#;
    let provider = ScriptedProvider::new(vec![
        Ok("Sure! sample_size is verified (24), evidence: Participants: 24".to_string()),
        Ok(repaired.to_string()),
    ]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);
    let rules = vec![rule_candidate("sample_size", ParameterValue::Integer(24))];

    let mut calls = Vec::new();
    let verified = engine.verify(CONTEXT, &rules, &table(), AT, &mut calls);

    assert_eq!(verified.len(), 1);
    assert_eq!(provider.prompt_count(), 2);
    assert_eq!(calls[0].parse_strategy, Some(ParseStrategy::Repaired));
    assert!(calls[0].cost_usd > 0.0);
}

#[test]
fn repaired_array_reply_still_verifies() {
    let repaired = r#"Here you go: [{"parameter": "sample_size", "verified": true, "value": 24,
        "confidence": 0.9, "evidence": "Participants: 24 were recruited."}]"#;
    let provider = ScriptedProvider::new(vec![
        Ok("sample_size looks right".to_string()),
        Ok(repaired.to_string()),
    ]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);
    let rules = vec![rule_candidate("sample_size", ParameterValue::Integer(24))];

    let mut calls = Vec::new();
    let verified = engine.verify(CONTEXT, &rules, &table(), AT, &mut calls);

    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].value, ParameterValue::Integer(24));
    assert_eq!(calls[0].parse_strategy, Some(ParseStrategy::Repaired));
}

#[test]
fn failed_repair_yields_empty_result() {
    let provider = ScriptedProvider::new(vec![
        Ok("no json here".to_string()),
        Ok("still no json".to_string()),
    ]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);
    let rules = vec![rule_candidate("sample_size", ParameterValue::Integer(24))];

    let mut calls = Vec::new();
    let verified = engine.verify(CONTEXT, &rules, &table(), AT, &mut calls);

    assert!(verified.is_empty());
    assert_eq!(calls[0].outcome, CallOutcome::ParseFailed);
    assert_eq!(provider.prompt_count(), 2);
}

#[test]
fn discovery_filters_thin_evidence_and_ranks_missed_library_first() {
    let reply = r#"{
        "proposals": [
            {"parameter_name": "fixation_duration_ms", "description": "Fixation cross duration",
             "evidence": "A fixation cross appeared for 500 ms before each trial",
             "prevalence": "low", "importance": "low"},
            {"parameter_name": "font_size_pt", "evidence": "in 12 pt",
             "importance": "high"},
            {"parameter_name": "mask_type", "evidence": "Each target was followed by a pattern mask",
             "prevalence": "medium", "importance": "high", "example_values": ["pattern", "noise"]}
        ],
        "missed_library_parameters": [
            {"parameter_name": "mean_age", "evidence": "The mean age was 21.5 years (SD = 2.1)"}
        ]
    }"#;
    let provider = ScriptedProvider::new(vec![Ok(reply.to_string())]);
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let mut calls = Vec::new();
    let proposals = engine.discover(CONTEXT, &["sample_size".to_string()], &table(), &mut calls);

    let names = proposals
        .iter()
        .map(|proposal| proposal.parameter_name.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(names, vec!["mean_age", "mask_type", "fixation_duration_ms"]);
    assert!(proposals[0].missed_library_parameter);
    assert_eq!(proposals[1].example_values, vec!["pattern", "noise"]);
    assert_eq!(calls[0].rejected_items, 1);
}

#[test]
fn ranking_breaks_ties_by_prevalence_then_name() {
    let proposal = |name: &str, importance: f64, prevalence: f64| DiscoveryProposal {
        parameter_name: name.to_string(),
        description: String::new(),
        category: String::new(),
        evidence: String::new(),
        evidence_location: String::new(),
        example_values: Vec::new(),
        units: None,
        prevalence,
        importance,
        mapping_suggestion: None,
        missed_library_parameter: false,
    };
    let mut proposals = vec![
        proposal("b", 2.0, 1.0),
        proposal("a", 2.0, 1.0),
        proposal("c", 2.0, 3.0),
        proposal("d", 3.0, 0.0),
    ];
    rank_proposals(&mut proposals);
    let names = proposals
        .iter()
        .map(|proposal| proposal.parameter_name.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(names, vec!["d", "c", "a", "b"]);
}

#[test]
fn empty_context_makes_no_calls() {
    let provider = ScriptedProvider::new(Vec::new());
    let budget = CostBudget::new(10.0);
    let settings = LlmSettings::default();
    let engine = LlmAssistedEngine::new(&provider, &budget, &settings);

    let extraction = engine.run(
        &SegmentedSections::default(),
        &[rule_candidate("sample_size", ParameterValue::Integer(24))],
        &table(),
        AT,
    );
    assert!(extraction.calls.is_empty());
    assert_eq!(provider.prompt_count(), 0);
}
