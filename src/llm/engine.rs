use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::budget::CostBudget;
use super::prompts::{build_context, discover_prompt, recover_prompt, repair_prompt, verify_prompt};
use super::provider::{GenerationLimits, LlmProvider};
use super::response::{
    ParseStrategy, ParsedJson, items_under, parse_json_response, recover_json_map,
};
use crate::config::LlmSettings;
use crate::extraction::{MatchContext, ParameterTable, convert_value, score_match_context};
use crate::model::{Candidate, ParameterValue, SourceType};
use crate::segment::SegmentedSections;

const DEFAULT_REPORTED_CONFIDENCE: f64 = 0.5;
const DEFAULT_VERIFIED_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Verify,
    RecoverMissed,
    Discover,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Verify => "verify",
            RequestKind::RecoverMissed => "recover_missed",
            RequestKind::Discover => "discover",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Accepted,
    Empty,
    ParseFailed,
    ProviderError,
    BudgetRefused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub request: RequestKind,
    pub outcome: CallOutcome,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub parse_strategy: Option<ParseStrategy>,
    pub cost_usd: f64,
    pub accepted_items: usize,
    pub rejected_items: usize,
}

impl LlmCallRecord {
    fn new(request: RequestKind, prompt_chars: usize) -> Self {
        Self {
            request,
            outcome: CallOutcome::Empty,
            prompt_chars,
            response_chars: 0,
            parse_strategy: None,
            cost_usd: 0.0,
            accepted_items: 0,
            rejected_items: 0,
        }
    }

    fn settle(&mut self, accepted: usize, rejected: usize) {
        self.accepted_items = accepted;
        self.rejected_items = rejected;
        self.outcome = if accepted > 0 {
            CallOutcome::Accepted
        } else {
            CallOutcome::Empty
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryProposal {
    pub parameter_name: String,
    pub description: String,
    pub category: String,
    pub evidence: String,
    pub evidence_location: String,
    pub example_values: Vec<String>,
    pub units: Option<String>,
    pub prevalence: f64,
    pub importance: f64,
    pub mapping_suggestion: Option<String>,
    pub missed_library_parameter: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmExtraction {
    pub candidates: Vec<Candidate>,
    pub proposals: Vec<DiscoveryProposal>,
    pub calls: Vec<LlmCallRecord>,
}

pub struct LlmAssistedEngine<'a> {
    provider: &'a dyn LlmProvider,
    budget: &'a CostBudget,
    settings: &'a LlmSettings,
    limits: GenerationLimits,
}

impl<'a> LlmAssistedEngine<'a> {
    pub fn new(
        provider: &'a dyn LlmProvider,
        budget: &'a CostBudget,
        settings: &'a LlmSettings,
    ) -> Self {
        Self {
            provider,
            budget,
            settings,
            limits: GenerationLimits::from_settings(settings),
        }
    }

    pub fn run(
        &self,
        sections: &SegmentedSections,
        rule_candidates: &[Candidate],
        table: &ParameterTable,
        extracted_at: &str,
    ) -> LlmExtraction {
        let mut extraction = LlmExtraction::default();
        let context = build_context(sections, self.settings);
        if context.trim().is_empty() {
            debug!("no context for llm requests");
            return extraction;
        }

        if self.settings.verify && !rule_candidates.is_empty() {
            let verified = self.verify(&context, rule_candidates, table, extracted_at, &mut extraction.calls);
            extraction.candidates.extend(verified);
        }

        let mut extracted = rule_candidates
            .iter()
            .chain(extraction.candidates.iter())
            .map(|candidate| candidate.parameter.clone())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect::<Vec<String>>();

        if self.settings.recover_missed {
            let recovered =
                self.recover_missed(&context, &extracted, table, extracted_at, &mut extraction.calls);
            extracted.extend(recovered.iter().map(|candidate| candidate.parameter.clone()));
            extraction.candidates.extend(recovered);
        }

        if self.settings.discover {
            extraction.proposals = self.discover(&context, &extracted, table, &mut extraction.calls);
        }

        info!(
            provider = self.provider.name(),
            candidates = extraction.candidates.len(),
            proposals = extraction.proposals.len(),
            calls = extraction.calls.len(),
            spent_usd = self.budget.spent_usd(),
            "llm-assisted extraction complete"
        );
        extraction
    }

    pub fn verify(
        &self,
        context: &str,
        rule_candidates: &[Candidate],
        table: &ParameterTable,
        extracted_at: &str,
        calls: &mut Vec<LlmCallRecord>,
    ) -> Vec<Candidate> {
        let best = best_per_parameter(rule_candidates);
        let prompt = verify_prompt(&best, context);
        let (parsed, mut record) = self.request(RequestKind::Verify, &prompt);
        let Some(parsed) = parsed else {
            calls.push(record);
            return Vec::new();
        };

        let entries = verify_entries(&parsed.value);
        let mut accepted = Vec::new();
        let mut rejected = 0usize;

        for original in &best {
            let Some(entry) = entries.get(&original.parameter) else {
                continue;
            };
            if bool_field(entry, "abstained").unwrap_or(false) {
                debug!(parameter = %original.parameter, "verifier abstained");
                rejected += 1;
                continue;
            }
            let evidence = string_field(entry, "evidence").unwrap_or_default();
            if self.settings.require_evidence && evidence.is_empty() {
                debug!(parameter = %original.parameter, "verification without evidence rejected");
                rejected += 1;
                continue;
            }

            let verified = bool_field(entry, "verified").unwrap_or(false);
            let reported = entry.get("value").and_then(ParameterValue::from_json);
            let value = match (verified, reported) {
                (_, Some(value)) => match coerce_to_table(table, &original.parameter, value) {
                    Some(value) => value,
                    None => {
                        rejected += 1;
                        continue;
                    }
                },
                (true, None) => original.value.clone(),
                (false, None) => {
                    rejected += 1;
                    continue;
                }
            };

            let reported_confidence =
                number_field(entry, "confidence").unwrap_or(DEFAULT_VERIFIED_CONFIDENCE);
            accepted.push(self.candidate(
                table,
                &original.parameter,
                value,
                reported_confidence,
                SourceType::LlmVerify,
                evidence,
                original.evidence_location.clone(),
                extracted_at,
            ));
        }

        record.settle(accepted.len(), rejected);
        calls.push(record);
        accepted
    }

    pub fn recover_missed(
        &self,
        context: &str,
        extracted: &[String],
        table: &ParameterTable,
        extracted_at: &str,
        calls: &mut Vec<LlmCallRecord>,
    ) -> Vec<Candidate> {
        let prompt = recover_prompt(&table.describe(), extracted, context);
        let (parsed, mut record) = self.request(RequestKind::RecoverMissed, &prompt);
        let Some(parsed) = parsed else {
            calls.push(record);
            return Vec::new();
        };

        let mut seen = extracted.iter().cloned().collect::<BTreeSet<String>>();
        let mut accepted = Vec::new();
        let mut rejected = 0usize;

        for item in items_under(&parsed.value, &["parameters", "missed_parameters", "items"]) {
            let Some(name) = string_field(&item, "parameter_name")
                .or_else(|| string_field(&item, "parameter"))
            else {
                rejected += 1;
                continue;
            };
            if !table.contains(&name) || seen.contains(&name) {
                debug!(parameter = %name, "recovered parameter unknown or already extracted");
                rejected += 1;
                continue;
            }

            let confidence = number_field(&item, "confidence")
                .unwrap_or(DEFAULT_REPORTED_CONFIDENCE)
                .clamp(0.0, 1.0);
            let evidence = string_field(&item, "evidence").unwrap_or_default();
            let floor = self.settings.evidence_floor(confidence);
            if evidence.chars().count() < floor {
                debug!(
                    parameter = %name,
                    evidence_chars = evidence.chars().count(),
                    floor,
                    "recovered value below evidence floor"
                );
                rejected += 1;
                continue;
            }

            let Some(value) = item
                .get("value")
                .and_then(ParameterValue::from_json)
                .and_then(|value| coerce_to_table(table, &name, value))
            else {
                rejected += 1;
                continue;
            };

            let location = string_field(&item, "evidence_location").unwrap_or_else(|| "paper".to_string());
            seen.insert(name.clone());
            accepted.push(self.candidate(
                table,
                &name,
                value,
                confidence,
                SourceType::LlmMissed,
                evidence,
                location,
                extracted_at,
            ));
        }

        record.settle(accepted.len(), rejected);
        calls.push(record);
        accepted
    }

    pub fn discover(
        &self,
        context: &str,
        extracted: &[String],
        table: &ParameterTable,
        calls: &mut Vec<LlmCallRecord>,
    ) -> Vec<DiscoveryProposal> {
        let prompt = discover_prompt(&table.describe(), extracted, context);
        let (parsed, mut record) = self.request(RequestKind::Discover, &prompt);
        let Some(parsed) = parsed else {
            calls.push(record);
            return Vec::new();
        };

        let mut proposals = Vec::new();
        let mut rejected = 0usize;
        let novel = items_under(&parsed.value, &["proposals", "parameters", "items"]);
        let missed = items_under(&parsed.value, &["missed_library_parameters"]);

        for (item, flagged) in novel
            .iter()
            .map(|item| (item, false))
            .chain(missed.iter().map(|item| (item, true)))
        {
            let Some(name) = string_field(item, "parameter_name") else {
                rejected += 1;
                continue;
            };
            let evidence = string_field(item, "evidence").unwrap_or_default();
            if evidence.chars().count() < self.settings.discovery_min_evidence_chars {
                debug!(parameter = %name, "discovery proposal without enough evidence");
                rejected += 1;
                continue;
            }

            let missed_library_parameter = flagged
                || bool_field(item, "missed_library_parameter").unwrap_or(false)
                || table.contains(&name);
            if missed_library_parameter && extracted.contains(&name) {
                rejected += 1;
                continue;
            }

            proposals.push(DiscoveryProposal {
                description: string_field(item, "description").unwrap_or_default(),
                category: string_field(item, "category").unwrap_or_default(),
                evidence,
                evidence_location: string_field(item, "evidence_location")
                    .unwrap_or_else(|| "paper".to_string()),
                example_values: string_list(item.get("example_values")),
                units: string_field(item, "units"),
                prevalence: rank_score(item.get("prevalence")),
                importance: rank_score(item.get("importance")),
                mapping_suggestion: string_field(item, "mapping_suggestion"),
                missed_library_parameter,
                parameter_name: name,
            });
        }

        rank_proposals(&mut proposals);
        let mut named = BTreeSet::new();
        proposals.retain(|proposal| named.insert(proposal.parameter_name.clone()));
        record.settle(proposals.len(), rejected);
        calls.push(record);
        proposals
    }

    /// A repaired bare array arrives wrapped as `{"items": [...]}`.
    fn request(&self, kind: RequestKind, prompt: &str) -> (Option<ParsedJson>, LlmCallRecord) {
        let mut record = LlmCallRecord::new(kind, prompt.chars().count());

        let Some(raw) = self.budgeted_generate(prompt, &mut record) else {
            return (None, record);
        };
        record.response_chars = raw.chars().count();

        match parse_json_response(&raw) {
            Ok(parsed) => {
                record.parse_strategy = Some(parsed.strategy);
                return (Some(parsed), record);
            }
            Err(err) => {
                debug!(request = kind.as_str(), error = %err, "llm response unparseable, requesting repair");
            }
        }

        let Some(repaired) = self.budgeted_generate(&repair_prompt(&raw), &mut record) else {
            if record.outcome != CallOutcome::BudgetRefused {
                record.outcome = CallOutcome::ParseFailed;
            }
            return (None, record);
        };

        let repaired = recover_json_map(&repaired);
        if repaired.is_empty() {
            warn!(request = kind.as_str(), "llm response unparseable after repair");
            record.outcome = CallOutcome::ParseFailed;
            return (None, record);
        }
        record.parse_strategy = Some(ParseStrategy::Repaired);
        (
            Some(ParsedJson {
                value: Value::Object(repaired),
                strategy: ParseStrategy::Repaired,
            }),
            record,
        )
    }

    fn budgeted_generate(&self, prompt: &str, record: &mut LlmCallRecord) -> Option<String> {
        let cost = CostBudget::estimate_cost(
            prompt.chars().count(),
            self.limits.max_tokens,
            self.settings.price_per_1k_tokens_usd,
        );
        let charged = match self.budget.try_charge(cost) {
            Ok(charged) => charged,
            Err(err) => {
                warn!(request = record.request.as_str(), error = %err, "llm call refused");
                record.outcome = CallOutcome::BudgetRefused;
                return None;
            }
        };

        match self.provider.generate(prompt, &self.limits) {
            Ok(raw) => {
                record.cost_usd += cost;
                Some(raw)
            }
            Err(err) => {
                self.budget.refund(charged);
                let message = format!("{err:#}");
                warn!(
                    request = record.request.as_str(),
                    provider = self.provider.name(),
                    error = %message,
                    "llm provider call failed"
                );
                record.outcome = CallOutcome::ProviderError;
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn candidate(
        &self,
        table: &ParameterTable,
        parameter: &str,
        value: ParameterValue,
        reported_confidence: f64,
        source_type: SourceType,
        evidence: String,
        evidence_location: String,
        extracted_at: &str,
    ) -> Candidate {
        let raw_value = value.to_string();
        let spec = table.get(parameter).map(|entry| &entry.spec);
        let keywords = spec.map(|spec| spec.keywords.as_slice()).unwrap_or_default();
        let unit_family = spec.and_then(|spec| spec.unit_family);
        let context_score = score_match_context(&MatchContext {
            window: &evidence,
            parameter,
            keywords,
            raw_value: &raw_value,
            matched: &evidence,
            unit_family,
        });

        Candidate {
            parameter: parameter.to_string(),
            value,
            confidence: (reported_confidence.clamp(0.0, 1.0) * context_score).clamp(0.0, 1.0),
            source_type,
            evidence,
            evidence_location,
            method_tag: method_tag(source_type).to_string(),
            extracted_at: extracted_at.to_string(),
        }
    }
}

fn method_tag(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Rule => "rule",
        SourceType::LlmVerify => "llm:verify",
        SourceType::LlmMissed => "llm:missed",
        SourceType::LlmDiscover => "llm:discover",
    }
}

fn best_per_parameter(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut best = BTreeMap::<&str, &Candidate>::new();
    for candidate in candidates {
        best.entry(candidate.parameter.as_str())
            .and_modify(|current| {
                if candidate.confidence > current.confidence {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }
    best.into_values().cloned().collect()
}

fn verify_entries(value: &Value) -> BTreeMap<String, Map<String, Value>> {
    let mut entries = BTreeMap::new();
    let container = value
        .get("parameters")
        .or_else(|| value.get("items"))
        .unwrap_or(value);
    match container {
        Value::Object(map) => {
            for (name, entry) in map {
                if let Value::Object(fields) = entry {
                    entries.insert(name.clone(), fields.clone());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Object(fields) = item
                    && let Some(name) = fields
                        .get("parameter")
                        .or_else(|| fields.get("parameter_name"))
                        .and_then(Value::as_str)
                {
                    entries.insert(name.to_string(), fields.clone());
                }
            }
        }
        _ => {}
    }
    entries
}

fn coerce_to_table(table: &ParameterTable, parameter: &str, value: ParameterValue) -> Option<ParameterValue> {
    let Some(entry) = table.get(parameter) else {
        return Some(value);
    };
    match convert_value(&value.to_string(), &entry.spec) {
        Ok(converted) => Some(converted.value),
        Err(err) => {
            debug!(parameter, error = %err, "llm value does not fit parameter type");
            None
        }
    }
}

fn string_field<T: FieldSource + ?Sized>(source: &T, key: &str) -> Option<String> {
    source
        .field(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn bool_field<T: FieldSource + ?Sized>(source: &T, key: &str) -> Option<bool> {
    match source.field(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn number_field<T: FieldSource + ?Sized>(source: &T, key: &str) -> Option<f64> {
    match source.field(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|text| !text.is_empty())
            .collect(),
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.trim().to_string()],
        _ => Vec::new(),
    }
}

fn rank_score(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => 3.0,
            "medium" | "moderate" => 2.0,
            "low" => 1.0,
            other => other.parse::<f64>().unwrap_or(0.0),
        },
        _ => 0.0,
    }
}

pub fn rank_proposals(proposals: &mut [DiscoveryProposal]) {
    proposals.sort_by(|left, right| {
        right
            .missed_library_parameter
            .cmp(&left.missed_library_parameter)
            .then_with(|| right.importance.total_cmp(&left.importance))
            .then_with(|| right.prevalence.total_cmp(&left.prevalence))
            .then_with(|| left.parameter_name.cmp(&right.parameter_name))
    });
}

trait FieldSource {
    fn field(&self, key: &str) -> Option<&Value>;
}

impl FieldSource for Value {
    fn field(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}
