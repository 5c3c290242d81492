use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Candidate, ParameterRecord, ParameterValue, SectionKind, SourceType};

#[cfg(test)]
mod tests;

pub const DEFAULT_POLICY_TABLE: &str = include_str!("../../tables/policies.json");

const DEFAULT_MIN_AGREEMENT: usize = 2;
const TOLERANCE_METHOD_TAG: &str = "tolerance_mean";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    Precedence,
    Tolerance {
        percent: f64,
    },
    Consensus {
        #[serde(default = "default_min_agreement")]
        min_agreement: usize,
    },
    Manual,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Precedence => "precedence",
            Strategy::Tolerance { .. } => "tolerance",
            Strategy::Consensus { .. } => "consensus",
            Strategy::Manual => "manual",
        }
    }
}

fn default_min_agreement() -> usize {
    DEFAULT_MIN_AGREEMENT
}

fn default_source_priority() -> Vec<SourceType> {
    vec![
        SourceType::LlmVerify,
        SourceType::Rule,
        SourceType::LlmMissed,
        SourceType::LlmDiscover,
    ]
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    parameter_pattern: String,
    #[serde(flatten)]
    strategy: Strategy,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    version: String,
    #[serde(default = "default_source_priority")]
    source_priority: Vec<SourceType>,
    #[serde(default)]
    default: Option<Strategy>,
    #[serde(default)]
    policies: Vec<PolicyEntry>,
}

#[derive(Debug)]
struct CompiledPolicy {
    pattern: Regex,
    strategy: Strategy,
}

#[derive(Debug)]
pub struct PolicyTable {
    version: String,
    source_priority: Vec<SourceType>,
    default: Strategy,
    policies: Vec<CompiledPolicy>,
}

impl PolicyTable {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read policy table: {}", path.display()))?;
                Self::from_json_str(&raw, &path.display().to_string())
            }
            None => Self::from_json_str(DEFAULT_POLICY_TABLE, "embedded policy table"),
        }
    }

    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(raw)
            .with_context(|| format!("failed to parse policy table: {origin}"))?;

        let mut seen = BTreeSet::new();
        for source in &file.source_priority {
            if !seen.insert(source.as_str()) {
                bail!("source '{}' listed twice in {origin}", source.as_str());
            }
        }

        let mut policies = Vec::with_capacity(file.policies.len());
        for (index, entry) in file.policies.into_iter().enumerate() {
            validate_strategy(&entry.strategy)
                .with_context(|| format!("invalid policy {index} in {origin}"))?;
            let pattern = Regex::new(&format!("^(?:{})$", entry.parameter_pattern))
                .with_context(|| format!("failed to compile policy pattern {index} in {origin}"))?;
            policies.push(CompiledPolicy {
                pattern,
                strategy: entry.strategy,
            });
        }

        let default = file.default.unwrap_or(Strategy::Precedence);
        validate_strategy(&default).with_context(|| format!("invalid default policy in {origin}"))?;

        Ok(Self {
            version: file.version,
            source_priority: file.source_priority,
            default,
            policies,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn strategy_for(&self, parameter: &str) -> &Strategy {
        self.policies
            .iter()
            .find(|policy| policy.pattern.is_match(parameter))
            .map(|policy| &policy.strategy)
            .unwrap_or(&self.default)
    }

    /// Unlisted source types rank after every listed one.
    pub fn priority(&self, source_type: SourceType) -> usize {
        self.source_priority
            .iter()
            .position(|listed| *listed == source_type)
            .unwrap_or(self.source_priority.len())
    }
}

fn validate_strategy(strategy: &Strategy) -> Result<()> {
    match strategy {
        Strategy::Tolerance { percent } if !percent.is_finite() || *percent < 0.0 => {
            bail!("tolerance percent must be a non-negative number, got {percent}")
        }
        Strategy::Consensus { min_agreement } if *min_agreement == 0 => {
            bail!("consensus min_agreement must be at least 1")
        }
        _ => Ok(()),
    }
}

#[derive(Debug)]
pub struct ConflictResolver {
    policies: PolicyTable,
    section_preferences: BTreeMap<String, Vec<SectionKind>>,
}

impl ConflictResolver {
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            policies,
            section_preferences: BTreeMap::new(),
        }
    }

    pub fn with_section_preferences(
        mut self,
        section_preferences: BTreeMap<String, Vec<SectionKind>>,
    ) -> Self {
        self.section_preferences = section_preferences;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn resolve(&self, parameter: &str, candidates: Vec<Candidate>) -> Option<ParameterRecord> {
        let mut ordered = candidates;
        ordered.sort_by(|left, right| self.precedence_order(parameter, left, right));

        if ordered.len() <= 1 {
            let accepted = ordered.pop()?;
            return Some(ParameterRecord {
                parameter: parameter.to_string(),
                accepted,
                alternatives: Vec::new(),
                conflict_detected: false,
                requires_manual_review: false,
                resolution_policy: "single_candidate".to_string(),
            });
        }

        let conflict_detected = distinct_values(&ordered) >= 2;
        let strategy = self.policies.strategy_for(parameter);
        let record = match strategy {
            Strategy::Precedence => take_first(parameter, ordered, conflict_detected, "precedence", false),
            Strategy::Tolerance { percent } => match tolerance_mean(&ordered, *percent) {
                Some(mean) => {
                    let mut accepted = ordered[0].clone();
                    accepted.value = mean;
                    accepted.confidence = ordered
                        .iter()
                        .map(|candidate| candidate.confidence)
                        .fold(0.0, f64::max);
                    accepted.method_tag = TOLERANCE_METHOD_TAG.to_string();
                    ParameterRecord {
                        parameter: parameter.to_string(),
                        accepted,
                        alternatives: ordered,
                        conflict_detected,
                        requires_manual_review: false,
                        resolution_policy: "tolerance".to_string(),
                    }
                }
                None => take_first(
                    parameter,
                    ordered,
                    conflict_detected,
                    "tolerance_fallback_precedence",
                    false,
                ),
            },
            Strategy::Consensus { min_agreement } => {
                match consensus_index(&ordered, *min_agreement) {
                    Some(index) => {
                        let accepted = ordered.remove(index);
                        ParameterRecord {
                            parameter: parameter.to_string(),
                            accepted,
                            alternatives: ordered,
                            conflict_detected,
                            requires_manual_review: false,
                            resolution_policy: "consensus".to_string(),
                        }
                    }
                    None => take_first(
                        parameter,
                        ordered,
                        conflict_detected,
                        "consensus_fallback_manual",
                        true,
                    ),
                }
            }
            Strategy::Manual => take_first(parameter, ordered, conflict_detected, "manual", true),
        };

        debug!(
            parameter,
            policy = %record.resolution_policy,
            candidates = record.alternatives.len() + 1,
            conflict = record.conflict_detected,
            "resolved parameter"
        );
        Some(record)
    }

    pub fn resolve_all(&self, grouped: BTreeMap<String, Vec<Candidate>>) -> Vec<ParameterRecord> {
        grouped
            .into_iter()
            .filter_map(|(parameter, candidates)| self.resolve(&parameter, candidates))
            .collect()
    }

    fn precedence_order(&self, parameter: &str, left: &Candidate, right: &Candidate) -> Ordering {
        self.policies
            .priority(left.source_type)
            .cmp(&self.policies.priority(right.source_type))
            .then_with(|| right.confidence.total_cmp(&left.confidence))
            .then_with(|| {
                self.section_rank(parameter, left)
                    .cmp(&self.section_rank(parameter, right))
            })
            .then_with(|| left.value.normalized_key().cmp(&right.value.normalized_key()))
            .then_with(|| left.evidence_location.cmp(&right.evidence_location))
            .then_with(|| left.method_tag.cmp(&right.method_tag))
            .then_with(|| left.evidence.cmp(&right.evidence))
    }

    fn section_rank(&self, parameter: &str, candidate: &Candidate) -> usize {
        let Some(preferred) = self.section_preferences.get(parameter) else {
            return 0;
        };
        candidate
            .evidence_location
            .split_once('@')
            .and_then(|(label, _)| SectionKind::from_label(label))
            .and_then(|kind| preferred.iter().position(|listed| *listed == kind))
            .unwrap_or(preferred.len())
    }
}

fn take_first(
    parameter: &str,
    mut ordered: Vec<Candidate>,
    conflict_detected: bool,
    policy: &str,
    requires_manual_review: bool,
) -> ParameterRecord {
    let accepted = ordered.remove(0);
    ParameterRecord {
        parameter: parameter.to_string(),
        accepted,
        alternatives: ordered,
        conflict_detected,
        requires_manual_review,
        resolution_policy: policy.to_string(),
    }
}

fn distinct_values(candidates: &[Candidate]) -> usize {
    candidates
        .iter()
        .map(|candidate| candidate.value.normalized_key())
        .collect::<BTreeSet<String>>()
        .len()
}

fn tolerance_mean(candidates: &[Candidate], percent: f64) -> Option<ParameterValue> {
    let values = candidates
        .iter()
        .map(|candidate| candidate.value.as_f64())
        .collect::<Option<Vec<f64>>>()?;
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let allowed = mean.abs() * percent / 100.0;
    if values.iter().any(|value| (value - mean).abs() > allowed + f64::EPSILON) {
        return None;
    }

    let all_integers = candidates
        .iter()
        .all(|candidate| matches!(candidate.value, ParameterValue::Integer(_)));
    if all_integers && mean.fract() == 0.0 {
        Some(ParameterValue::Integer(mean as i64))
    } else {
        Some(ParameterValue::Float(mean))
    }
}

/// Index of the highest-precedence member of the most frequent value, if frequent enough.
/// Ties between values go to the one whose best member ranks first.
fn consensus_index(ordered: &[Candidate], min_agreement: usize) -> Option<usize> {
    let mut tallies = Vec::<(String, usize, usize)>::new();
    for (index, candidate) in ordered.iter().enumerate() {
        let key = candidate.value.normalized_key();
        match tallies.iter_mut().find(|(existing, _, _)| *existing == key) {
            Some((_, count, _)) => *count += 1,
            None => tallies.push((key, 1, index)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (_, count, first) in tallies {
        if best.is_none_or(|(best_count, _)| count > best_count) {
            best = Some((count, first));
        }
    }
    best.filter(|(count, _)| *count >= min_agreement)
        .map(|(_, first)| first)
}
