use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::convert::convert_value;
use super::derive::SampleSizeDeriver;
use super::scoring::{CONTEXT_RADIUS, MatchContext, context_window, score_match_context};
use super::table::{CompiledParameter, ParameterTable};
use crate::model::{Candidate, SectionKind, Segment, SourceType};
use crate::segment::SegmentedSections;

pub const FALLBACK_PENALTY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleOrigin {
    Primary,
    Fallback,
}

impl RuleOrigin {
    fn tag(self) -> &'static str {
        match self {
            RuleOrigin::Primary => "rule",
            RuleOrigin::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub rule_matches: usize,
    pub conversion_failures: usize,
    pub implausible_skipped: usize,
    pub fallback_candidates: usize,
    pub derived_candidates: usize,
}

impl ExtractionStats {
    pub fn absorb(&mut self, other: &ExtractionStats) {
        self.rule_matches += other.rule_matches;
        self.conversion_failures += other.conversion_failures;
        self.implausible_skipped += other.implausible_skipped;
        self.fallback_candidates += other.fallback_candidates;
        self.derived_candidates += other.derived_candidates;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionExtraction {
    pub candidates: Vec<Candidate>,
    pub stats: ExtractionStats,
}

pub fn section_boost(kind: SectionKind) -> f64 {
    match kind {
        SectionKind::Methods | SectionKind::Participants => 1.0,
        SectionKind::Results => 0.85,
        SectionKind::Abstract => 0.8,
        SectionKind::Other => 0.75,
        SectionKind::Introduction | SectionKind::Discussion => 0.6,
    }
}

#[derive(Debug)]
pub struct PatternExtractionEngine {
    primary: ParameterTable,
    fallback: ParameterTable,
    deriver: SampleSizeDeriver,
}

impl PatternExtractionEngine {
    pub fn new(primary: ParameterTable, fallback: ParameterTable) -> Result<Self> {
        Ok(Self {
            primary,
            fallback,
            deriver: SampleSizeDeriver::new()?,
        })
    }

    pub fn primary(&self) -> &ParameterTable {
        &self.primary
    }

    pub fn fallback(&self) -> &ParameterTable {
        &self.fallback
    }

    pub fn extract_segment(
        &self,
        segment: &Segment,
        extracted_at: &str,
        stats: &mut ExtractionStats,
    ) -> Vec<Candidate> {
        self.primary
            .entries()
            .iter()
            .filter(|entry| entry.spec.applies_to(segment.kind))
            .filter_map(|entry| {
                best_candidate(entry, segment, RuleOrigin::Primary, extracted_at, stats)
            })
            .collect()
    }

    pub fn extract_sections(
        &self,
        sections: &SegmentedSections,
        extracted_at: &str,
    ) -> SectionExtraction {
        let mut stats = ExtractionStats::default();
        let mut candidates = Vec::<Candidate>::new();

        for segment in sections.segments() {
            candidates.extend(self.extract_segment(segment, extracted_at, &mut stats));
        }

        let found = candidates
            .iter()
            .map(|candidate| candidate.parameter.clone())
            .collect::<BTreeSet<String>>();
        for entry in self.fallback.entries() {
            if found.contains(&entry.spec.name) {
                continue;
            }
            for segment in sections.segments() {
                if !entry.spec.applies_to(segment.kind) {
                    continue;
                }
                if let Some(candidate) =
                    best_candidate(entry, segment, RuleOrigin::Fallback, extracted_at, &mut stats)
                {
                    stats.fallback_candidates += 1;
                    candidates.push(candidate);
                }
            }
        }

        let texts = sections
            .segments()
            .map(|segment| (segment.kind.as_str(), segment.text.as_str()))
            .collect::<Vec<(&str, &str)>>();
        if self.deriver.derive(&mut candidates, &texts, extracted_at) {
            stats.derived_candidates += 1;
        }

        debug!(
            candidates = candidates.len(),
            rule_matches = stats.rule_matches,
            conversion_failures = stats.conversion_failures,
            "pattern extraction complete"
        );
        SectionExtraction { candidates, stats }
    }
}

pub fn group_by_parameter(candidates: Vec<Candidate>) -> BTreeMap<String, Vec<Candidate>> {
    let mut grouped = BTreeMap::<String, Vec<Candidate>>::new();
    for candidate in candidates {
        grouped
            .entry(candidate.parameter.clone())
            .or_default()
            .push(candidate);
    }
    grouped
}

fn best_candidate(
    entry: &CompiledParameter,
    segment: &Segment,
    origin: RuleOrigin,
    extracted_at: &str,
    stats: &mut ExtractionStats,
) -> Option<Candidate> {
    let spec = &entry.spec;
    let boost = section_boost(segment.kind);
    let penalty = match origin {
        RuleOrigin::Primary => 1.0,
        RuleOrigin::Fallback => FALLBACK_PENALTY,
    };
    let mut best: Option<Candidate> = None;

    for (rule_index, rule) in entry.rules.iter().enumerate() {
        for captures in rule.captures_iter(&segment.text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let value_match = captures.get(1).unwrap_or(whole);
            stats.rule_matches += 1;

            let converted = match convert_value(value_match.as_str(), spec) {
                Ok(converted) => converted,
                Err(err) => {
                    stats.conversion_failures += 1;
                    debug!(parameter = %spec.name, error = %err, "dropping unconvertible match");
                    continue;
                }
            };

            if let (Some(ceiling), Some(number)) =
                (spec.plausibility_ceiling(), converted.value.as_f64())
                && number > ceiling
            {
                stats.implausible_skipped += 1;
                debug!(parameter = %spec.name, value = number, "skipping implausible value");
                continue;
            }

            let context = MatchContext {
                window: context_window(&segment.text, whole.start(), whole.end(), CONTEXT_RADIUS),
                parameter: &spec.name,
                keywords: &spec.keywords,
                raw_value: value_match.as_str(),
                matched: whole.as_str(),
                unit_family: spec.unit_family,
            };
            let confidence =
                (converted.base_confidence * score_match_context(&context) * boost * penalty)
                    .clamp(0.0, 1.0);

            if best
                .as_ref()
                .is_some_and(|current| current.confidence >= confidence)
            {
                continue;
            }
            best = Some(Candidate {
                parameter: spec.name.clone(),
                value: converted.value,
                confidence,
                source_type: SourceType::Rule,
                evidence: whole.as_str().trim().to_string(),
                evidence_location: format!("{}@{}", segment.kind, whole.start()),
                method_tag: format!("{}:{}#{rule_index}", origin.tag(), spec.name),
                extracted_at: extracted_at.to_string(),
            });
        }
    }

    best
}
