use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use super::convert::parse_number_words;
use crate::model::{Candidate, ParameterValue, SourceType};

pub const TOTAL_SAMPLE_SIZE: &str = "sample_size";
pub const PER_GROUP_SAMPLE_SIZE: &str = "sample_size_per_group";
pub const GROUP_COUNT: &str = "num_groups";

const DERIVED_METHOD_TAG: &str = "derived:per_group_x_groups";
const DERIVED_CONFIDENCE_FACTOR: f64 = 0.9;

#[derive(Debug)]
pub struct SampleSizeDeriver {
    factorial: Regex,
}

impl SampleSizeDeriver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            factorial: Regex::new(
                r"(?i)\b(\d|two|three|four|five|six)\s*[x×]\s*(\d|two|three|four|five|six)(?:\s*[x×]\s*(\d|two|three|four|five|six))?\s+(?:between[- ]subjects?\s+|between[- ]groups?\s+|factorial\s+)*(?:design|groups)\b",
            )
            .context("failed to compile factorial design regex")?,
        })
    }

    pub fn factorial_group_count(&self, text: &str) -> Option<(i64, String)> {
        let captures = self.factorial.captures(text)?;
        let mut product = 1i64;
        for index in 1..=3 {
            if let Some(level) = captures.get(index) {
                product *= level_count(level.as_str())?;
            }
        }
        let evidence = captures.get(0)?.as_str().to_string();
        (product > 1).then_some((product, evidence))
    }

    pub fn derive(
        &self,
        candidates: &mut Vec<Candidate>,
        texts: &[(&str, &str)],
        extracted_at: &str,
    ) -> bool {
        let Some(per_group) = best_integer(candidates, PER_GROUP_SAMPLE_SIZE) else {
            return false;
        };
        let (per_group_value, per_group_confidence, per_group_evidence) = per_group;

        let groups = best_integer(candidates, GROUP_COUNT)
            .map(|(value, confidence, evidence)| (value, confidence, evidence, "stated".to_string()))
            .or_else(|| {
                texts.iter().find_map(|(location, text)| {
                    self.factorial_group_count(text)
                        .map(|(value, evidence)| (value, 0.8, evidence, location.to_string()))
                })
            });
        let Some((group_count, group_confidence, group_evidence, group_location)) = groups else {
            return false;
        };
        if group_count < 2 {
            return false;
        }

        let stated_total = best_integer(candidates, TOTAL_SAMPLE_SIZE);
        let misextracted = stated_total
            .as_ref()
            .is_some_and(|(value, _, _)| *value == per_group_value);
        if stated_total.is_some() && !misextracted {
            return false;
        }

        if misextracted {
            candidates.retain(|candidate| {
                !(candidate.parameter == TOTAL_SAMPLE_SIZE
                    && candidate.value.as_f64() == Some(per_group_value as f64))
            });
        }

        let total = per_group_value.saturating_mul(group_count);
        debug!(
            per_group = per_group_value,
            groups = group_count,
            total,
            replaced = misextracted,
            "derived total sample size"
        );
        candidates.push(Candidate {
            parameter: TOTAL_SAMPLE_SIZE.to_string(),
            value: ParameterValue::Integer(total),
            confidence: (per_group_confidence.min(group_confidence) * DERIVED_CONFIDENCE_FACTOR)
                .clamp(0.0, 1.0),
            source_type: SourceType::Rule,
            evidence: format!("{per_group_evidence} | {group_evidence}"),
            evidence_location: group_location,
            method_tag: DERIVED_METHOD_TAG.to_string(),
            extracted_at: extracted_at.to_string(),
        });
        true
    }
}

fn best_integer(candidates: &[Candidate], parameter: &str) -> Option<(i64, f64, String)> {
    candidates
        .iter()
        .filter(|candidate| candidate.parameter == parameter)
        .filter_map(|candidate| {
            let value = candidate.value.as_f64()?;
            (value.fract() == 0.0).then(|| (value as i64, candidate.confidence, candidate.evidence.clone()))
        })
        .max_by(|left, right| left.1.total_cmp(&right.1))
}

fn level_count(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| parse_number_words(raw))
}
