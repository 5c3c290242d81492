use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::pipeline::ExtractionReport;
use crate::util::read_json;

mod matching;

pub use matching::{SynonymTable, ValueMatcher};

pub type StudyValues = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldStandard {
    pub studies: BTreeMap<String, StudyValues>,
}

impl GoldStandard {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: Value = read_json(path)?;
        Self::from_value(raw).with_context(|| format!("invalid gold standard: {}", path.display()))
    }

    pub fn from_value(raw: Value) -> Result<Self> {
        let Value::Object(studies) = raw else {
            bail!("gold standard must be a JSON object keyed by study id");
        };

        let mut parsed = BTreeMap::new();
        for (study_id, parameters) in studies {
            let Value::Object(parameters) = parameters else {
                bail!("study '{study_id}' must map parameter names to values");
            };
            let mut values = StudyValues::new();
            for (parameter, value) in parameters {
                let text = match value {
                    Value::Null => continue,
                    Value::String(text) => text,
                    Value::Bool(flag) => flag.to_string(),
                    Value::Number(number) => number.to_string(),
                    other => bail!("study '{study_id}' parameter '{parameter}' is not a scalar: {other}"),
                };
                if !text.trim().is_empty() {
                    values.insert(parameter, text);
                }
            }
            parsed.insert(study_id, values);
        }
        Ok(Self { studies: parsed })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn load(path: &Path) -> Result<Self> {
        let groups: BTreeMap<String, Vec<String>> = read_json(path)?;
        Ok(Self::from_groups(groups))
    }

    pub fn from_groups(groups: BTreeMap<String, Vec<String>>) -> Self {
        let mut aliases = BTreeMap::new();
        for (canonical, names) in groups {
            let canonical = name_key(&canonical);
            for name in names {
                aliases.insert(name_key(&name), canonical.clone());
            }
            aliases.insert(canonical.clone(), canonical);
        }
        Self { aliases }
    }

    pub fn canonical(&self, name: &str) -> String {
        let key = name_key(name);
        self.aliases.get(&key).cloned().unwrap_or(key)
    }
}

pub fn load_synonyms(path: &Path) -> Result<SynonymTable> {
    let groups: BTreeMap<String, BTreeMap<String, Vec<String>>> = read_json(path)?;
    Ok(SynonymTable::from_groups(groups))
}

fn name_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|character: char| character.is_whitespace() || character == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<&str>>()
        .join("_")
}

/// Predicted values per study id: `document_id` for single-experiment
/// papers, `document_id#n` per experiment otherwise. Paper-level values fill
/// parameters an experiment lacks.
pub fn predictions_from_report(report: &ExtractionReport) -> BTreeMap<String, StudyValues> {
    let paper_level = report
        .paper_level
        .iter()
        .map(|record| (record.parameter.clone(), record.accepted.value.to_string()))
        .collect::<StudyValues>();

    let mut studies = BTreeMap::new();
    for experiment in &report.experiments {
        let study_id = if report.multi_experiment {
            format!("{}#{}", report.document_id, experiment.number)
        } else {
            report.document_id.clone()
        };
        let mut values = paper_level.clone();
        for record in &experiment.records {
            values.insert(record.parameter.clone(), record.accepted.value.to_string());
        }
        studies.insert(study_id, values);
    }
    studies
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl MatchCounts {
    fn absorb(&mut self, other: &MatchCounts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub parameter: String,
    pub counts: MatchCounts,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
}

impl ScoreLine {
    fn from_counts(parameter: &str, counts: MatchCounts) -> Self {
        let precision = ratio(
            counts.true_positives,
            counts.true_positives + counts.false_positives,
        );
        let recall = ratio(
            counts.true_positives,
            counts.true_positives + counts.false_negatives,
        );
        let f1 = match (precision, recall) {
            (Some(precision), Some(recall)) if precision + recall > 0.0 => {
                Some(2.0 * precision * recall / (precision + recall))
            }
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };
        Self {
            parameter: parameter.to_string(),
            counts,
            precision,
            recall,
            f1,
        }
    }
}

pub fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMismatch {
    pub study_id: String,
    pub parameter: String,
    pub expected: String,
    pub predicted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: String,
    pub studies_evaluated: usize,
    pub studies_without_predictions: Vec<String>,
    pub overall: ScoreLine,
    pub parameters: Vec<ScoreLine>,
    pub mismatches: Vec<ValueMismatch>,
    pub unannotated_parameters: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    aliases: AliasTable,
    matcher: ValueMatcher,
}

impl ValidationEngine {
    pub fn new(aliases: AliasTable, synonyms: SynonymTable) -> Self {
        Self {
            aliases,
            matcher: ValueMatcher::new(synonyms),
        }
    }

    pub fn evaluate(
        &self,
        gold: &GoldStandard,
        predictions: &BTreeMap<String, StudyValues>,
        generated_at: &str,
    ) -> ValidationReport {
        let gold = gold
            .studies
            .iter()
            .map(|(study_id, values)| (study_id.as_str(), self.canonicalize(values)))
            .collect::<BTreeMap<&str, StudyValues>>();
        let annotated = gold
            .values()
            .flat_map(|values| values.keys().cloned())
            .collect::<BTreeSet<String>>();

        let mut per_parameter = BTreeMap::<String, MatchCounts>::new();
        let mut mismatches = Vec::new();
        let mut unannotated = BTreeSet::new();
        let mut without_predictions = Vec::new();

        for (study_id, expected) in &gold {
            let predicted = match predictions.get(*study_id) {
                Some(values) => self.canonicalize(values),
                None => {
                    without_predictions.push(study_id.to_string());
                    StudyValues::new()
                }
            };

            for (parameter, expected_value) in expected {
                let counts = per_parameter.entry(parameter.clone()).or_default();
                match predicted.get(parameter) {
                    Some(predicted_value)
                        if self.matcher.matches(parameter, expected_value, predicted_value) =>
                    {
                        counts.true_positives += 1;
                    }
                    Some(predicted_value) => {
                        counts.false_positives += 1;
                        counts.false_negatives += 1;
                        mismatches.push(ValueMismatch {
                            study_id: study_id.to_string(),
                            parameter: parameter.clone(),
                            expected: expected_value.clone(),
                            predicted: predicted_value.clone(),
                        });
                    }
                    None => counts.false_negatives += 1,
                }
            }

            for parameter in predicted.keys() {
                if expected.contains_key(parameter) {
                    continue;
                }
                if annotated.contains(parameter) {
                    per_parameter.entry(parameter.clone()).or_default().false_positives += 1;
                } else {
                    unannotated.insert(parameter.clone());
                }
            }
        }

        let mut overall = MatchCounts::default();
        let parameters = per_parameter
            .iter()
            .map(|(parameter, counts)| {
                overall.absorb(counts);
                ScoreLine::from_counts(parameter, *counts)
            })
            .collect::<Vec<ScoreLine>>();

        debug!(
            studies = gold.len(),
            mismatches = mismatches.len(),
            "validation evaluated"
        );

        ValidationReport {
            generated_at: generated_at.to_string(),
            studies_evaluated: gold.len(),
            studies_without_predictions: without_predictions,
            overall: ScoreLine::from_counts("overall", overall),
            parameters,
            mismatches,
            unannotated_parameters: unannotated.into_iter().collect(),
        }
    }

    fn canonicalize(&self, values: &StudyValues) -> StudyValues {
        values
            .iter()
            .map(|(name, value)| (self.aliases.canonical(name), value.clone()))
            .collect()
    }
}
