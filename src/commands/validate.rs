use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::ValidateArgs;
use crate::pipeline::ExtractionReport;
use crate::util::{now_utc_string, read_json, write_json_pretty};
use crate::validation::{
    AliasTable, GoldStandard, StudyValues, SynonymTable, ValidationEngine, load_synonyms,
    predictions_from_report,
};

const REPORT_SUFFIX: &str = ".extraction.json";
const DEFAULT_REPORT_NAME: &str = "validation_report.json";

pub fn run(args: ValidateArgs) -> Result<()> {
    let gold = GoldStandard::load(&args.gold)?;
    let aliases = match args.aliases.as_deref() {
        Some(path) => AliasTable::load(path)?,
        None => AliasTable::default(),
    };
    let synonyms = match args.synonyms.as_deref() {
        Some(path) => load_synonyms(path)?,
        None => SynonymTable::default(),
    };

    let report_paths = prediction_paths(&args.predictions)?;
    let mut predictions = BTreeMap::<String, StudyValues>::new();
    for path in &report_paths {
        let report: ExtractionReport = read_json(path)?;
        for (study_id, values) in predictions_from_report(&report) {
            if predictions.insert(study_id.clone(), values).is_some() {
                warn!(study_id = %study_id, path = %path.display(), "duplicate study id, later report wins");
            }
        }
    }

    info!(
        gold_studies = gold.studies.len(),
        reports = report_paths.len(),
        predicted_studies = predictions.len(),
        "validating predictions"
    );

    let engine = ValidationEngine::new(aliases, synonyms);
    let report = engine.evaluate(&gold, &predictions, &now_utc_string());

    let output_path = args
        .report
        .clone()
        .unwrap_or_else(|| default_report_path(&args.predictions));
    write_json_pretty(&output_path, &report)?;

    for study_id in &report.studies_without_predictions {
        warn!(study_id = %study_id, "gold study has no predictions");
    }
    info!(
        path = %output_path.display(),
        studies = report.studies_evaluated,
        precision = report.overall.precision.unwrap_or_default(),
        recall = report.overall.recall.unwrap_or_default(),
        f1 = report.overall.f1.unwrap_or_default(),
        mismatches = report.mismatches.len(),
        "validation completed"
    );
    Ok(())
}

fn prediction_paths(predictions: &Path) -> Result<Vec<PathBuf>> {
    if predictions.is_file() {
        return Ok(vec![predictions.to_path_buf()]);
    }
    if !predictions.is_dir() {
        bail!("predictions path does not exist: {}", predictions.display());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(predictions)
        .with_context(|| format!("failed to list {}", predictions.display()))?
    {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(REPORT_SUFFIX));
        if is_report && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        bail!("no *{REPORT_SUFFIX} reports in {}", predictions.display());
    }
    Ok(paths)
}

fn default_report_path(predictions: &Path) -> PathBuf {
    if predictions.is_dir() {
        predictions.join(DEFAULT_REPORT_NAME)
    } else {
        predictions
            .parent()
            .map(|parent| parent.join(DEFAULT_REPORT_NAME))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_yield_sorted_extraction_reports_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.extraction.json"), "{}").expect("write b");
        fs::write(dir.path().join("a.extraction.json"), "{}").expect("write a");
        fs::write(dir.path().join("notes.json"), "{}").expect("write notes");

        let paths = prediction_paths(dir.path()).expect("paths");
        let names = paths
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<&str>>();
        assert_eq!(names, vec!["a.extraction.json", "b.extraction.json"]);

        assert_eq!(
            default_report_path(dir.path()),
            dir.path().join(DEFAULT_REPORT_NAME)
        );
        assert_eq!(
            default_report_path(&dir.path().join("a.extraction.json")),
            dir.path().join(DEFAULT_REPORT_NAME)
        );
    }

    #[test]
    fn empty_or_missing_prediction_paths_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(prediction_paths(dir.path()).is_err());
        assert!(prediction_paths(&dir.path().join("missing")).is_err());
    }
}
