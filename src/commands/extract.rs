use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::{EXTRACT_MANIFEST_PREFIX, MANIFEST_DIR};
use crate::cache::{CacheKey, PreprocessCache, cache_path};
use crate::cli::ExtractArgs;
use crate::config::load_config;
use crate::extraction::{DEFAULT_FALLBACK_TABLE, DEFAULT_PARAMETER_TABLE, ParameterTable};
use crate::llm::{CostBudget, build_provider};
use crate::model::{DocumentInput, ExtractRunEntry, ExtractRunManifest};
use crate::pipeline::{ExtractionPipeline, LlmContext};
use crate::resolve::PolicyTable;
use crate::util::{
    ensure_directory, now_utc_string, read_json, sha256_file, system_time_string,
    utc_compact_string, write_json_pretty,
};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: ExtractArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("extract-{}", utc_compact_string(started_ts));

    let mut config = load_config(args.config.as_deref())?;
    if args.llm {
        config.llm.enabled = true;
    }
    let llm_enabled = config.llm.enabled;
    let budget = CostBudget::new(config.llm.budget_usd);
    let provider = if llm_enabled {
        Some(build_provider(&config.llm)?)
    } else {
        None
    };

    let primary = ParameterTable::load(args.parameter_table.as_deref(), DEFAULT_PARAMETER_TABLE)?;
    let fallback = ParameterTable::load(args.fallback_table.as_deref(), DEFAULT_FALLBACK_TABLE)?;
    let policies = PolicyTable::load(args.policy_table.as_deref())?;
    let pipeline = ExtractionPipeline::new(config, primary, fallback, policies, args.preprocess_mode)?;

    ensure_directory(&args.output_dir)?;
    let cache_file = (!args.no_cache).then(|| cache_path(&args.cache_root));
    let llm = provider.as_deref().map(|provider| LlmContext {
        provider,
        budget: &budget,
    });
    let workers = args.workers.clamp(1, args.inputs.len().max(1));

    info!(
        run_id = %run_id,
        documents = args.inputs.len(),
        workers,
        llm_enabled,
        mode = pipeline.mode().as_str(),
        "starting extraction"
    );

    let documents = extract_all(
        &pipeline,
        &args.inputs,
        &args.output_dir,
        cache_file.as_deref(),
        llm,
        workers,
    );

    let failed_count = documents
        .iter()
        .filter(|entry| entry.status != "ok")
        .count();
    let mut warnings = Vec::new();
    if failed_count > 0 {
        warnings.push(format!("{failed_count} document(s) failed"));
    }

    let manifest = ExtractRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        started_at,
        completed_at: now_utc_string(),
        parameter_table_version: pipeline.parameter_table_version().to_string(),
        policy_table_version: pipeline.policy_table_version().to_string(),
        llm_enabled,
        llm_budget_usd: budget.limit_usd(),
        llm_spent_usd: budget.spent_usd(),
        document_count: documents.len(),
        failed_count,
        documents,
        warnings,
    };

    let manifest_path = args.cache_root.join(MANIFEST_DIR).join(format!(
        "{EXTRACT_MANIFEST_PREFIX}{}.json",
        utc_compact_string(started_ts)
    ));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote extraction run manifest");

    if failed_count > 0 {
        warn!(failed = failed_count, run_id = %run_id, "extraction finished with failures");
    }
    info!(
        documents = manifest.document_count,
        failed = failed_count,
        llm_spent_usd = manifest.llm_spent_usd,
        "extraction completed"
    );
    Ok(())
}

fn extract_all(
    pipeline: &ExtractionPipeline,
    inputs: &[PathBuf],
    output_dir: &Path,
    cache_file: Option<&Path>,
    llm: Option<LlmContext<'_>>,
    workers: usize,
) -> Vec<ExtractRunEntry> {
    let mut indexed = thread::scope(|scope| {
        let handles = (0..workers)
            .map(|worker| {
                scope.spawn(move || {
                    let cache = cache_file.and_then(|path| match PreprocessCache::open(path) {
                        Ok(cache) => Some(cache),
                        Err(err) => {
                            let message = format!("{err:#}");
                            warn!(worker, error = %message, "cache unavailable, continuing without it");
                            None
                        }
                    });
                    inputs
                        .iter()
                        .enumerate()
                        .skip(worker)
                        .step_by(workers)
                        .map(|(index, path)| {
                            let entry = extract_one(pipeline, path, output_dir, cache.as_ref(), llm);
                            (index, entry)
                        })
                        .collect::<Vec<(usize, ExtractRunEntry)>>()
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(entries) => entries,
                Err(_) => {
                    warn!("extraction worker panicked");
                    Vec::new()
                }
            })
            .collect::<Vec<(usize, ExtractRunEntry)>>()
    });

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, entry)| entry).collect()
}

fn extract_one(
    pipeline: &ExtractionPipeline,
    path: &Path,
    output_dir: &Path,
    cache: Option<&PreprocessCache>,
    llm: Option<LlmContext<'_>>,
) -> ExtractRunEntry {
    match extract_document(pipeline, path, output_dir, cache, llm) {
        Ok(entry) => entry,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(path = %path.display(), error = %message, "document failed");
            ExtractRunEntry {
                document_id: String::new(),
                input_path: path.display().to_string(),
                output_path: None,
                status: "failed".to_string(),
                experiment_count: 0,
                record_count: 0,
                cache_hit: false,
                error: Some(message),
            }
        }
    }
}

fn extract_document(
    pipeline: &ExtractionPipeline,
    path: &Path,
    output_dir: &Path,
    cache: Option<&PreprocessCache>,
    llm: Option<LlmContext<'_>>,
) -> Result<ExtractRunEntry> {
    let document = load_document(path)?;
    let document_id = match document
        .document_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        Some(id) => id.to_string(),
        None => sha256_file(path)?,
    };
    let modified_at = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(system_time_string)
        .with_context(|| format!("failed to read modification time: {}", path.display()))?;
    let key = CacheKey {
        document_id: &document_id,
        modified_at: &modified_at,
        mode: pipeline.mode(),
    };

    let cached = cache.and_then(|cache| match cache.get(&key) {
        Ok(hit) => hit,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(document_id = %document_id, error = %message, "cache read failed");
            None
        }
    });
    let cache_hit = cached.is_some();

    let (report, preprocessed) = pipeline
        .run(&document_id, &document, cached, llm)
        .with_context(|| format!("extraction failed: {}", path.display()))?;

    if !cache_hit
        && let Some(cache) = cache
        && let Err(err) = cache.put(&key, &preprocessed)
    {
        let message = format!("{err:#}");
        warn!(document_id = %document_id, error = %message, "cache write failed");
    }

    let output_path = output_dir.join(format!("{}.extraction.json", file_safe_id(&document_id)));
    write_json_pretty(&output_path, &report)?;

    Ok(ExtractRunEntry {
        document_id,
        input_path: path.display().to_string(),
        output_path: Some(output_path.display().to_string()),
        status: "ok".to_string(),
        experiment_count: report.experiments.len(),
        record_count: report.record_count(),
        cache_hit,
        error: None,
    })
}

pub fn load_document(path: &Path) -> Result<DocumentInput> {
    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        return read_json(path);
    }

    let full_text = fs::read_to_string(path)
        .with_context(|| format!("failed to read document: {}", path.display()))?;
    Ok(DocumentInput {
        full_text,
        extraction_method: Some("plain_text".to_string()),
        ..DocumentInput::default()
    })
}

fn file_safe_id(document_id: &str) -> String {
    document_id
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.') {
                character
            } else {
                '_'
            }
        })
        .collect()
}
