use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{EXTRACT_MANIFEST_PREFIX, MANIFEST_DIR};
use crate::cache::{PreprocessCache, cache_path};
use crate::cli::StatusArgs;
use crate::model::ExtractRunManifest;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join(MANIFEST_DIR);
    let db_path = cache_path(&args.cache_root);

    info!(cache_root = %args.cache_root.display(), "status requested");

    match latest_extract_manifest(&manifest_dir)? {
        Some(path) => {
            let manifest: ExtractRunManifest = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                started_at = %manifest.started_at,
                completed_at = %manifest.completed_at,
                parameter_table_version = %manifest.parameter_table_version,
                policy_table_version = %manifest.policy_table_version,
                documents = manifest.document_count,
                failed = manifest.failed_count,
                llm_enabled = manifest.llm_enabled,
                llm_budget_usd = manifest.llm_budget_usd,
                llm_spent_usd = manifest.llm_spent_usd,
                "loaded latest extraction run manifest"
            );
            for entry in manifest.documents.iter().filter(|entry| entry.status != "ok") {
                warn!(
                    input = %entry.input_path,
                    error = %entry.error.as_deref().unwrap_or_default(),
                    "document failed in latest run"
                );
            }
        }
        None => warn!(path = %manifest_dir.display(), "no extraction run manifest found"),
    }

    if db_path.exists() {
        let cache = PreprocessCache::open(&db_path)?;
        let counts = cache.counts()?;
        info!(
            path = %db_path.display(),
            entries = counts.entries,
            documents = counts.documents,
            "preprocess cache status"
        );
    } else {
        warn!(path = %db_path.display(), "preprocess cache missing");
    }

    Ok(())
}

/// Manifest names embed a compact UTC timestamp, so the lexically greatest is the newest.
fn latest_extract_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(EXTRACT_MANIFEST_PREFIX) && name.ends_with(".json"));
        if is_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_manifest_is_selected_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(latest_extract_manifest(&dir.path().join("absent")).expect("ok"), None);

        for name in [
            "extract_run_20240101T000000Z.json",
            "extract_run_20240301T120000Z.json",
            "other_20250101T000000Z.json",
        ] {
            fs::write(dir.path().join(name), "{}").expect("write manifest");
        }

        let latest = latest_extract_manifest(dir.path()).expect("ok");
        assert_eq!(
            latest,
            Some(dir.path().join("extract_run_20240301T120000Z.json"))
        );
    }
}
