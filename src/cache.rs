use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::normalize::NormalizationStats;
use crate::pipeline::{PaperSegmentation, PreprocessMode, Preprocessed};
use crate::util::{ensure_directory, now_utc_string};

pub const CACHE_FILE_NAME: &str = "preprocess_cache.sqlite";
const CACHE_SCHEMA_VERSION: &str = "2";

pub fn cache_path(cache_root: &Path) -> PathBuf {
    cache_root.join(CACHE_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey<'a> {
    pub document_id: &'a str,
    pub modified_at: &'a str,
    pub mode: PreprocessMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub entries: u64,
    pub documents: u64,
}

pub struct PreprocessCache {
    connection: Connection,
}

impl PreprocessCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open preprocess cache: {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn get(&self, key: &CacheKey<'_>) -> Result<Option<Preprocessed>> {
        let row = self
            .connection
            .query_row(
                "SELECT normalized_text, segmentation_json, stats_json
                 FROM preprocessed
                 WHERE document_id = ?1 AND modified_at = ?2 AND mode = ?3",
                params![key.document_id, key.modified_at, key.mode.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to query preprocess cache for {}", key.document_id))?;

        let Some((normalized_text, segmentation_json, stats_json)) = row else {
            debug!(document_id = key.document_id, "preprocess cache miss");
            return Ok(None);
        };

        let segmentation: PaperSegmentation = serde_json::from_str(&segmentation_json)
            .with_context(|| format!("failed to parse cached segmentation for {}", key.document_id))?;
        let stats: NormalizationStats = serde_json::from_str(&stats_json)
            .with_context(|| format!("failed to parse cached stats for {}", key.document_id))?;

        debug!(document_id = key.document_id, "preprocess cache hit");
        Ok(Some(Preprocessed {
            normalized_text,
            stats,
            segmentation,
        }))
    }

    pub fn put(&self, key: &CacheKey<'_>, preprocessed: &Preprocessed) -> Result<()> {
        let segmentation_json = serde_json::to_string(&preprocessed.segmentation)
            .context("failed to serialize segmentation for cache")?;
        let stats_json =
            serde_json::to_string(&preprocessed.stats).context("failed to serialize stats for cache")?;

        self.connection
            .execute(
                "INSERT OR REPLACE INTO preprocessed
                 (document_id, modified_at, mode, normalized_text, segmentation_json, stats_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key.document_id,
                    key.modified_at,
                    key.mode.as_str(),
                    preprocessed.normalized_text,
                    segmentation_json,
                    stats_json,
                    now_utc_string(),
                ],
            )
            .with_context(|| format!("failed to write preprocess cache for {}", key.document_id))?;
        Ok(())
    }

    pub fn counts(&self) -> Result<CacheCounts> {
        let entries = query_count(&self.connection, "SELECT COUNT(*) FROM preprocessed")?;
        let documents = query_count(
            &self.connection,
            "SELECT COUNT(DISTINCT document_id) FROM preprocessed",
        )?;
        Ok(CacheCounts { entries, documents })
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .busy_timeout(std::time::Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create preprocess cache metadata table")?;

    let stored_version = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'cache_schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("failed to read preprocess cache schema version")?;
    if stored_version.as_deref() != Some(CACHE_SCHEMA_VERSION) {
        debug!(
            stored = stored_version.as_deref().unwrap_or("none"),
            current = CACHE_SCHEMA_VERSION,
            "resetting preprocess cache for new schema"
        );
        connection
            .execute_batch("DROP TABLE IF EXISTS preprocessed;")
            .context("failed to drop outdated preprocess cache table")?;
    }

    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS preprocessed (
              document_id TEXT NOT NULL,
              modified_at TEXT NOT NULL,
              mode TEXT NOT NULL,
              normalized_text TEXT NOT NULL,
              segmentation_json TEXT NOT NULL,
              stats_json TEXT NOT NULL,
              created_at TEXT NOT NULL,
              PRIMARY KEY (document_id, modified_at, mode)
            );
            ",
        )
        .context("failed to create preprocess cache schema")?;

    connection
        .execute(
            "INSERT INTO metadata(key, value) VALUES('cache_schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [CACHE_SCHEMA_VERSION],
        )
        .context("failed to record preprocess cache schema version")?;
    Ok(())
}

fn query_count(connection: &Connection, sql: &str) -> Result<u64> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to run count query: {sql}"))?;
    Ok(u64::try_from(count).unwrap_or_default())
}
