//! Batch processor: list → download → prompt chain → results file.
//!
//! Invoices are handled one at a time, in key order. The results file is
//! rewritten after every invoice so an interrupted run still leaves a valid
//! JSON array holding everything finished so far.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::config::{OutputConfig, WriteMode};
use tally_core::storage::relative_path_for_key;
use tally_core::{
    InvoiceDocument, InvoiceRecord, ModelBackend, ModelError, ObjectEntry, ObjectSource,
    ResultStore, StorageError, TallyError,
};
use thiserror::Error;

use crate::prompts::PromptChain;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Model call failed for {key}: {source}")]
    Model {
        key: String,
        #[source]
        source: ModelError,
    },

    #[error("{key} maps to {path}, already used by another invoice")]
    PathCollision { key: String, path: String },

    #[error(transparent)]
    Store(#[from] TallyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output-side settings for one run.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub download_dir: PathBuf,
    pub mode: WriteMode,
    pub continue_on_error: bool,
}

impl From<&OutputConfig> for BatchSettings {
    fn from(config: &OutputConfig) -> Self {
        Self {
            download_dir: config.download_dir(),
            mode: config.mode,
            continue_on_error: config.continue_on_error,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Objects returned by the listing, PDFs or not.
    pub listed: usize,
    pub processed: usize,
    /// Non-PDF objects and folder markers.
    pub skipped_other: usize,
    /// PDFs already present in the results file (append mode).
    pub skipped_existing: usize,
    /// Keys that failed while `continue_on_error` was set.
    pub failed: Vec<String>,
    /// Records in the results file after the run.
    pub total_records: usize,
    pub elapsed: Duration,
}

pub struct BatchProcessor {
    source: Arc<dyn ObjectSource>,
    model: Arc<dyn ModelBackend>,
    store: ResultStore,
    chain: PromptChain,
    settings: BatchSettings,
}

impl BatchProcessor {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        model: Arc<dyn ModelBackend>,
        store: ResultStore,
        chain: PromptChain,
        settings: BatchSettings,
    ) -> Self {
        Self {
            source,
            model,
            store,
            chain,
            settings,
        }
    }

    /// Process every PDF under `prefix`.
    pub async fn run(&self, prefix: Option<&str>) -> Result<BatchOutcome, IngestError> {
        let start = Instant::now();
        let mut outcome = BatchOutcome::default();

        let mut records = self.prepare().await?;
        let known: HashSet<String> = records.iter().map(|r| r.source.clone()).collect();
        let mut used_paths: HashSet<String> = records.iter().map(|r| r.file_name.clone()).collect();

        let entries = self.source.list(prefix).await?;
        outcome.listed = entries.len();

        tracing::info!(
            bucket = self.source.bucket(),
            prefix = prefix.unwrap_or(""),
            objects = entries.len(),
            model = self.model.name(),
            "Starting invoice batch"
        );

        for entry in &entries {
            if !entry.is_pdf() {
                tracing::debug!(key = %entry.key, "Skipping non-PDF object");
                outcome.skipped_other += 1;
                continue;
            }
            if known.contains(&entry.key) {
                tracing::debug!(key = %entry.key, "Already processed, skipping");
                outcome.skipped_existing += 1;
                continue;
            }

            let uri = entry.uri(self.source.bucket());
            let result = match claim_local_path(&entry.key, &mut used_paths) {
                Ok(relative) => self.process_one(entry, &relative).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(record) => {
                    records.push(record);
                    self.store.save(&records).await?;
                    outcome.processed += 1;
                    tracing::info!(uri = %uri, "Processed file");
                }
                Err(e) if self.settings.continue_on_error => {
                    tracing::warn!(uri = %uri, error = %e, "Failed to process invoice, continuing");
                    outcome.failed.push(entry.key.clone());
                }
                Err(e) => {
                    tracing::error!(uri = %uri, error = %e, "Failed to process invoice");
                    return Err(e);
                }
            }
        }

        if outcome.processed == 0 {
            // Leave a valid (possibly empty) array behind for the viewer.
            self.store.save(&records).await?;
        }

        outcome.total_records = records.len();
        outcome.elapsed = start.elapsed();
        Ok(outcome)
    }

    /// Reset or reopen the workspace depending on the write mode.
    async fn prepare(&self) -> Result<Vec<InvoiceRecord>, IngestError> {
        let dir = &self.settings.download_dir;
        match self.settings.mode {
            WriteMode::Overwrite => {
                remove_dir_if_exists(dir).await?;
                tokio::fs::create_dir_all(dir).await?;
                // Replace the previous results with an empty array up front
                self.store.save(&[]).await?;
                Ok(Vec::new())
            }
            WriteMode::Append => {
                tokio::fs::create_dir_all(dir).await?;
                let records = self.store.load().await?;
                tracing::info!(existing = records.len(), "Appending to existing results");
                Ok(records)
            }
        }
    }

    async fn process_one(
        &self,
        entry: &ObjectEntry,
        relative: &Path,
    ) -> Result<InvoiceRecord, IngestError> {
        let local = self.settings.download_dir.join(relative);

        let bytes_written = self.source.download(&entry.key, &local).await?;
        tracing::debug!(key = %entry.key, bytes = bytes_written, path = %local.display(), "Downloaded");

        let document = InvoiceDocument {
            name: entry.key.clone(),
            bytes: tokio::fs::read(&local).await?,
        };

        let output = self
            .chain
            .run(self.model.as_ref(), &document)
            .await
            .map_err(|source| IngestError::Model {
                key: entry.key.clone(),
                source,
            })?;

        Ok(InvoiceRecord {
            source: entry.key.clone(),
            file_name: slash_path(relative),
            fields: output.fields,
            fields_raw: output.fields_raw,
            summary: output.summary,
            details: output.details,
            processed_at: Utc::now(),
        })
    }
}

/// Local path for `key`, unless it is unsafe or another key already maps to it
/// (`/a.pdf`, `./a.pdf` and `a.pdf` all land on `a.pdf`).
fn claim_local_path(key: &str, used: &mut HashSet<String>) -> Result<PathBuf, IngestError> {
    let relative =
        relative_path_for_key(key).ok_or_else(|| StorageError::UnsafeKey(key.to_string()))?;
    let path = slash_path(&relative);
    if !used.insert(path.clone()) {
        return Err(IngestError::PathCollision {
            key: key.to_string(),
            path,
        });
    }
    Ok(relative)
}

async fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Relative path with `/` separators on every platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `H:MM:SS` with millisecond precision, e.g. `0:01:05.250`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:03}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        elapsed.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(65_250)), "0:01:05.250");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "3:00:07.000");
    }

    #[test]
    fn test_slash_path_joins_components() {
        assert_eq!(slash_path(Path::new("2024/03/a.pdf")), "2024/03/a.pdf");
        assert_eq!(slash_path(Path::new("a.pdf")), "a.pdf");
    }

    #[test]
    fn test_claim_local_path_rejects_colliding_keys() {
        let mut used = HashSet::new();
        assert_eq!(
            claim_local_path("x/a.pdf", &mut used).unwrap(),
            PathBuf::from("x/a.pdf")
        );
        for key in ["x/./a.pdf", "/x/a.pdf", "x//a.pdf"] {
            match claim_local_path(key, &mut used) {
                Err(IngestError::PathCollision { path, .. }) => assert_eq!(path, "x/a.pdf"),
                other => panic!("Expected collision for {}, got {:?}", key, other),
            }
        }
        assert!(matches!(
            claim_local_path("../a.pdf", &mut used),
            Err(IngestError::Storage(StorageError::UnsafeKey(_)))
        ));
    }

    #[test]
    fn test_settings_from_output_config() {
        let output = OutputConfig {
            download_dir: "pdfs".to_string(),
            mode: WriteMode::Append,
            continue_on_error: true,
            ..OutputConfig::default()
        };
        let settings = BatchSettings::from(&output);
        assert_eq!(settings.download_dir, PathBuf::from("pdfs"));
        assert_eq!(settings.mode, WriteMode::Append);
        assert!(settings.continue_on_error);
    }
}
