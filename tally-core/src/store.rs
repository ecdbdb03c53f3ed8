//! Results file: a flat JSON array of [`InvoiceRecord`]s.
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! reader (the viewer) never observes a half-written array.

use std::path::{Path, PathBuf};

use crate::error::TallyError;
use crate::models::InvoiceRecord;

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing file is an empty result set.
    pub async fn load(&self) -> Result<Vec<InvoiceRecord>, TallyError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => self.parse(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking variant of [`ResultStore::load`] for callers without a runtime.
    pub fn load_blocking(&self) -> Result<Vec<InvoiceRecord>, TallyError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => self.parse(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file contents with `records`.
    pub async fn save(&self, records: &[InvoiceRecord]) -> Result<(), TallyError> {
        let body = serde_json::to_vec_pretty(records).map_err(|source| TallyError::Json {
            path: self.path.display().to_string(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "Saved results");
        Ok(())
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<InvoiceRecord>, TallyError> {
        serde_json::from_slice(bytes).map_err(|source| TallyError::Json {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
