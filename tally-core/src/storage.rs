//! Object storage: lists invoice PDFs in a bucket and downloads them locally.
//!
//! `ObjectSource` is the seam the batch processor talks to; `S3ObjectSource`
//! is the production implementation on top of `aws-sdk-s3`.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Listing s3://{bucket}/{prefix} failed: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
    },

    #[error("Downloading s3://{bucket}/{key} failed: {message}")]
    Download {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Object key '{0}' does not map to a path inside the download folder")]
    UnsafeKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

impl ObjectEntry {
    /// Folder placeholders created by the S3 console end in `/`.
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }

    pub fn is_pdf(&self) -> bool {
        !self.is_folder_marker() && self.key.to_ascii_lowercase().ends_with(".pdf")
    }

    /// `s3://bucket/key` form used in logs.
    pub fn uri(&self, bucket: &str) -> String {
        format!("s3://{}/{}", bucket, self.key)
    }
}

/// Abstraction over the store holding the invoices.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// List every object under `prefix` (all objects when `None`), sorted by key.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectEntry>, StorageError>;

    /// Download `key` into `dest`, creating parent folders. Returns bytes written.
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Bucket or container name, for logging.
    fn bucket(&self) -> &str;
}

/// Map an object key to a path under `root`, keeping its folder structure.
///
/// Returns `None` for keys that are empty or would escape `root`.
pub fn local_path_for_key(root: &Path, key: &str) -> Option<PathBuf> {
    let relative = relative_path_for_key(key)?;
    Some(root.join(relative))
}

/// The key as a relative path made only of normal components.
pub fn relative_path_for_key(key: &str) -> Option<PathBuf> {
    let trimmed = key.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let path = Path::new(trimmed);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// S3-backed [`ObjectSource`].
#[derive(Debug, Clone)]
pub struct S3ObjectSource {
    client: Client,
    bucket: String,
}

impl S3ObjectSource {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectEntry>, StorageError> {
        let prefix = prefix.filter(|p| !p.is_empty());
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        let mut page_count = 0usize;

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::List {
                bucket: self.bucket.clone(),
                prefix: prefix.unwrap_or_default().to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
            page_count += 1;

            entries.extend(page.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            }));
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::debug!(
            bucket = %self.bucket,
            prefix = prefix.unwrap_or(""),
            pages = page_count,
            objects = entries.len(),
            "Listed bucket"
        );

        Ok(entries)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let download_err = |message: String| StorageError::Download {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            message,
        };

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| download_err(DisplayErrorContext(&e).to_string()))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.body;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
