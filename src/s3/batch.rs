//! Batch operations over many keys
//!
//! Uploads run in windows of `concurrency` items: every upload of a window
//! starts together and the next window starts only when the whole window has
//! finished. Deletes are idempotent and small, so a batch delete issues all of
//! them at once. Each item's outcome is captured on its own and results come
//! back in input order.

use crate::s3::body::ObjectBody;
use crate::s3::client::S3Client;
use crate::s3::types::{BatchResult, UploadOptions};
use futures::future::join_all;
use std::path::{Path, PathBuf};

/// One object to upload in a batch
#[derive(Debug)]
pub struct BatchUploadItem {
    pub key: String,
    source: ItemSource,
    pub options: UploadOptions,
}

#[derive(Debug)]
enum ItemSource {
    Body(ObjectBody),
    /// Opened when the item's window starts.
    Path(PathBuf),
}

impl BatchUploadItem {
    pub fn new(key: impl Into<String>, body: impl Into<ObjectBody>) -> Self {
        Self {
            key: key.into(),
            source: ItemSource::Body(body.into()),
            options: UploadOptions::default(),
        }
    }

    /// Item that streams a local file. The file is not opened until the item
    /// is uploaded, so at most one window of files is open at a time.
    pub fn from_path(key: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            key: key.into(),
            source: ItemSource::Path(path.as_ref().to_path_buf()),
            options: UploadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }
}

/// Runs many independent object operations with one client.
#[derive(Debug, Clone)]
pub struct BatchClient {
    client: S3Client,
}

impl BatchClient {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }

    /// Upload `items` in sequential windows of `concurrency` (at least 1).
    ///
    /// A failing item never cancels its siblings; it shows up as a failed
    /// [`BatchResult`] at its input position.
    pub async fn batch_upload<I>(&self, items: I, concurrency: usize) -> Vec<BatchResult>
    where
        I: IntoIterator<Item = BatchUploadItem>,
    {
        let concurrency = concurrency.max(1);
        let mut items = items.into_iter().peekable();
        let mut results = Vec::new();
        let mut window_index = 0usize;

        while items.peek().is_some() {
            let window: Vec<BatchUploadItem> = items.by_ref().take(concurrency).collect();
            tracing::debug!(window = window_index, size = window.len(), "starting upload window");

            let outcomes = join_all(window.into_iter().map(|item| self.upload_one(item))).await;
            results.extend(outcomes);
            window_index += 1;
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(total = results.len(), failed, "batch upload finished");
        results
    }

    /// Delete every key concurrently. Missing keys count as deleted.
    pub async fn batch_delete<I, K>(&self, keys: I) -> Vec<BatchResult>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let deletes = keys.into_iter().map(|key| {
            let key: String = key.into();
            async move {
                match self.client.delete(&key).await {
                    Ok(()) => BatchResult::ok(key),
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "batch delete item failed");
                        BatchResult::failed(key, err.to_string())
                    }
                }
            }
        });

        let results = join_all(deletes).await;
        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(total = results.len(), failed, "batch delete finished");
        results
    }

    async fn upload_one(&self, item: BatchUploadItem) -> BatchResult {
        let BatchUploadItem {
            key,
            source,
            options,
        } = item;
        let body = match source {
            ItemSource::Body(body) => body,
            ItemSource::Path(path) => match ObjectBody::from_path(&path).await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        path = %path.display(),
                        error = %err,
                        "batch upload file open failed"
                    );
                    return BatchResult::failed(key, format!("{}: {}", path.display(), err));
                }
            },
        };
        match self.client.put(&key, body, &options).await {
            Ok(_) => BatchResult::ok(key),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "batch upload item failed");
                BatchResult::failed(key, err.to_string())
            }
        }
    }
}
