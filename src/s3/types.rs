//! S3 types and response structures

use crate::s3::body::ResponseBody;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size below which `put` uses a single request (100 MiB)
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default multipart part size (10 MiB)
pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

/// S3 minimum for every part but the last (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 maximum number of parts per upload
pub const MAX_PARTS: u64 = 10_000;

/// Prefix of user metadata headers
pub const METADATA_PREFIX: &str = "x-amz-meta-";

/// Snapshot of one object, as reported by a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// ETag without surrounding quotes
    pub etag: String,
    /// Last modified timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// Storage class (STANDARD, STANDARD_IA, GLACIER, etc.)
    pub storage_class: Option<String>,
}

impl ObjectDescriptor {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            etag: String::new(),
            last_modified: None,
            storage_class: None,
        }
    }
}

/// One page of a ListObjectsV2 listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    /// Objects in key order
    pub objects: Vec<ObjectDescriptor>,
    /// Common prefixes (subdirectories when using delimiter)
    pub common_prefixes: Vec<String>,
    /// Token to pass back for the next page
    pub continuation_token: Option<String>,
    /// Whether more pages follow
    pub is_truncated: bool,
    /// Key count reported by the service
    pub key_count: Option<u32>,
}

/// Parameters of a ListObjectsV2 request.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub continuation_token: Option<String>,
}

impl ListParams {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// Per-call upload settings. Never stored by the client.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// User metadata, sent as `x-amz-meta-<name>` headers
    pub metadata: BTreeMap<String, String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub storage_class: Option<String>,
    /// Overrides [`MultipartConfig::part_size`] for this upload
    pub part_size: Option<usize>,
}

impl UploadOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Headers describing the object, shared by PUT and multipart initiation.
    pub(crate) fn object_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            self.content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        );
        if let Some(ref cache_control) = self.cache_control {
            headers.insert("cache-control".to_string(), cache_control.clone());
        }
        if let Some(ref encoding) = self.content_encoding {
            headers.insert("content-encoding".to_string(), encoding.clone());
        }
        if let Some(ref storage_class) = self.storage_class {
            headers.insert("x-amz-storage-class".to_string(), storage_class.clone());
        }
        for (name, value) in &self.metadata {
            headers.insert(
                format!("{}{}", METADATA_PREFIX, name.to_ascii_lowercase()),
                value.clone(),
            );
        }
        headers
    }
}

/// Result of `put`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PutObjectOutput {
    /// ETag of the stored object, when the service returned one
    pub etag: Option<String>,
    /// Number of parts when the object went through multipart upload
    pub parts: Option<u32>,
}

/// Result of `get_object`: response metadata plus the streaming body.
#[derive(Debug)]
pub struct GetObjectOutput {
    pub body: ResponseBody,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Result of `head`. A missing object is `exists: false`, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadObjectOutput {
    pub exists: bool,
    /// User metadata with the `x-amz-meta-` prefix removed
    pub metadata: BTreeMap<String, String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl HeadObjectOutput {
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Result of a server-side copy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CopyObjectOutput {
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Response from CreateMultipartUpload operation
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateMultipartUploadOutput {
    pub bucket: String,
    pub key: String,
    /// Upload ID for subsequent UploadPart and CompleteMultipartUpload requests
    pub upload_id: String,
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteMultipartUploadOutput {
    /// Location URL of the completed object
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    /// ETag of the completed object
    pub etag: String,
}

/// Operation a presigned URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignedOperation {
    Get,
    Put,
}

impl PresignedOperation {
    pub fn method(self) -> &'static str {
        match self {
            PresignedOperation::Get => "GET",
            PresignedOperation::Put => "PUT",
        }
    }
}

/// Outcome of one item of a batch operation. Batches return these in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub key: String,
    pub success: bool,
    pub error: Option<String>,
}

impl BatchResult {
    pub fn ok(key: String) -> Self {
        Self {
            key,
            success: true,
            error: None,
        }
    }

    pub fn failed(key: String, error: String) -> Self {
        Self {
            key,
            success: false,
            error: Some(error),
        }
    }
}

/// Configuration for multipart uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipartConfig {
    /// Part size in bytes (default: 10MiB)
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    /// Maximum concurrent part uploads (default: 10)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Payload size at which `put` switches to multipart (default: 100MiB)
    #[serde(default = "default_threshold")]
    pub threshold: u64,
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    10
}

fn default_threshold() -> u64 {
    MULTIPART_THRESHOLD
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrency: default_concurrency(),
            threshold: default_threshold(),
        }
    }
}

impl MultipartConfig {
    pub fn with_part_size(mut self, size: usize) -> Self {
        // Enforce S3 minimum of 5MB (except for last part)
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Part size for one upload: the per-call override or the configured size,
    /// never below the S3 minimum, and scaled up so a payload of `total_len`
    /// bytes fits in [`MAX_PARTS`] parts.
    pub fn effective_part_size(
        &self,
        part_size_override: Option<usize>,
        total_len: Option<u64>,
    ) -> usize {
        let part_size = part_size_override.unwrap_or(self.part_size).max(MIN_PART_SIZE);
        match total_len {
            Some(total) if total.div_ceil(part_size as u64) > MAX_PARTS => {
                total.div_ceil(MAX_PARTS) as usize
            }
            _ => part_size,
        }
    }
}
