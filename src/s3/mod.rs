//! S3 client module with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 signing and presigned URLs
//! - Async object operations (put, get, delete, head, copy, list)
//! - Multipart uploads from buffers and streams, aborted on failure
//! - Batch uploads and deletes with per-item results

pub mod batch;
pub mod body;
pub mod canonical;
pub mod client;
pub mod error;
pub mod multipart;
pub mod part_reader;
pub mod signer;
pub mod transport;
pub mod types;
pub mod xml;

// Re-export main types for convenience
pub use batch::{BatchClient, BatchUploadItem};
pub use body::{ByteStream, ObjectBody, RequestBody, ResponseBody};
pub use client::S3Client;
pub use error::{Result, S3Error};
pub use multipart::{MultipartUploadSession, PartUploader, SessionState};
pub use signer::S3SignerV4;
pub use transport::{HttpTransport, HyperTransport};
pub use types::{
    BatchResult, CompleteMultipartUploadOutput, CompletedPart, CopyObjectOutput, GetObjectOutput,
    HeadObjectOutput, ListPage, ListParams, MultipartConfig, ObjectDescriptor, PresignedOperation,
    PutObjectOutput, UploadOptions,
};
