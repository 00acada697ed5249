//! s3kit - S3-compatible object storage client
//!
//! SigV4-signed object operations, presigned URLs, multipart uploads that
//! abort on failure, and batch uploads/deletes with per-item results.

pub mod cli;
pub mod config;
pub mod s3;

pub use config::{ClientConfig, Settings};
pub use s3::{S3Client, S3Error};
