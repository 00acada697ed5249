//! Command-line interface for s3kit
//!
//! ```bash
//! # List one page level under a prefix
//! s3kit ls photos/
//!
//! # Upload a file (multipart above the threshold) and read it back
//! s3kit put ./big.iso isos/big.iso --content-type application/octet-stream
//! s3kit get isos/big.iso ./copy.iso
//!
//! # Upload many files, four at a time
//! s3kit upload ./logs/*.gz --prefix logs/ --concurrency 4
//!
//! # Share an object for an hour
//! s3kit presign isos/big.iso --expires 3600
//! ```

pub mod commands;

use clap::ValueEnum;

/// How command results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
