use crate::cli::OutputFormat;
use crate::s3::{
    BatchClient, BatchUploadItem, ObjectBody, PresignedOperation, S3Client, UploadOptions,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}

/// Format a timestamp as [YYYY-MM-DD HH:MM:SS UTC]
pub fn format_s3_date(date: Option<&DateTime<Utc>>) -> String {
    match date {
        Some(date) => date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => " ".repeat(23),
    }
}

/// Parse repeated `--meta name=value` flags.
pub fn parse_metadata(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| -> Result<(String, String)> {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("metadata must be name=value, got {:?}", pair))?;
            if name.trim().is_empty() {
                anyhow::bail!("metadata name is empty in {:?}", pair);
            }
            Ok((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List command: pages through the listing, printing as it goes.
pub async fn cmd_ls(
    client: &S3Client,
    prefix: Option<&str>,
    recursive: bool,
    max_pages: usize,
    format: OutputFormat,
) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::with_capacity(64 * 1024, stdout.lock());

    let mut params = crate::s3::ListParams {
        prefix: prefix.map(str::to_string),
        delimiter: if recursive { None } else { Some("/".to_string()) },
        ..Default::default()
    };

    let mut pages = 0usize;
    let mut line_buf = String::with_capacity(256);
    loop {
        let page = client.list_objects_v2(&params).await?;
        pages += 1;

        match format {
            OutputFormat::Json => {
                writeln!(out, "{}", serde_json::to_string(&page)?)?;
            }
            OutputFormat::Text => {
                for common_prefix in &page.common_prefixes {
                    writeln!(out, "{:>23} {:>10}  {}", "", "PRE", common_prefix)?;
                }
                for object in &page.objects {
                    line_buf.clear();
                    let _ = write!(
                        line_buf,
                        "{} {:>10}  {}",
                        format_s3_date(object.last_modified.as_ref()),
                        format_bytes(object.size),
                        object.key
                    );
                    writeln!(out, "{}", line_buf)?;
                }
            }
        }

        let next = page.continuation_token.filter(|_| page.is_truncated);
        match next {
            Some(token) if max_pages == 0 || pages < max_pages => {
                params.continuation_token = Some(token);
            }
            _ => break,
        }
    }

    out.flush()?;
    Ok(())
}

/// Upload one local file (or stdin with `-`).
pub async fn cmd_put(
    client: &S3Client,
    source: &Path,
    key: &str,
    options: &UploadOptions,
    format: OutputFormat,
) -> Result<()> {
    let body = if source == Path::new("-") {
        ObjectBody::from_reader(tokio::io::stdin())
    } else {
        ObjectBody::from_path(source)
            .await
            .with_context(|| format!("Failed to open {}", source.display()))?
    };

    let output = client.put(key, body, options).await?;

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => {
            let mut line = format!(
                "Uploaded: {} -> s3://{}/{}",
                source.display(),
                client.bucket(),
                key
            );
            if let Some(parts) = output.parts {
                let _ = write!(line, " ({} parts)", parts);
            }
            println!("{}", line);
        }
    }
    Ok(())
}

/// Download an object to a file, or to stdout when no destination is given.
pub async fn cmd_get(client: &S3Client, key: &str, dest: Option<&Path>) -> Result<()> {
    match dest {
        Some(path) => {
            let bytes = client.download_to_file(key, path).await?;
            eprintln!(
                "Downloaded: s3://{}/{} -> {} ({})",
                client.bucket(),
                key,
                path.display(),
                format_bytes(bytes)
            );
        }
        None => {
            let output = client.get_object(key).await?;
            let mut stdout = tokio::io::stdout();
            let mut body = output.body.into_stream();
            while let Some(chunk) = body.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
    }
    Ok(())
}

/// Delete keys concurrently; fails when any delete failed.
pub async fn cmd_rm(client: &S3Client, keys: &[String], format: OutputFormat) -> Result<()> {
    let batch = BatchClient::new(client.clone());
    let results = batch.batch_delete(keys.iter().cloned()).await;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            for result in &results {
                match &result.error {
                    None => println!("Deleted: s3://{}/{}", client.bucket(), result.key),
                    Some(error) => println!("Error deleting {}: {}", result.key, error),
                }
            }
        }
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        anyhow::bail!("{} of {} deletes failed", failed, results.len());
    }
    Ok(())
}

/// Stat command
pub async fn cmd_stat(client: &S3Client, key: &str, format: OutputFormat) -> Result<()> {
    let head = client.head(key).await?;

    if let OutputFormat::Json = format {
        return print_json(&head);
    }

    if !head.exists {
        anyhow::bail!("Object not found: {}", key);
    }

    println!("Object: s3://{}/{}", client.bucket(), key);
    if let Some(size) = head.content_length {
        println!("Size: {} ({})", format_bytes(size), size);
    }
    println!("Last Modified: {}", head.last_modified.as_deref().unwrap_or("Unknown"));
    if let Some(ref content_type) = head.content_type {
        println!("Content-Type: {}", content_type);
    }
    if let Some(ref etag) = head.etag {
        println!("ETag: {}", etag);
    }
    for (name, value) in &head.metadata {
        println!("Metadata: {}={}", name, value);
    }

    Ok(())
}

/// Server-side copy
pub async fn cmd_cp(
    client: &S3Client,
    source: &str,
    dest: &str,
    format: OutputFormat,
) -> Result<()> {
    let output = client.copy(source, dest).await?;
    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => println!(
            "Copied: s3://{bucket}/{} -> s3://{bucket}/{} (ETag {})",
            source,
            dest,
            output.etag,
            bucket = client.bucket()
        ),
    }
    Ok(())
}

/// Print a presigned URL
pub fn cmd_presign(
    client: &S3Client,
    key: &str,
    expires_in: u64,
    operation: PresignedOperation,
) -> Result<()> {
    let url = client.presigned_url(key, expires_in, operation)?;
    println!("{}", url);
    Ok(())
}

/// Upload local files under `prefix`, `concurrency` at a time.
pub async fn cmd_upload(
    client: &S3Client,
    files: &[PathBuf],
    prefix: &str,
    concurrency: usize,
    options: &UploadOptions,
    format: OutputFormat,
) -> Result<()> {
    let mut items = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Not a file name: {}", path.display()))?;
        let key = format!("{}{}", prefix, name);
        items.push(BatchUploadItem::from_path(key, path).with_options(options.clone()));
    }

    let batch = BatchClient::new(client.clone());
    let results = batch.batch_upload(items, concurrency).await;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            for result in &results {
                match &result.error {
                    None => println!("Uploaded: s3://{}/{}", client.bucket(), result.key),
                    Some(error) => println!("Error uploading {}: {}", result.key, error),
                }
            }
        }
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, results.len());
    }
    Ok(())
}
