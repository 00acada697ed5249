//! Client configuration
//!
//! Settings come from a YAML profile file or from the environment (with an
//! optional `.env` file). Either way the result is a [`Settings`] holding one
//! validated [`ClientConfig`] and the multipart tuning.

use crate::s3::error::S3Error;
use crate::s3::types::MultipartConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Connection and credential settings for one bucket.
///
/// Immutable once handed to [`crate::s3::S3Client::new`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URL, e.g. `https://s3.us-east-1.amazonaws.com`
    pub endpoint: String,

    /// AWS access key ID
    pub access_key: String,

    /// AWS secret access key
    pub secret_key: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket every operation targets
    pub bucket: String,

    /// Time allowed for each request to produce response headers
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification (self-signed test endpoints only)
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl ClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            bucket: bucket.into(),
            timeout_secs: default_timeout_secs(),
            insecure_tls: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject blank required fields and endpoints that are not absolute
    /// `http`/`https` URLs.
    pub fn validate(&self) -> crate::s3::Result<()> {
        let required = [
            ("endpoint", &self.endpoint),
            ("access key", &self.access_key),
            ("secret key", &self.secret_key),
            ("region", &self.region),
            ("bucket", &self.bucket),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(S3Error::Config(format!("{} is not set", name)));
            }
        }

        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| S3Error::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(S3Error::Config(format!(
                "endpoint must be an http(s) URL with a host, got {:?}",
                self.endpoint
            )));
        }
        if url.query().is_some() {
            return Err(S3Error::Config(format!(
                "endpoint must not carry a query string, got {:?}",
                self.endpoint
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("timeout_secs", &self.timeout_secs)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

/// Profile file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named profiles for different S3 configurations
    #[serde(default)]
    pub profiles: HashMap<String, ClientConfig>,

    /// Profile used when none is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    /// Multipart settings shared by every profile
    #[serde(default)]
    pub multipart: MultipartConfig,
}

impl Config {
    /// Get a profile by name, else the default profile, else the only profile.
    pub fn get_profile(&self, name: Option<&str>) -> Option<&ClientConfig> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else if self.profiles.len() == 1 {
            self.profiles.values().next()
        } else {
            None
        }
    }
}

/// Everything a client needs: where to connect and how to split uploads.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientConfig,
    pub multipart: MultipartConfig,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables, reading `.env` first.
///
/// See [`load_from_vars`] for the variables consulted.
pub fn load_from_env() -> Result<Settings> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    load_from_vars(|name| std::env::var(name).ok())
}

/// Build settings from a variable lookup.
///
/// Required (a missing or blank value is a configuration error):
/// - S3_ENDPOINT
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - AWS_REGION / S3_REGION
/// - S3_BUCKET
///
/// Optional: S3_TIMEOUT_SECS, S3_INSECURE_TLS, S3_PART_SIZE, S3_MULTIPART_CONCURRENCY
pub fn load_from_vars<F>(lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|value| !value.trim().is_empty())
    };
    let required = |names: &[&str]| -> Result<String> {
        var(names).ok_or_else(|| {
            S3Error::Config(format!("environment variable {} is not set", names.join(" / "))).into()
        })
    };

    let mut client = ClientConfig::new(
        required(&["S3_ENDPOINT"])?,
        required(&["AWS_ACCESS_KEY_ID", "S3_KEY"])?,
        required(&["AWS_SECRET_ACCESS_KEY", "S3_SECRET"])?,
        required(&["AWS_REGION", "S3_REGION"])?,
        required(&["S3_BUCKET"])?,
    );

    if let Some(timeout) = var(&["S3_TIMEOUT_SECS"]) {
        client.timeout_secs = timeout
            .trim()
            .parse()
            .context("S3_TIMEOUT_SECS must be a whole number of seconds")?;
    }
    if let Some(insecure) = var(&["S3_INSECURE_TLS"]) {
        client.insecure_tls = matches!(insecure.trim(), "true" | "1");
    }

    let mut multipart = MultipartConfig::default();
    if let Some(part_size) = var(&["S3_PART_SIZE"]) {
        let part_size = part_size
            .trim()
            .parse()
            .context("S3_PART_SIZE must be a size in bytes")?;
        multipart = multipart.with_part_size(part_size);
    }
    if let Some(concurrency) = var(&["S3_MULTIPART_CONCURRENCY"]) {
        let concurrency = concurrency
            .trim()
            .parse()
            .context("S3_MULTIPART_CONCURRENCY must be a number")?;
        multipart = multipart.with_concurrency(concurrency);
    }

    Ok(Settings { client, multipart })
}

/// Load configuration from file or environment
///
/// With a path, the YAML file is read and `profile_name` (or the file's
/// default profile) selected; without one, the environment is used.
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Settings> {
    let Some(path) = config_path else {
        return load_from_env();
    };

    let config = load_from_yaml(path)?;
    let client = match config.get_profile(profile_name) {
        Some(profile) => profile.clone(),
        None => match profile_name.or(config.default_profile.as_deref()) {
            Some(name) => anyhow::bail!("Profile '{}' not found in config file", name),
            None => anyhow::bail!(
                "Config file has {} profiles and no default_profile; pick one with --profile",
                config.profiles.len()
            ),
        },
    };

    // Serde skips the builder clamps, so apply them here
    let multipart = MultipartConfig::default()
        .with_part_size(config.multipart.part_size)
        .with_concurrency(config.multipart.concurrency)
        .with_threshold(config.multipart.threshold);

    Ok(Settings { client, multipart })
}
