use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use s3kit::cli::{commands, OutputFormat};
use s3kit::config;
use s3kit::s3::{PresignedOperation, S3Client, UploadOptions};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "s3kit")]
#[command(version, about = "S3-compatible object storage client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (environment variables are used when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Override the configured bucket
    #[arg(long, global = true, env = "S3KIT_BUCKET")]
    bucket: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum PresignMethod {
    Get,
    Put,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects under a prefix
    Ls {
        /// Key prefix
        prefix: Option<String>,

        /// List every key instead of one directory level
        #[arg(short, long)]
        recursive: bool,

        /// Stop after this many pages (0 = all)
        #[arg(long, default_value = "0")]
        max_pages: usize,
    },

    /// Upload a local file (`-` for stdin)
    Put {
        source: PathBuf,
        key: String,

        #[arg(long)]
        content_type: Option<String>,

        /// User metadata as name=value (repeatable)
        #[arg(long = "meta")]
        metadata: Vec<String>,

        /// Multipart part size in bytes
        #[arg(long)]
        part_size: Option<usize>,
    },

    /// Download an object (to stdout when no destination is given)
    Get {
        key: String,
        dest: Option<PathBuf>,
    },

    /// Delete objects
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show object info
    Stat { key: String },

    /// Server-side copy within the bucket
    Cp { source: String, dest: String },

    /// Print a presigned URL
    Presign {
        key: String,

        /// Lifetime in seconds (max 604800)
        #[arg(long, default_value = "3600")]
        expires: u64,

        #[arg(long, value_enum, default_value = "get")]
        method: PresignMethod,
    },

    /// Upload many local files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Key prefix for the uploaded files
        #[arg(long, default_value = "")]
        prefix: String,

        /// Files uploaded at once
        #[arg(long, default_value = "4")]
        concurrency: usize,

        #[arg(long)]
        content_type: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut settings = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    if let Some(bucket) = cli.bucket {
        settings.client.bucket = bucket;
    }
    tracing::debug!(config = ?settings.client, "loaded configuration");

    let client = S3Client::new(settings.client)?.with_multipart_config(settings.multipart);
    let format = cli.format;

    match cli.command {
        Commands::Ls {
            prefix,
            recursive,
            max_pages,
        } => {
            commands::cmd_ls(&client, prefix.as_deref(), recursive, max_pages, format).await?;
        }
        Commands::Put {
            source,
            key,
            content_type,
            metadata,
            part_size,
        } => {
            let mut options = UploadOptions::default();
            options.content_type = content_type;
            options.part_size = part_size;
            for (name, value) in commands::parse_metadata(&metadata)? {
                options = options.with_metadata(name, value);
            }
            commands::cmd_put(&client, &source, &key, &options, format).await?;
        }
        Commands::Get { key, dest } => {
            commands::cmd_get(&client, &key, dest.as_deref()).await?;
        }
        Commands::Rm { keys } => {
            commands::cmd_rm(&client, &keys, format).await?;
        }
        Commands::Stat { key } => {
            commands::cmd_stat(&client, &key, format).await?;
        }
        Commands::Cp { source, dest } => {
            commands::cmd_cp(&client, &source, &dest, format).await?;
        }
        Commands::Presign {
            key,
            expires,
            method,
        } => {
            let operation = match method {
                PresignMethod::Get => PresignedOperation::Get,
                PresignMethod::Put => PresignedOperation::Put,
            };
            commands::cmd_presign(&client, &key, expires, operation)?;
        }
        Commands::Upload {
            files,
            prefix,
            concurrency,
            content_type,
        } => {
            let options = UploadOptions {
                content_type,
                ..UploadOptions::default()
            };
            commands::cmd_upload(&client, &files, &prefix, concurrency, &options, format).await?;
        }
    }

    Ok(())
}
