//! Filegate - file-storage gateway with chunked upload and range reads

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use filegate::logging::{self, LogFormat};
use filegate::upload::ChunkPlan;
use filegate::{config::Config, server::Server, GatewayClient};
use std::path::PathBuf;
use tracing::info;

/// Filegate - upload, range-read and manage files in an object store
#[derive(Parser, Debug)]
#[command(name = "filegate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Upload a file to a running gateway
    Upload {
        /// File to upload
        file: PathBuf,

        /// Gateway URL including any base path
        #[arg(short, long)]
        endpoint: String,

        /// Object key (defaults to the file name)
        #[arg(short, long)]
        key: Option<String>,

        /// Part size in bytes
        #[arg(long, default_value_t = 5 * 1024 * 1024)]
        chunk_size: u64,

        /// Session token sent as a bearer token
        #[arg(long, env = "FILEGATE_TOKEN")]
        token: Option<String>,

        /// Send the file in one form upload instead of parts
        #[arg(long)]
        simple: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level, args.log_format)?;

    match args.command {
        Command::Serve { config } => serve(config).await,
        Command::Upload {
            file,
            endpoint,
            key,
            chunk_size,
            token,
            simple,
        } => upload(file, endpoint, key, chunk_size, token, simple).await,
    }
}

async fn serve(path: PathBuf) -> anyhow::Result<()> {
    info!("Starting Filegate v{}", filegate::VERSION);

    let config = Config::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    info!(path = %path.display(), "Loaded configuration");

    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}

async fn upload(
    file: PathBuf,
    endpoint: String,
    key: Option<String>,
    chunk_size: u64,
    token: Option<String>,
    simple: bool,
) -> anyhow::Result<()> {
    let data = Bytes::from(
        tokio::fs::read(&file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?,
    );
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("upload path has no file name")?;

    let mut client = GatewayClient::new(endpoint)?;
    if let Some(token) = token {
        client = client.with_token(token);
    }

    if simple {
        let receipt = client
            .simple_upload(&file_name, data, None, key.as_deref())
            .await?;
        info!(
            key = %receipt.key,
            size = receipt.size,
            replaced = receipt.replaced,
            "Upload complete"
        );
        return Ok(());
    }

    let key = key.unwrap_or_else(|| file_name.clone());
    let plan = ChunkPlan::new(data.len() as u64, chunk_size)?;
    info!(
        key = %key,
        size = plan.file_size(),
        parts = plan.total_parts(),
        "Starting multipart upload"
    );

    let done = client
        .upload_file(&key, data, chunk_size, None, |part, total| {
            info!(
                part = part,
                total = total,
                percent = %format!("{:.0}", plan.progress(part) * 100.0),
                "Uploaded part"
            );
        })
        .await?;

    info!(key = %done.key, etag = %done.etag, size = done.size, "Upload complete");
    Ok(())
}
