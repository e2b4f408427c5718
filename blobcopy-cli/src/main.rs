mod config;
use anyhow::Context;
use blobcopy_core::{
    CopyBlobResult, CopyOrchestrator, LeaseRelease, StorageClient, WaitOutcome, split_blob_path,
};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use config::Config;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "blobcopy")]
#[command(about = "Leased server-side blob copies with status polling and abort")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy one blob to another under a lease on the source
    Copy {
        /// Path to configuration file
        #[arg(short, long, default_value = "blobcopy.yaml")]
        config: String,

        /// Source blob as <container>/<name>
        #[arg(long)]
        source: String,

        /// Destination blob as <container>/<name>
        #[arg(long)]
        destination: String,

        /// Abort the copy if it is still pending right after it starts
        #[arg(long)]
        abort_if_pending: bool,

        /// Upload a generated source blob of this many bytes first
        #[arg(long)]
        seed_size: Option<usize>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobcopy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Copy {
            config,
            source,
            destination,
            abort_if_pending,
            seed_size,
            json,
        } => {
            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            let result = match run_copy(
                &cfg,
                &source,
                &destination,
                abort_if_pending,
                seed_size,
            )
            .await
            {
                Ok(result) => result,
                Err(error) => {
                    tracing::error!("Copy failed: {:#}", error);
                    std::process::exit(1);
                }
            };

            if json {
                match serde_json::to_string_pretty(&result) {
                    Ok(body) => println!("{}", body),
                    Err(error) => {
                        tracing::error!("Failed to encode result: {}", error);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("{}", describe(&result));
            }

            if !result.succeeded() {
                std::process::exit(1);
            }
        }
    }
}

async fn run_copy(
    cfg: &Config,
    source: &str,
    destination: &str,
    abort_if_pending: bool,
    seed_size: Option<usize>,
) -> anyhow::Result<CopyBlobResult> {
    let client: Arc<dyn StorageClient> = cfg
        .storage_builder()?
        .build()
        .context("failed to build storage client")?;

    let (source_container, source_name) = split_blob_path(source)?;
    let (dest_container, dest_name) = split_blob_path(destination)?;
    let source = client.get_blob_handle(&source_container, &source_name)?;
    let destination = client.get_blob_handle(&dest_container, &dest_name)?;

    if let Some(size) = seed_size {
        let properties = client
            .put_blob(&source, seed_payload(size), None)
            .await
            .with_context(|| format!("failed to seed {}", source))?;
        tracing::info!(
            "Seeded source blob. blob={} size={} etag={}",
            source,
            properties.size_bytes,
            properties.etag
        );
    }

    let mut request = cfg.copy.request(source, destination)?;
    request.abort_if_pending |= abort_if_pending;

    let orchestrator = CopyOrchestrator::new(client);
    let result = orchestrator.run(request).await?;
    Ok(result)
}

fn seed_payload(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn describe(result: &CopyBlobResult) -> String {
    let operation = &result.operation;
    let outcome = match result.outcome {
        WaitOutcome::Completed(status) => status.to_string(),
        WaitOutcome::TimedOut => format!("timed out ({})", operation.status()),
    };
    let progress = operation
        .progress()
        .map(|progress| progress.to_raw())
        .unwrap_or_else(|| "-".to_string());
    let lease = match &result.lease_release {
        LeaseRelease::Released => "released".to_string(),
        LeaseRelease::InvalidState(reason) => format!("invalid state: {}", reason),
    };

    format!(
        "copy {} -> {}: {} (copy_id={} progress={} abort_issued={} lease={})",
        operation.source(),
        operation.destination(),
        outcome,
        operation.id(),
        progress,
        result.abort_issued,
        lease
    )
}
