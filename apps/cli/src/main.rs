//! coldpush: chunked, pipelined uploads to a cold-storage vault.

mod config;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use coldpush_transfer::tree_hash;
use coldpush_upload::{ArchiveUploader, UploadConfig};
use coldpush_vault::DirectoryVault;

use config::CliConfig;

/// Upload files to a cold-storage archive vault
#[derive(Parser)]
#[command(name = "coldpush")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (default: ~/.config/coldpush/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file as a new archive
    Upload {
        /// Target vault
        #[arg(long)]
        vault_name: String,

        /// File to upload
        #[arg(long)]
        archive: PathBuf,

        /// Part size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Archive description
        #[arg(long, default_value = "")]
        description: String,

        /// Vault region
        #[arg(long)]
        region: Option<String>,

        /// Root directory of the vault store
        #[arg(long)]
        vault_root: Option<PathBuf>,
    },

    /// Print the tree-hash of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Create a vault
    CreateVault {
        /// Vault name
        name: String,

        /// Vault region
        #[arg(long)]
        region: Option<String>,

        /// Root directory of the vault store
        #[arg(long)]
        vault_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "warn,coldpush=debug"
    } else {
        "warn,coldpush=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload {
            vault_name,
            archive,
            chunk_size,
            description,
            region,
            vault_root,
        } => {
            let upload = UploadConfig {
                vault_name,
                chunk_size: chunk_size.unwrap_or(config.chunk_size),
                description,
                source_path: archive,
                region: region.unwrap_or(config.region),
            };
            let root = vault_root.unwrap_or(config.vault_root);
            let archive_id = upload_archive(upload, root).await?;
            println!("{archive_id}");
        }
        Commands::Hash { file } => {
            let path = file.clone();
            let hash = tokio::task::spawn_blocking(move || tree_hash::hash_file(&path))
                .await?
                .with_context(|| format!("hashing {}", file.display()))?;
            println!("{hash}");
        }
        Commands::CreateVault {
            name,
            region,
            vault_root,
        } => {
            let vault = DirectoryVault::new(
                vault_root.unwrap_or(config.vault_root),
                &region.unwrap_or(config.region),
            )?;
            let dir = vault.create_vault(&name).await?;
            println!("{}", dir.display());
        }
    }

    Ok(())
}

async fn upload_archive(config: UploadConfig, vault_root: PathBuf) -> anyhow::Result<String> {
    let vault = DirectoryVault::new(vault_root, &config.region)?;
    let mut uploader = ArchiveUploader::new(Arc::new(vault));

    let total_size = std::fs::metadata(&config.source_path)
        .map(|m| m.len())
        .unwrap_or(0);
    let logger = uploader
        .take_events()
        .map(|events| tokio::spawn(progress::log_events(events, total_size)));

    let cancel = uploader.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    let result = uploader.upload(&config).await;
    interrupt.abort();
    drop(uploader);
    if let Some(logger) = logger {
        let _ = logger.await;
    }

    match result {
        Ok(outcome) => Ok(outcome.archive_id),
        Err(e) => {
            let stage = e.stage();
            Err(anyhow::Error::new(e).context(format!("upload failed at the {stage} step")))
        }
    }
}
