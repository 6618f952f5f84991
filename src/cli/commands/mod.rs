//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod documents;
mod init;
mod pipeline;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "filingtext")]
#[command(about = "Distributed text extraction for PDF filings")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables, queues and buckets
    Init,

    /// Queue new and stale documents for extraction
    Inject {
        /// Maximum number of documents to queue
        limit: Option<usize>,
    },

    /// Requeue one document regardless of its status
    InjectOne {
        /// External filing number of the document
        external_num: String,
    },

    /// Extract queued documents and publish results to the results queue
    Extract {
        /// Stop after this many work messages (default: run forever)
        limit: Option<usize>,
    },

    /// Extract queued documents without publishing results
    ExtractBatch {
        /// Stop after this many work messages (default: run forever)
        limit: Option<usize>,
    },

    /// Apply results from the results queue to the database
    Collect {
        /// Stop after this many results
        limit: Option<usize>,
    },

    /// Apply results by scanning stored text artifacts
    CollectBatch {
        /// Stop after updating this many documents
        limit: Option<usize>,
    },

    /// Show document counts and queue depths
    Status,

    /// Add a document for extraction
    AddDocument {
        /// External filing number
        external_num: String,
        /// URL of the PDF
        source_url: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options)
        .await
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Inject { limit } => pipeline::cmd_inject(&settings, limit).await,
        Commands::InjectOne { external_num } => {
            pipeline::cmd_inject_one(&settings, &external_num).await
        }
        Commands::Extract { limit } => pipeline::cmd_extract(&settings, limit, true).await,
        Commands::ExtractBatch { limit } => pipeline::cmd_extract(&settings, limit, false).await,
        Commands::Collect { limit } => pipeline::cmd_collect(&settings, limit).await,
        Commands::CollectBatch { limit } => pipeline::cmd_collect_batch(&settings, limit).await,
        Commands::Status => status::cmd_status(&settings).await,
        Commands::AddDocument {
            external_num,
            source_url,
        } => documents::cmd_add_document(&settings, &external_num, &source_url).await,
    }
}
