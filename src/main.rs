//! # ait-index CLI
//!
//! Indexes task folders into per-task namespaces and queries them.
//!
//! ## Usage
//!
//! ```bash
//! ait-index --config ./config/ait.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ait-index init` | Create the SQLite database and tables |
//! | `ait-index sync <namespace>` | Synchronize a folder of `[sources.local]` into a namespace |
//! | `ait-index delete <namespace> <paths..>` | Remove documents from a namespace |
//! | `ait-index search <namespace> "<query>"` | Similarity search |
//! | `ait-index ask <namespace> "<question>"` | Answer a question from retrieved context |
//! | `ait-index verify <namespace>` | Check that records and vectors agree |
//!
//! Log verbosity comes from `RUST_LOG`, falling back to `[log] level`.

use std::path::PathBuf;

use ait_index::commands;
use ait_index::config;
use ait_index::models::{CleanupMode, DEFAULT_COLLECTION};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Incremental indexing and retrieval for per-task vector namespaces.
#[derive(Parser)]
#[command(name = "ait-index", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ait.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Synchronize a local folder into a namespace.
    ///
    /// Only new or changed chunks are embedded. The cleanup mode decides
    /// which previously indexed chunks may be removed.
    Sync {
        namespace: String,

        /// Folder under `[sources.local] root`; defaults to the namespace name.
        /// Documents are indexed as `<folder>/<path>`.
        #[arg(long)]
        folder: Option<String>,

        /// Collection tag stored with every chunk.
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,

        /// `none` (append only), `scoped` (reconcile listed documents) or
        /// `full` (the folder is the whole namespace; anything else is deleted).
        #[arg(long, default_value = "scoped")]
        cleanup: CleanupMode,
    },

    /// Delete documents from a namespace. Missing paths are not an error.
    Delete {
        namespace: String,

        /// Source paths as shown by `search`, i.e. `<folder>/<path>`.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Similarity search within a namespace.
    Search {
        namespace: String,

        query: String,

        /// Maximum number of results (defaults to `[retrieval] default_k`).
        #[arg(short, long, allow_negative_numbers = true)]
        k: Option<i64>,

        /// Only match chunks of this source path.
        #[arg(long)]
        source: Option<String>,

        /// Only match chunks of this collection.
        #[arg(long)]
        collection: Option<String>,

        /// Drop matches scoring below this (defaults to `[retrieval] similarity_threshold`).
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,
    },

    /// Answer a question using retrieved context.
    Ask {
        namespace: String,

        query: String,

        #[arg(short, long)]
        k: Option<i64>,

        /// File holding the system prompt (defaults to `[completion] system_prompt`).
        #[arg(long)]
        system_prompt: Option<PathBuf>,
    },

    /// Compare the record and vector stores of a namespace.
    Verify { namespace: String },
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.log.level)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Sync {
            namespace,
            folder,
            collection,
            cleanup,
        } => commands::run_sync(&cfg, &namespace, folder, &collection, cleanup).await?,
        Commands::Delete { namespace, paths } => {
            commands::run_delete(&cfg, &namespace, &paths).await?
        }
        Commands::Search {
            namespace,
            query,
            k,
            source,
            collection,
            threshold,
        } => {
            commands::run_search(&cfg, &namespace, &query, k, source, collection, threshold)
                .await?
        }
        Commands::Ask {
            namespace,
            query,
            k,
            system_prompt,
        } => commands::run_ask(&cfg, &namespace, &query, k, system_prompt).await?,
        Commands::Verify { namespace } => commands::run_verify(&cfg, &namespace).await?,
    }

    Ok(())
}
