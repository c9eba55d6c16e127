//! CLI command implementations.
//!
//! Each `run_*` function backs one `ait-index` subcommand: it opens the
//! configured database, wires the pipeline, runs one operation and prints
//! a plain-text report. Library callers use [`Pipeline`] directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::deleter::Deleter;
use crate::embedding::{create_embedder, Embedder};
use crate::generate::{self, DEFAULT_SYSTEM_PROMPT};
use crate::indexer::{Indexer, IndexerOptions};
use crate::lock::{LeaseOptions, NamespaceLocks};
use crate::migrate;
use crate::models::{CleanupMode, Namespace, SearchFilter, SyncOutcome};
use crate::retriever::Retriever;
use crate::source::LocalFolderSource;
use crate::sqlite_store::{SqliteLeaseStore, SqliteRecordStore, SqliteVectorStore};
use crate::store::{RecordStore, VectorStore};

/// Indexer, retriever and deleter sharing one pool, one embedder and one
/// lock table.
///
/// Writers are excluded per namespace inside this process by the lock
/// table and across processes by leases in the database.
pub struct Pipeline {
    pub pool: SqlitePool,
    pub indexer: Indexer,
    pub retriever: Retriever,
    pub deleter: Deleter,
}

impl Pipeline {
    /// Connect to the configured database, run migrations and wire the stores.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        Ok(Self::with_options(
            pool,
            embedder,
            IndexerOptions::from_config(config),
            LeaseOptions::from_config(&config.lock),
        ))
    }

    pub fn with_embedder(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        options: IndexerOptions,
    ) -> Self {
        Self::with_options(pool, embedder, options, LeaseOptions::default())
    }

    pub fn with_options(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        options: IndexerOptions,
        lease: LeaseOptions,
    ) -> Self {
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));
        let vectors: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
        let locks =
            NamespaceLocks::with_leases(Arc::new(SqliteLeaseStore::new(pool.clone())), lease);

        Self {
            indexer: Indexer::new(
                records.clone(),
                vectors.clone(),
                embedder.clone(),
                locks.clone(),
                options,
            ),
            retriever: Retriever::new(vectors.clone(), embedder),
            deleter: Deleter::new(records, vectors, locks),
            pool,
        }
    }
}

/// `ait-index init`
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

/// `ait-index sync`
pub async fn run_sync(
    config: &Config,
    namespace: &str,
    folder: Option<String>,
    collection: &str,
    mode: CleanupMode,
) -> Result<()> {
    let namespace = Namespace::new(namespace)?;
    let local = config
        .sources
        .local
        .as_ref()
        .context("No [sources.local] configured")?;
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let source = LocalFolderSource::new(local)?;
    let folder = folder.unwrap_or_else(|| namespace.as_str().to_string());

    let pipeline = Pipeline::open(config).await?;
    let outcome = pipeline
        .indexer
        .ingest(&namespace, &source, &folder, collection, mode)
        .await?;
    pipeline.pool.close().await;

    print_outcome(&namespace, mode, &outcome);
    Ok(())
}

fn print_outcome(namespace: &Namespace, mode: CleanupMode, outcome: &SyncOutcome) {
    println!("sync {} (cleanup: {})", namespace, mode);
    println!("  added: {}", outcome.added);
    println!("  unchanged: {}", outcome.unchanged);
    println!("  updated: {}", outcome.updated);
    println!("  removed: {}", outcome.removed);
    println!("  failed chunks: {}", outcome.failed);
    println!("  failed documents: {}", outcome.failed_documents);
    for failure in &outcome.failures {
        match failure.sequence_index {
            Some(i) => println!("    {}#{}: {}", failure.source_path, i, failure.error),
            None => println!("    {}: {}", failure.source_path, failure.error),
        }
    }
}

/// `ait-index delete`
pub async fn run_delete(config: &Config, namespace: &str, paths: &[String]) -> Result<()> {
    let namespace = Namespace::new(namespace)?;
    let pipeline = Pipeline::open(config).await?;
    let removed = pipeline.deleter.delete(&namespace, paths).await?;
    pipeline.pool.close().await;

    println!("delete {}", namespace);
    println!("  documents: {}", paths.len());
    println!("  chunks removed: {}", removed);
    Ok(())
}

/// `ait-index search`
pub async fn run_search(
    config: &Config,
    namespace: &str,
    query: &str,
    k: Option<i64>,
    source: Option<String>,
    collection: Option<String>,
    threshold: Option<f32>,
) -> Result<()> {
    let namespace = Namespace::new(namespace)?;
    let k = k.unwrap_or(config.retrieval.default_k);
    let threshold = threshold.unwrap_or(config.retrieval.similarity_threshold);
    let filter = SearchFilter {
        source_path: source,
        collection,
    };
    let filter = (!filter.is_empty()).then_some(filter);

    let pipeline = Pipeline::open(config).await?;
    let matches = pipeline
        .retriever
        .search_with_threshold(&namespace, query, k, filter.as_ref(), threshold)
        .await?;
    pipeline.pool.close().await;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}#{} ({})",
            i + 1,
            m.score,
            m.source_path,
            m.sequence_index,
            m.collection
        );
        println!("    {}", snippet(&m.text, 200));
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &flat[..i]),
        None => flat,
    }
}

/// `ait-index ask`
pub async fn run_ask(
    config: &Config,
    namespace: &str,
    query: &str,
    k: Option<i64>,
    system_prompt_file: Option<PathBuf>,
) -> Result<()> {
    let namespace = Namespace::new(namespace)?;
    let system_prompt = match system_prompt_file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read system prompt: {}", path.display()))?,
        None => config
            .completion
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    };
    let completer = generate::create_completer(&config.completion)?;

    let pipeline = Pipeline::open(config).await?;
    let answer = generate::answer(
        &pipeline.retriever,
        completer.as_ref(),
        &namespace,
        &system_prompt,
        query,
        k.unwrap_or(config.retrieval.default_k),
        config.retrieval.similarity_threshold,
        None,
    )
    .await?;
    pipeline.pool.close().await;

    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for m in &answer.sources {
            println!("  {}#{} [{:.3}]", m.source_path, m.sequence_index, m.score);
        }
    }
    Ok(())
}

/// `ait-index verify`
pub async fn run_verify(config: &Config, namespace: &str) -> Result<()> {
    let namespace = Namespace::new(namespace)?;
    let pipeline = Pipeline::open(config).await?;
    let report = pipeline.indexer.verify(&namespace).await?;
    pipeline.pool.close().await;

    println!("verify {}", namespace);
    println!("  records: {}", report.records);
    println!("  vectors: {}", report.vectors);
    println!("  orphan vectors: {}", report.orphan_vectors.len());
    if !report.is_clean() {
        println!("  re-run sync on the affected documents to heal orphan vectors");
    }
    Ok(())
}
