//! Incremental synchronization of a namespace.
//!
//! One pass turns a batch of [`SourceDocument`]s into the *desired*
//! fingerprint set, loads the *existing* [`IndexRecord`]s eligible under
//! the [`CleanupMode`], and applies the set difference:
//!
//! ```text
//! to_add    = desired − existing   → embed, upsert vectors, then records
//! to_keep   = desired ∩ existing   → refresh payload and last_seen, never re-embed
//! to_remove = existing − desired   → delete vectors, then records
//! ```
//!
//! # Write ordering
//!
//! For every embedding batch the vector upsert completes before the
//! matching records are written. A pass that stops midway (store error,
//! timeout, crash) can therefore leave vector entries without a record,
//! but never a record without its vector. The next pass re-derives the
//! same fingerprints and upserts them again, which heals the gap.
//!
//! Removals delete vectors first and records second, so a removal that
//! stops midway leaves records that the next pass still sees and removes.
//!
//! A kept chunk can still move: an edit above it shifts its
//! `sequence_index`, and a re-save changes its modification time. Its
//! payload is rewritten in place; the embedding is left alone.
//!
//! # Failures
//!
//! Embedding failures are scoped to the chunks involved: a failed batch is
//! retried chunk by chunk and whatever still fails is reported in
//! [`SyncOutcome::failures`]. Store failures abort the pass.
//!
//! # Concurrency
//!
//! Every pass holds the namespace lock from loading existing records until
//! the last write, so it never races another pass or a
//! [`Deleter`](crate::deleter::Deleter) on the same namespace. With a
//! lease-backed [`NamespaceLocks`] that holds across processes too.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::extract;
use crate::fingerprint::chunk_document;
use crate::lock::NamespaceLocks;
use crate::models::{
    Chunk, ChunkFailure, ChunkPayload, CleanupMode, Fingerprint, IndexRecord, Namespace,
    SourceDocument, SyncOutcome, VectorEntry,
};
use crate::source::DocumentSource;
use crate::store::{RecordStore, VectorStore};

/// Chunking and batching knobs for the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerOptions {
    pub max_chars: usize,
    pub overlap: usize,
    /// Chunks per embedding call and per store write.
    pub batch_size: usize,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap: 50,
            batch_size: 64,
        }
    }
}

impl IndexerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: config.chunking.max_chars,
            overlap: config.chunking.overlap_chars,
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Result of [`Indexer::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub records: usize,
    pub vectors: usize,
    /// Vector entries with no record; healed by the next pass over their document.
    pub orphan_vectors: Vec<Fingerprint>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_vectors.is_empty()
    }
}

/// Owner of the write path into both stores.
pub struct Indexer {
    records: Arc<dyn RecordStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    locks: NamespaceLocks,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(
        records: Arc<dyn RecordStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        locks: NamespaceLocks,
        options: IndexerOptions,
    ) -> Self {
        Self {
            records,
            vectors,
            embedder,
            locks,
            options,
        }
    }

    /// Synchronize `namespace` with `documents`.
    ///
    /// Fails fast with [`IndexError::InvalidArgument`] when a document has an
    /// empty `source_path` or two documents share one. With
    /// [`CleanupMode::Full`], `documents` must be the complete document set
    /// of the namespace.
    pub async fn synchronize(
        &self,
        namespace: &Namespace,
        documents: &[SourceDocument],
        mode: CleanupMode,
    ) -> Result<SyncOutcome> {
        validate_batch(documents)?;
        let guard = self.locks.acquire(namespace).await?;
        let outcome = self
            .sync_locked(namespace, documents, mode, &HashSet::new())
            .await;
        guard.release().await;
        outcome
    }

    /// List `folder` on `source`, fetch and decode every document, then
    /// synchronize the result tagged with `collection`.
    ///
    /// Documents are indexed under `folder/path` (see
    /// [`DocumentRef::source_path`](crate::models::DocumentRef::source_path)),
    /// so several folders can share a namespace.
    ///
    /// A listing failure fails the call. A document that cannot be fetched
    /// or decoded is counted in [`SyncOutcome::failed_documents`], and its
    /// existing chunks are kept regardless of `mode`.
    pub async fn ingest(
        &self,
        namespace: &Namespace,
        source: &dyn DocumentSource,
        folder: &str,
        collection: &str,
        mode: CleanupMode,
    ) -> Result<SyncOutcome> {
        let refs = source.list(folder).await?;
        info!(namespace = %namespace, folder, documents = refs.len(), "ingesting folder");

        let mut documents = Vec::with_capacity(refs.len());
        let mut failures = Vec::new();
        let mut protected = HashSet::new();

        for doc_ref in &refs {
            let source_path = doc_ref.source_path();
            let decoded = match source.fetch(doc_ref).await {
                Ok(bytes) => extract::extract_path(&doc_ref.path, &bytes).map_err(IndexError::from),
                Err(e) => Err(e),
            };

            match decoded {
                Ok(text) => {
                    let mut doc =
                        SourceDocument::new(source_path, text).with_collection(collection);
                    doc.modified_time = doc_ref.revision.clone();
                    documents.push(doc);
                }
                Err(e) => {
                    warn!(namespace = %namespace, source_path = %source_path, error = %e, "skipping document");
                    protected.insert(source_path.clone());
                    failures.push(ChunkFailure {
                        source_path,
                        sequence_index: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        validate_batch(&documents)?;
        let guard = self.locks.acquire(namespace).await?;
        let synced = self
            .sync_locked(namespace, &documents, mode, &protected)
            .await;
        guard.release().await;
        let mut outcome = synced?;

        outcome.failed_documents = failures.len();
        failures.append(&mut outcome.failures);
        outcome.failures = failures;
        Ok(outcome)
    }

    /// Compare the record and vector id sets of `namespace`.
    ///
    /// Records without a vector cannot be healed by a later pass and are
    /// reported as [`IndexError::Inconsistent`].
    pub async fn verify(&self, namespace: &Namespace) -> Result<ConsistencyReport> {
        let guard = self.locks.acquire(namespace).await?;
        let report = self.verify_locked(namespace).await;
        guard.release().await;
        report
    }

    async fn verify_locked(&self, namespace: &Namespace) -> Result<ConsistencyReport> {
        let record_keys: BTreeSet<Fingerprint> = self
            .records
            .get_by_namespace(namespace)
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect();
        let vector_ids: BTreeSet<Fingerprint> =
            self.vectors.list_ids(namespace).await?.into_iter().collect();

        let missing: Vec<&Fingerprint> = record_keys.difference(&vector_ids).collect();
        if !missing.is_empty() {
            return Err(IndexError::Inconsistent(format!(
                "{} record(s) in namespace {} have no vector entry (first: {})",
                missing.len(),
                namespace,
                missing[0]
            )));
        }

        Ok(ConsistencyReport {
            records: record_keys.len(),
            vectors: vector_ids.len(),
            orphan_vectors: vector_ids.difference(&record_keys).cloned().collect(),
        })
    }

    async fn sync_locked(
        &self,
        namespace: &Namespace,
        documents: &[SourceDocument],
        mode: CleanupMode,
        protected_groups: &HashSet<String>,
    ) -> Result<SyncOutcome> {
        // Desired set. A paragraph repeated inside one document yields one
        // fingerprint; the first occurrence wins.
        let mut desired: BTreeMap<Fingerprint, (Chunk, &SourceDocument)> = BTreeMap::new();
        for doc in documents {
            for chunk in chunk_document(
                namespace,
                doc,
                self.options.max_chars,
                self.options.overlap,
            ) {
                desired
                    .entry(chunk.fingerprint.clone())
                    .or_insert((chunk, doc));
            }
        }

        let existing = self.load_existing(namespace, documents, mode).await?;

        let mut to_add: Vec<(&Chunk, &SourceDocument)> = Vec::new();
        let mut to_keep: Vec<IndexRecord> = Vec::new();
        let mut kept_payloads: Vec<(Fingerprint, ChunkPayload)> = Vec::new();
        for (fp, (chunk, doc)) in &desired {
            match existing.get(fp) {
                Some(record) => {
                    to_keep.push(record.clone());
                    kept_payloads.push((fp.clone(), payload_for(chunk, doc)));
                }
                None => to_add.push((chunk, *doc)),
            }
        }
        let to_remove: Vec<Fingerprint> = match mode {
            CleanupMode::None => Vec::new(),
            CleanupMode::Scoped | CleanupMode::Full => existing
                .values()
                .filter(|r| !desired.contains_key(&r.key))
                .filter(|r| !protected_groups.contains(&r.group_id))
                .map(|r| r.key.clone())
                .collect(),
        };

        debug!(
            namespace = %namespace,
            %mode,
            desired = desired.len(),
            existing = existing.len(),
            to_add = to_add.len(),
            to_keep = to_keep.len(),
            to_remove = to_remove.len(),
            "computed sync plan"
        );

        let now = Utc::now().timestamp();
        let mut outcome = SyncOutcome {
            unchanged: to_keep.len(),
            ..SyncOutcome::default()
        };

        for batch in to_add.chunks(self.options.batch_size.max(1)) {
            let (entries, mut failures) = self.embed_batch(namespace, batch).await?;
            if !entries.is_empty() {
                self.vectors.upsert(&entries).await?;
                let records: Vec<IndexRecord> = entries
                    .iter()
                    .map(|e| IndexRecord {
                        namespace: namespace.clone(),
                        key: e.id.clone(),
                        group_id: e.payload.source_path.clone(),
                        last_seen: now,
                    })
                    .collect();
                self.records.upsert(&records).await?;
            }
            outcome.added += entries.len();
            outcome.failed += failures.len();
            outcome.failures.append(&mut failures);
        }

        if !to_keep.is_empty() {
            outcome.updated = self
                .vectors
                .update_payloads(namespace, &kept_payloads)
                .await?;
            for record in &mut to_keep {
                record.last_seen = now;
            }
            self.records.upsert(&to_keep).await?;
        }

        if !to_remove.is_empty() {
            self.vectors.delete_by_ids(namespace, &to_remove).await?;
            self.records.delete_by_keys(namespace, &to_remove).await?;
            outcome.removed = to_remove.len();
        }

        info!(
            namespace = %namespace,
            documents = documents.len(),
            added = outcome.added,
            unchanged = outcome.unchanged,
            updated = outcome.updated,
            removed = outcome.removed,
            failed = outcome.failed,
            "sync complete"
        );
        Ok(outcome)
    }

    /// Records eligible for the set difference, keyed by fingerprint.
    async fn load_existing(
        &self,
        namespace: &Namespace,
        documents: &[SourceDocument],
        mode: CleanupMode,
    ) -> Result<BTreeMap<Fingerprint, IndexRecord>> {
        let records = match mode {
            CleanupMode::Full => self.records.get_by_namespace(namespace).await?,
            // Fingerprints include the source path, so only records of the
            // batch's groups can match a desired chunk.
            CleanupMode::None | CleanupMode::Scoped => {
                let mut records = Vec::new();
                for doc in documents {
                    records.extend(self.records.get_by_group(namespace, doc.group_id()).await?);
                }
                records
            }
        };
        Ok(records.into_iter().map(|r| (r.key.clone(), r)).collect())
    }

    /// Embed one batch. Model failures fall back to one call per chunk so a
    /// single bad chunk does not sink its neighbours.
    async fn embed_batch(
        &self,
        namespace: &Namespace,
        batch: &[(&Chunk, &SourceDocument)],
    ) -> Result<(Vec<VectorEntry>, Vec<ChunkFailure>)> {
        let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();

        let vectors: Vec<Result<Vec<f32>>> = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                warn!(
                    namespace = %namespace,
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding batch size mismatch, retrying per chunk"
                );
                self.embed_each(&texts).await?
            }
            Err(e) if e.is_model_failure() => {
                warn!(namespace = %namespace, error = %e, "embedding batch failed, retrying per chunk");
                self.embed_each(&texts).await?
            }
            Err(e) => return Err(e),
        };

        let mut entries = Vec::with_capacity(batch.len());
        let mut failures = Vec::new();
        for ((chunk, doc), vector) in batch.iter().zip(vectors) {
            let entry = vector.and_then(|embedding| {
                let entry = VectorEntry {
                    id: chunk.fingerprint.clone(),
                    namespace: namespace.clone(),
                    embedding,
                    payload: payload_for(chunk, doc),
                };
                entry.validate().map(|_| entry)
            });

            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        source_path = %chunk.source_path,
                        sequence_index = chunk.sequence_index,
                        error = %e,
                        "chunk not indexed"
                    );
                    failures.push(ChunkFailure {
                        source_path: chunk.source_path.clone(),
                        sequence_index: Some(chunk.sequence_index),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok((entries, failures))
    }

    /// Per-chunk embedding. Only non-model errors abort.
    async fn embed_each(&self, texts: &[String]) -> Result<Vec<Result<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embedder.embed(text).await {
                Ok(v) => out.push(Ok(v)),
                Err(e) if e.is_model_failure() => out.push(Err(e)),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

fn payload_for(chunk: &Chunk, doc: &SourceDocument) -> ChunkPayload {
    ChunkPayload {
        text: chunk.text.clone(),
        source_path: chunk.source_path.clone(),
        sequence_index: chunk.sequence_index,
        collection: doc.collection.clone(),
        modified_time: doc.modified_time.clone(),
    }
}

/// Reject batches the pass cannot reconcile unambiguously.
fn validate_batch(documents: &[SourceDocument]) -> Result<()> {
    let mut seen = HashSet::with_capacity(documents.len());
    for doc in documents {
        if doc.source_path.is_empty() {
            return Err(IndexError::invalid("document source_path must not be empty"));
        }
        if !seen.insert(doc.source_path.as_str()) {
            return Err(IndexError::invalid(format!(
                "duplicate source_path in batch: {}",
                doc.source_path
            )));
        }
    }
    Ok(())
}
