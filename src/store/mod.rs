//! Storage abstraction for the indexing pipeline.
//!
//! Two independent stores must stay set-equal per namespace:
//!
//! - [`RecordStore`] — bookkeeping rows `(namespace, key, group_id, last_seen)`.
//! - [`VectorStore`] — embeddings with their chunk payload.
//!
//! Both are injected as trait objects so the indexer, retriever and
//! deleter never own a process-wide connection. Backends:
//!
//! | Backend | Module |
//! |---------|--------|
//! | In-memory (tests, embedding in other processes) | [`memory`] |
//! | SQLite via `sqlx` | [`crate::sqlite_store`] |
//!
//! Implementations must be `Send + Sync`, must scope every operation by
//! namespace on the backend side, and must validate records and entries
//! before writing them.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ChunkPayload, Fingerprint, IndexRecord, Namespace, SearchFilter, VectorEntry, VectorHit,
};

/// Durable mapping from `(namespace, key)` to an [`IndexRecord`].
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_by_namespace`](RecordStore::get_by_namespace) | All records of a namespace |
/// | [`get_by_group`](RecordStore::get_by_group) | Records of one source document |
/// | [`upsert`](RecordStore::upsert) | Insert or refresh records |
/// | [`delete_by_keys`](RecordStore::delete_by_keys) | Remove records by fingerprint |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_by_namespace(&self, namespace: &Namespace) -> Result<Vec<IndexRecord>>;

    async fn get_by_group(&self, namespace: &Namespace, group_id: &str)
        -> Result<Vec<IndexRecord>>;

    /// Insert records or overwrite `group_id` and `last_seen` of existing keys.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()>;

    /// Delete the given keys. Missing keys are ignored; returns rows deleted.
    async fn delete_by_keys(&self, namespace: &Namespace, keys: &[Fingerprint]) -> Result<usize>;
}

/// Durable mapping from vector id to embedding and payload.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert entries or replace existing ones with the same `(namespace, id)`.
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()>;

    /// Overwrite the payload of stored entries, keeping their embeddings.
    ///
    /// Ids not stored are skipped. Returns the number of entries whose
    /// payload actually changed.
    async fn update_payloads(
        &self,
        namespace: &Namespace,
        updates: &[(Fingerprint, ChunkPayload)],
    ) -> Result<usize>;

    /// Delete the given ids. Missing ids are ignored; returns entries deleted.
    async fn delete_by_ids(&self, namespace: &Namespace, ids: &[Fingerprint]) -> Result<usize>;

    /// Delete every entry of the namespace whose payload matches `filter`.
    ///
    /// An empty filter is rejected rather than wiping the namespace.
    async fn delete_by_filter(&self, namespace: &Namespace, filter: &SearchFilter)
        -> Result<usize>;

    /// Nearest neighbours by cosine similarity, highest first, at most `k`.
    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>>;

    /// Every id stored for the namespace.
    async fn list_ids(&self, namespace: &Namespace) -> Result<Vec<Fingerprint>>;
}

/// Sort hits by score (desc) then id (asc) and keep the first `k`.
pub(crate) fn rank_hits(hits: &mut Vec<VectorHit>, k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
}
