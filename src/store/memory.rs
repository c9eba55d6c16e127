//! In-memory [`RecordStore`] and [`VectorStore`] implementations.
//!
//! Uses ordered maps behind `std::sync::RwLock` for thread safety, keyed by
//! `(namespace, id)` so iteration is deterministic. Vector queries are
//! brute-force cosine similarity over the namespace's entries.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{IndexError, Result};
use crate::models::{
    ChunkPayload, Fingerprint, IndexRecord, Namespace, SearchFilter, VectorEntry, VectorHit,
};

use super::{rank_hits, RecordStore, VectorStore};

type Key = (Namespace, Fingerprint);

fn poisoned() -> IndexError {
    IndexError::StoreUnavailable("in-memory store lock poisoned".to_string())
}

/// In-memory record store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<Key, IndexRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_by_namespace(&self, namespace: &Namespace) -> Result<Vec<IndexRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|r| &r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_by_group(
        &self,
        namespace: &Namespace,
        group_id: &str,
    ) -> Result<Vec<IndexRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|r| &r.namespace == namespace && r.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        for r in records {
            r.validate()?;
        }
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for r in records {
            stored.insert((r.namespace.clone(), r.key.clone()), r.clone());
        }
        Ok(())
    }

    async fn delete_by_keys(&self, namespace: &Namespace, keys: &[Fingerprint]) -> Result<usize> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        Ok(keys
            .iter()
            .filter(|k| stored.remove(&(namespace.clone(), (*k).clone())).is_some())
            .count())
    }
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<BTreeMap<Key, VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries of a namespace, ordered by id.
    pub fn entries(&self, namespace: &Namespace) -> Result<Vec<VectorEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .filter(|e| &e.namespace == namespace)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        for e in entries {
            e.validate()?;
        }
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        for e in entries {
            stored.insert((e.namespace.clone(), e.id.clone()), e.clone());
        }
        Ok(())
    }

    async fn update_payloads(
        &self,
        namespace: &Namespace,
        updates: &[(Fingerprint, ChunkPayload)],
    ) -> Result<usize> {
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        let mut changed = 0;
        for (id, payload) in updates {
            if let Some(entry) = stored.get_mut(&(namespace.clone(), id.clone())) {
                if &entry.payload != payload {
                    entry.payload = payload.clone();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn delete_by_ids(&self, namespace: &Namespace, ids: &[Fingerprint]) -> Result<usize> {
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        Ok(ids
            .iter()
            .filter(|id| stored.remove(&(namespace.clone(), (*id).clone())).is_some())
            .count())
    }

    async fn delete_by_filter(
        &self,
        namespace: &Namespace,
        filter: &SearchFilter,
    ) -> Result<usize> {
        if filter.is_empty() {
            return Err(IndexError::invalid("delete_by_filter requires a non-empty filter"));
        }
        let mut stored = self.entries.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|(ns, _), e| ns != namespace || !filter.matches(&e.payload));
        Ok(before - stored.len())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>> {
        let stored = self.entries.read().map_err(|_| poisoned())?;
        let mut hits: Vec<VectorHit> = stored
            .values()
            .filter(|e| &e.namespace == namespace)
            .filter(|e| filter.map_or(true, |f| f.matches(&e.payload)))
            .map(|e| VectorHit {
                id: e.id.clone(),
                namespace: e.namespace.clone(),
                score: cosine_similarity(vector, &e.embedding),
                payload: e.payload.clone(),
            })
            .collect();
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn list_ids(&self, namespace: &Namespace) -> Result<Vec<Fingerprint>> {
        let stored = self.entries.read().map_err(|_| poisoned())?;
        Ok(stored
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, id)| id.clone())
            .collect())
    }
}
