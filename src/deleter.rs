//! Removal of whole source documents from a namespace.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::lock::NamespaceLocks;
use crate::models::{Fingerprint, Namespace, SearchFilter};
use crate::store::{RecordStore, VectorStore};

pub struct Deleter {
    records: Arc<dyn RecordStore>,
    vectors: Arc<dyn VectorStore>,
    locks: NamespaceLocks,
}

impl Deleter {
    pub fn new(
        records: Arc<dyn RecordStore>,
        vectors: Arc<dyn VectorStore>,
        locks: NamespaceLocks,
    ) -> Self {
        Self {
            records,
            vectors,
            locks,
        }
    }

    /// Delete every chunk of each `source_path` from both stores.
    ///
    /// Returns the number of index records removed. Paths with nothing
    /// indexed contribute 0, so repeating a delete is harmless.
    ///
    /// Vectors go first, then records. Vector entries left behind by an
    /// interrupted synchronization carry no record; they are swept by
    /// `source_path` as well.
    pub async fn delete(&self, namespace: &Namespace, source_paths: &[String]) -> Result<usize> {
        if source_paths.iter().any(|p| p.is_empty()) {
            return Err(IndexError::invalid("source_path must not be empty"));
        }
        let paths: BTreeSet<&str> = source_paths.iter().map(String::as_str).collect();

        let guard = self.locks.acquire(namespace).await?;
        let removed = self.delete_locked(namespace, &paths).await;
        guard.release().await;
        let removed = removed?;

        info!(namespace = %namespace, documents = source_paths.len(), removed, "delete complete");
        Ok(removed)
    }

    async fn delete_locked(&self, namespace: &Namespace, paths: &BTreeSet<&str>) -> Result<usize> {
        let mut removed = 0;
        for &path in paths {
            let keys: Vec<Fingerprint> = self
                .records
                .get_by_group(namespace, path)
                .await?
                .into_iter()
                .map(|r| r.key)
                .collect();

            let mut vectors_removed = 0;
            if !keys.is_empty() {
                vectors_removed += self.vectors.delete_by_ids(namespace, &keys).await?;
            }
            vectors_removed += self
                .vectors
                .delete_by_filter(namespace, &SearchFilter::source_path(path))
                .await?;

            let records_removed = if keys.is_empty() {
                0
            } else {
                self.records.delete_by_keys(namespace, &keys).await?
            };

            debug!(
                namespace = %namespace,
                source_path = path,
                records_removed,
                vectors_removed,
                "deleted document"
            );
            removed += records_removed;
        }

        Ok(removed)
    }
}
