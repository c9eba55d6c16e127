//! Read-only similarity search over a namespace.
//!
//! The retriever embeds the query once and asks the vector store for the
//! nearest entries of one namespace. It takes no lock: a search running
//! next to a synchronization pass may miss content being added or still
//! see content being removed.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::models::{Namespace, ScoredMatch, SearchFilter, VectorHit};
use crate::store::VectorStore;

pub struct Retriever {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(vectors: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { vectors, embedder }
    }

    /// Up to `k` matches from `namespace`, highest similarity first.
    ///
    /// `k <= 0` is [`IndexError::InvalidArgument`]. A blank query or an
    /// empty namespace yields an empty result.
    pub async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        k: i64,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredMatch>> {
        let k = usize::try_from(k)
            .ok()
            .filter(|k| *k > 0)
            .ok_or_else(|| IndexError::invalid(format!("k must be >= 1, got {}", k)))?;

        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.vectors.query(namespace, &vector, k, filter).await?;

        // The store filters server-side; re-check so a misbehaving backend
        // can never leak another namespace's content.
        let matches: Vec<ScoredMatch> = hits
            .into_iter()
            .filter(|h| &h.namespace == namespace)
            .filter(|h| filter.map_or(true, |f| f.matches(&h.payload)))
            .take(k)
            .map(into_match)
            .collect();

        debug!(namespace = %namespace, k, results = matches.len(), "search complete");
        Ok(matches)
    }

    /// Like [`search`](Self::search), dropping matches scored below `threshold`.
    pub async fn search_with_threshold(
        &self,
        namespace: &Namespace,
        query: &str,
        k: i64,
        filter: Option<&SearchFilter>,
        threshold: f32,
    ) -> Result<Vec<ScoredMatch>> {
        let mut matches = self.search(namespace, query, k, filter).await?;
        matches.retain(|m| m.score >= threshold);
        Ok(matches)
    }
}

fn into_match(hit: VectorHit) -> ScoredMatch {
    ScoredMatch {
        id: hit.id,
        score: hit.score,
        text: hit.payload.text,
        source_path: hit.payload.source_path,
        sequence_index: hit.payload.sequence_index,
        collection: hit.payload.collection,
    }
}
