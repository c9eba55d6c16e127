//! Core data models for the indexing pipeline.
//!
//! These types are the explicit schema shared by the chunker, the indexer,
//! and both stores. Payloads are tagged records, never open maps; the
//! store backends call [`VectorEntry::validate`] and
//! [`IndexRecord::validate`] before persisting anything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Default document sub-collection tag.
pub const DEFAULT_COLLECTION: &str = "bib";

const MAX_NAMESPACE_LEN: usize = 128;

/// Isolation boundary for one indexing task.
///
/// Every store operation is scoped by a namespace. Construction validates
/// the name so a malformed namespace never reaches a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Validate and wrap a namespace name.
    ///
    /// Accepts 1–128 characters from `[A-Za-z0-9._:/-]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(IndexError::invalid("namespace must not be empty"));
        }
        if name.len() > MAX_NAMESPACE_LEN {
            return Err(IndexError::invalid(format!(
                "namespace exceeds {} characters",
                MAX_NAMESPACE_LEN
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/')))
        {
            return Err(IndexError::invalid(format!(
                "namespace '{}' contains invalid character {:?}",
                name, bad
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::new(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self> {
        Namespace::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

/// Hex-encoded SHA-256 content identity of a chunk.
///
/// Used as both the vector id and the record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest. Use [`crate::fingerprint::fingerprint`]
    /// to derive one from chunk content.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as listed by a [`DocumentSource`](crate::source::DocumentSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Folder the document was listed from.
    pub folder: String,
    /// Path relative to `folder`, `/`-separated.
    pub path: String,
    /// Source-side revision marker (modification time for local files).
    pub revision: Option<String>,
}

impl DocumentRef {
    /// `folder/path`, the `source_path` the document is indexed under.
    ///
    /// Same-named files of two folders synced into one namespace stay
    /// separate documents.
    pub fn source_path(&self) -> String {
        match self.folder.trim_matches('/') {
            "" | "." => self.path.clone(),
            folder => format!("{}/{}", folder, self.path),
        }
    }
}

/// A document submitted for synchronization.
///
/// Identified by `(namespace, source_path)`; the namespace is supplied by
/// the synchronize call.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_path: String,
    pub content: String,
    /// Sub-collection tag carried into every chunk payload.
    pub collection: String,
    /// Source-side modification time; payload only, never hashed.
    pub modified_time: Option<String>,
}

impl SourceDocument {
    pub fn new(source_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            content: content.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            modified_time: None,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_modified_time(mut self, modified_time: impl Into<String>) -> Self {
        self.modified_time = Some(modified_time.into());
        self
    }

    /// Group id used for bulk cleanup of this document's chunks.
    pub fn group_id(&self) -> &str {
        &self.source_path
    }
}

/// A contiguous text span of one source document, ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub namespace: Namespace,
    pub source_path: String,
    pub text: String,
    pub sequence_index: usize,
    pub fingerprint: Fingerprint,
}

/// Persisted bookkeeping row tracking one indexed fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub namespace: Namespace,
    pub key: Fingerprint,
    /// The owning document's `source_path`.
    pub group_id: String,
    /// Unix seconds of the last pass that confirmed this fingerprint.
    pub last_seen: i64,
}

impl IndexRecord {
    /// Check the record before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.key.as_str().is_empty() {
            return Err(IndexError::invalid("index record key must not be empty"));
        }
        if self.group_id.is_empty() {
            return Err(IndexError::invalid(format!(
                "index record {} has an empty group_id",
                self.key
            )));
        }
        Ok(())
    }
}

/// Provenance stored alongside each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub source_path: String,
    pub sequence_index: usize,
    pub collection: String,
    pub modified_time: Option<String>,
}

/// A persisted embedding plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: Fingerprint,
    pub namespace: Namespace,
    pub embedding: Vec<f32>,
    pub payload: ChunkPayload,
}

impl VectorEntry {
    /// Check the entry before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(IndexError::invalid("vector entry id must not be empty"));
        }
        if self.embedding.is_empty() {
            return Err(IndexError::invalid(format!(
                "vector entry {} has an empty embedding",
                self.id
            )));
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::invalid(format!(
                "vector entry {} has a non-finite component",
                self.id
            )));
        }
        if self.payload.source_path.is_empty() {
            return Err(IndexError::invalid(format!(
                "vector entry {} has an empty source_path",
                self.id
            )));
        }
        Ok(())
    }
}

/// Optional narrowing of a vector query or a filtered delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub source_path: Option<String>,
    pub collection: Option<String>,
}

impl SearchFilter {
    pub fn source_path(path: impl Into<String>) -> Self {
        Self {
            source_path: Some(path.into()),
            collection: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_path.is_none() && self.collection.is_none()
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.source_path
            .as_deref()
            .map_or(true, |p| p == payload.source_path)
            && self
                .collection
                .as_deref()
                .map_or(true, |c| c == payload.collection)
    }
}

/// Raw hit returned by a [`VectorStore`](crate::store::VectorStore) query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: Fingerprint,
    pub namespace: Namespace,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// A ranked retrieval result with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: Fingerprint,
    pub score: f32,
    pub text: String,
    pub source_path: String,
    pub sequence_index: usize,
    pub collection: String,
}

/// Which existing records a synchronization pass may delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Additions only.
    None,
    /// Reconcile only groups present in the batch.
    #[default]
    Scoped,
    /// Reconcile the whole namespace.
    ///
    /// Precondition: the batch is the complete document set of the
    /// namespace. Any document left out is deleted from both stores.
    Full,
}

impl FromStr for CleanupMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CleanupMode::None),
            "scoped" => Ok(CleanupMode::Scoped),
            "full" => Ok(CleanupMode::Full),
            other => Err(IndexError::invalid(format!(
                "unknown cleanup mode '{}'. Use none, scoped, or full.",
                other
            ))),
        }
    }
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupMode::None => "none",
            CleanupMode::Scoped => "scoped",
            CleanupMode::Full => "full",
        })
    }
}

/// A chunk or document that could not be indexed in a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub source_path: String,
    /// `None` when the whole document failed (fetch or extraction).
    pub sequence_index: Option<usize>,
    pub error: String,
}

/// Structured result of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub added: usize,
    pub unchanged: usize,
    /// Unchanged chunks whose payload (position, collection, modification
    /// time) was rewritten without re-embedding.
    pub updated: usize,
    pub removed: usize,
    /// Chunks whose embedding failed; they are retried by the next pass.
    pub failed: usize,
    /// Documents skipped because they could not be fetched or decoded.
    pub failed_documents: usize,
    pub failures: Vec<ChunkFailure>,
}

impl SyncOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.failed_documents == 0
    }
}
