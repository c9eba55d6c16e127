//! # ait-index
//!
//! Incremental document indexing and retrieval for per-task vector
//! namespaces.
//!
//! Documents are chunked deterministically, every chunk gets a content
//! fingerprint, and a synchronization pass embeds only what changed while
//! keeping two stores in step: the vector store (embeddings + payload) and
//! the record store (one bookkeeping row per indexed fingerprint).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │ Document     │──▶│ Chunker → Fingerprint │──▶│   Indexer    │
//! │ Source       │   └──────────────────────┘   └──────┬───────┘
//! └──────────────┘                                      │
//!                                  ┌────────────────────┼──────────────┐
//!                                  ▼                    ▼              │
//!                           ┌─────────────┐     ┌──────────────┐      │
//!                           │ VectorStore │     │ RecordStore  │◀─ Deleter
//!                           └──────┬──────┘     └──────────────┘
//!                                  ▼
//!                             Retriever ──▶ generate::answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ait-index init
//! ait-index sync task-42 --cleanup scoped
//! ait-index search task-42 "refund policy" -k 3
//! ait-index ask task-42 "What is the refund policy?"
//! ait-index delete task-42 task-42/contracts/old.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Text chunking |
//! | [`fingerprint`] | Chunk content identity |
//! | [`store`] | Record/vector store traits and in-memory backends |
//! | [`sqlite_store`] | SQLite backends |
//! | [`indexer`] | Incremental synchronization |
//! | [`retriever`] | Similarity search |
//! | [`deleter`] | Document removal |
//! | [`lock`] | Per-namespace mutual exclusion |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generate`] | Answer generation over retrieved context |
//! | [`source`] | Document sources |
//! | [`extract`] | Text extraction from fetched bytes |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`commands`] | CLI command implementations |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod deleter;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod generate;
pub mod indexer;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod source;
pub mod sqlite_store;
pub mod store;
