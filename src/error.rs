//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Every fallible library operation returns [`IndexError`]. The variants
//! follow the collaborator that failed, so callers can decide whether to
//! retry ([`IndexError::is_retryable`]) or escalate.
//!
//! | Variant | Raised by | Retryable |
//! |---------|-----------|-----------|
//! | `SourceUnavailable` | Document source list/fetch, extraction | yes |
//! | `ModelUnavailable` | Embedding or completion call | yes |
//! | `RateLimited` | Embedding or completion call (HTTP 429) | yes |
//! | `StoreUnavailable` | Record store or vector store I/O | yes |
//! | `InvalidArgument` | Input validation, schema validation | no |
//! | `Inconsistent` | Record/vector existence mismatch | no |

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Errors surfaced by the indexing pipeline.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Document source transport or decoding failure.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Model service failure (network, 5xx, malformed response).
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model service refused the request after exhausting retries.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Vector store or record store I/O failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed input; no work was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Record and vector stores disagree in a way the next pass cannot heal.
    #[error("inconsistent index state: {0}")]
    Inconsistent(String),
}

impl IndexError {
    /// True when the same call may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::SourceUnavailable(_)
                | IndexError::ModelUnavailable(_)
                | IndexError::RateLimited(_)
                | IndexError::StoreUnavailable(_)
        )
    }

    /// True for failures scoped to a single model call, which the indexer
    /// records per chunk instead of aborting the pass.
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            IndexError::ModelUnavailable(_) | IndexError::RateLimited(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        IndexError::InvalidArgument(msg.into())
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        IndexError::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::ModelUnavailable(err.to_string())
    }
}
