use std::time::Duration;

use thiserror::Error;

pub type FilenResult<T> = Result<T, FilenError>;

/// The closed set of error kinds the client distinguishes.
///
/// `kind()` yields the canonical snake_case name used in task statuses
/// (`error_<kind>`) and summaries. Only `Transient` and `RateLimited` are
/// retried automatically; everything else propagates.
#[derive(Debug, Error)]
pub enum FilenError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous name: {0}")]
    Ambiguous(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Fatal(String),

    #[error("unsupported metadata version: {0:?}")]
    CryptoVersion(String),

    #[error("decryption failed: authentication tag mismatch")]
    CryptoAuth,

    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    #[error("hash mismatch: server {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("canceled")]
    Canceled,
}

impl FilenError {
    pub fn kind(&self) -> &'static str {
        match self {
            FilenError::Auth(_) => "auth",
            FilenError::NotFound(_) => "not_found",
            FilenError::Ambiguous(_) => "ambiguous",
            FilenError::Conflict(_) => "conflict",
            FilenError::RateLimited { .. } => "rate_limited",
            FilenError::Transient(_) => "transient",
            FilenError::Fatal(_) => "fatal",
            FilenError::CryptoVersion(_) => "crypto_version",
            FilenError::CryptoAuth => "crypto_auth",
            FilenError::CorruptChunk(_) => "corrupt_chunk",
            FilenError::HashMismatch { .. } => "hash_mismatch",
            FilenError::InvalidPath(_) => "invalid_path",
            FilenError::Io(_) => "io",
            FilenError::Canceled => "canceled",
        }
    }

    /// Whether the retry layer may transparently re-attempt the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FilenError::Transient(_) | FilenError::RateLimited { .. }
        )
    }
}
