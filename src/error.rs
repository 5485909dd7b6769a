//! Error types for `rankd`.

use std::path::PathBuf;

/// Result type for ranking and persistence operations.
pub type RankResult<T> = Result<T, RankError>;

/// Errors returned by the `rankd` crate.
///
/// The variants fall into a few families with different handling:
/// - request-level: [`RankError::NameNotFound`] is returned to the caller and never
///   affects other sets or the persistence pipeline;
/// - corruption: [`RankError::is_corruption`] is fatal during restore;
/// - encoding: [`RankError::Encode`] is fatal during a flush cycle;
/// - store: I/O failures are fatal when opening the store, but a failed per-key
///   write during a flush is logged and retried on the next cycle.
#[derive(thiserror::Error, Debug)]
pub enum RankError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (corrupt, unexpected, unsupported).
    #[error("format error: {0}")]
    Format(String),

    /// Format error with optional expected/actual context.
    #[error("format error: {message}")]
    FormatDetail {
        /// Short, human-readable description of the mismatch.
        message: String,
        /// Optional “expected” value (stringified) for debugging.
        expected: Option<String>,
        /// Optional “actual” value (stringified) for debugging.
        actual: Option<String>,
    },

    /// CRC mismatch (data corruption detected).
    #[error("crc mismatch (expected {expected:#010x}, got {actual:#010x})")]
    CrcMismatch {
        /// CRC stored in the snapshot header.
        expected: u32,
        /// CRC computed from the bytes that were read.
        actual: u32,
    },

    /// Encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid state (operation not allowed in current state).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not supported by the storage backend.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// A set name exceeds the longest key the store can hold.
    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
        /// Longest accepted name in bytes.
        max: usize,
    },

    /// The named ranking set does not exist.
    #[error("name not exists: {0}")]
    NameNotFound(String),

    /// Requested path does not exist.
    #[error("missing path: {0}")]
    MissingPath(PathBuf),
}

impl RankError {
    /// Whether this error means stored bytes cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RankError::Format(_)
                | RankError::FormatDetail { .. }
                | RankError::CrcMismatch { .. }
                | RankError::Decode(_)
        )
    }

    /// Whether this error is a per-request "unknown name" response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RankError::NameNotFound(_))
    }
}
