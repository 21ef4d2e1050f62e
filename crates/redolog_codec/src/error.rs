//! Error types for the codec crate.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding segment streams.
///
/// Readers distinguish three outcomes:
/// - a clean end of stream is `Ok(None)` from the read methods, never an
///   error;
/// - [`CodecError::Truncated`] means the stream ended inside a record
///   (typically a crash mid-write);
/// - [`CodecError::Corrupt`] means the bytes are structurally wrong (bad
///   magic, checksum mismatch, invalid tag).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O failure, including gzip stream errors.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of a record.
    #[error("truncated record: {context}")]
    Truncated {
        /// Where in the record the stream ended.
        context: String,
    },

    /// The bytes do not form a valid record.
    #[error("corrupt record: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// A declared length exceeds the decoder's safety limit.
    #[error("record too large: {len} bytes (limit {limit})")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Maximum the decoder accepts.
        limit: usize,
    },
}

impl CodecError {
    /// Creates a truncated-record error.
    pub fn truncated(context: impl Into<String>) -> Self {
        Self::Truncated {
            context: context.into(),
        }
    }

    /// Creates a corrupt-record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}
