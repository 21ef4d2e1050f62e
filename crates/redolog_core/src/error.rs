//! Error types for the journal engine.

use redolog_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
///
/// Cancellation is not an error: operations that observe the shutdown
/// signal return `Ok` without side effects. Precondition violations
/// (calling [`crate::Journal::load_legacy_buf`] without holding the legacy
/// lock) are programming errors and panic instead of returning a variant.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the offending option.
        message: String,
    },

    /// Disk operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoder or decoder rejected a record or hit corruption.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A segment file name does not follow the naming scheme.
    #[error("invalid segment name `{name}`: {reason}")]
    InvalidSegmentName {
        /// The offending file name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The journal has not been started yet.
    #[error("journal is not started")]
    NotStarted,

    /// `start` could not install the first segment pair.
    #[error("initial rotation failed: {message}")]
    InitialRotation {
        /// Why no segment pair was installed.
        message: String,
    },

    /// One or more encoder buffers failed to drain.
    #[error("flush failed: {message}")]
    Flush {
        /// Joined per-encoder failure messages.
        message: String,
    },

    /// One or more id files could not be loaded during replay preparation.
    #[error("loading committed ids failed: {message}")]
    LoadIds {
        /// Joined per-file failure messages.
        message: String,
    },
}

impl JournalError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid-segment-name error.
    pub fn invalid_segment_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSegmentName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an initial-rotation error.
    pub fn initial_rotation(message: impl Into<String>) -> Self {
        Self::InitialRotation {
            message: message.into(),
        }
    }

    /// Creates a flush error from joined failure messages.
    pub fn flush(message: impl Into<String>) -> Self {
        Self::Flush {
            message: message.into(),
        }
    }

    /// Creates a load-ids error from joined failure messages.
    pub fn load_ids(message: impl Into<String>) -> Self {
        Self::LoadIds {
            message: message.into(),
        }
    }
}
