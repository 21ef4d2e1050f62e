//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Configuration for a [`crate::Journal`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding segment files. Created if missing.
    pub buf_dir_path: PathBuf,

    /// Soft cap on the current data segment; exceeding it triggers rotation.
    pub buf_size_bytes: u64,

    /// Period of the background flush task.
    pub flush_interval: Duration,

    /// Maximum age of a segment before forced rotation.
    pub rotate_duration: Duration,

    /// Polling period of the rotation trigger.
    pub rotate_check_interval: Duration,

    /// Lifetime of entries in the committed-id set.
    pub committed_id_ttl: Duration,

    /// Open new segments with a `.gz` suffix and gzip framing.
    pub compress: bool,

    /// Request a collection hint after the legacy loader is reset.
    /// Retained for compatibility; there is no collector to hint, so this
    /// has no runtime effect.
    pub aggressive_gc: bool,

    /// Namespace used in log lines and background thread names.
    pub name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buf_dir_path: PathBuf::from("/var/redolog"),
            buf_size_bytes: 200 * 1024 * 1024,
            flush_interval: Duration::from_secs(5),
            rotate_duration: Duration::from_secs(60),
            rotate_check_interval: Duration::from_secs(1),
            committed_id_ttl: Duration::from_secs(300),
            compress: false,
            aggressive_gc: true,
            name: "journal".to_string(),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment directory.
    #[must_use]
    pub fn buf_dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.buf_dir_path = path.into();
        self
    }

    /// Sets the data segment size cap.
    #[must_use]
    pub const fn buf_size_bytes(mut self, size: u64) -> Self {
        self.buf_size_bytes = size;
        self
    }

    /// Sets the background flush period.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the maximum segment age before forced rotation.
    #[must_use]
    pub const fn rotate_duration(mut self, duration: Duration) -> Self {
        self.rotate_duration = duration;
        self
    }

    /// Sets the rotation trigger polling period.
    #[must_use]
    pub const fn rotate_check_interval(mut self, interval: Duration) -> Self {
        self.rotate_check_interval = interval;
        self
    }

    /// Sets the committed-id lifetime.
    #[must_use]
    pub const fn committed_id_ttl(mut self, ttl: Duration) -> Self {
        self.committed_id_ttl = ttl;
        self
    }

    /// Enables or disables gzip segment compression.
    #[must_use]
    pub const fn compress(mut self, value: bool) -> Self {
        self.compress = value;
        self
    }

    /// Enables or disables the post-reset collection hint.
    #[must_use]
    pub const fn aggressive_gc(mut self, value: bool) -> Self {
        self.aggressive_gc = value;
        self
    }

    /// Sets the logger namespace.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Checks option values, warning about suspicious ones.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Config`] for values the journal cannot run
    /// with: an empty directory path or name, a zero buffer size, or a zero
    /// interval.
    pub fn validate(&self) -> JournalResult<()> {
        if self.buf_dir_path.as_os_str().is_empty() {
            return Err(JournalError::config("buf_dir_path must not be empty"));
        }
        if self.name.is_empty() {
            return Err(JournalError::config("name must not be empty"));
        }
        if self.buf_size_bytes == 0 {
            return Err(JournalError::config("buf_size_bytes must be positive"));
        }
        for (value, label) in [
            (self.flush_interval, "flush_interval"),
            (self.rotate_duration, "rotate_duration"),
            (self.rotate_check_interval, "rotate_check_interval"),
            (self.committed_id_ttl, "committed_id_ttl"),
        ] {
            if value.is_zero() {
                return Err(JournalError::config(format!("{label} must be positive")));
            }
        }

        if self.buf_size_bytes < 50 * 1024 * 1024 {
            warn!(
                bytes = self.buf_size_bytes,
                "buf_size_bytes is small, expect frequent rotations"
            );
        }
        Ok(())
    }
}
