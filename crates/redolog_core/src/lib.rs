//! # redolog core
//!
//! A durable, append-only redo-log journal used by stream processing
//! pipelines as a crash-recovery buffer.
//!
//! Producers write data records and commit records concurrently; on restart
//! (or at any time) a consumer replays every data record whose id has not
//! been committed. Segments rotate by size and age, and replayed segments
//! are deleted once fully drained.
//!
//! This crate provides:
//! - the [`Journal`] engine: writer API, periodic flush and rotation,
//!   locking protocol, legacy replay handoff
//! - the [`LegacyLoader`]: cross-segment replay filtered by committed ids
//! - the [`TtlSet`]: time-bounded committed-id set
//! - the segment naming scheme and on-disk layout rules
//!
//! Record framing lives in the [`redolog_codec`] crate; its main types are
//! re-exported here for convenience.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod fs;
mod idset;
mod journal;
mod legacy;
mod sync;

pub use config::Config;
pub use error::{JournalError, JournalResult};
pub use fs::{generate_new_name, is_data_segment_name, is_gz, is_ids_segment_name};
pub use idset::TtlSet;
pub use journal::Journal;
pub use legacy::LegacyLoader;
pub use sync::Shutdown;

pub use redolog_codec::{DataRecord, Value};
