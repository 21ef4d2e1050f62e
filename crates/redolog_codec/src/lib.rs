//! # redolog codec
//!
//! Streaming record framing for redolog segment files.
//!
//! Two file kinds exist: data segments hold [`DataRecord`]s in self-framing
//! checksummed frames; id segments hold bare committed identifiers. Both
//! support transparent gzip (one member per file) selected by the caller
//! from the file-name suffix.
//!
//! Readers report three distinct end conditions so the journal's replayer
//! can make progress on damaged files: clean end of file (`Ok(None)`),
//! truncation mid-record, and structural corruption. See [`CodecError`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod data;
mod error;
mod ids;
mod stream;
mod value;
mod wire;

pub use data::{DataDecoder, DataEncoder};
pub use error::{CodecError, CodecResult};
pub use ids::{IdsDecoder, IdsEncoder};
pub use value::{DataRecord, Value};
