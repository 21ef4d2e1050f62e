//! Streaming codec for id segment files.
//!
//! An id file is a flat sequence of committed identifiers, 8 bytes
//! little-endian each. There is no per-id framing: a trailing partial word
//! is reported as [`CodecError::Truncated`] and everything before it is
//! usable.

use crate::error::{CodecError, CodecResult};
use crate::stream::{read_full, StreamReader, StreamWriter};
use std::fs::File;
use std::io::Write;

const ID_LEN: usize = 8;

/// Appends committed ids to an id segment file.
pub struct IdsEncoder {
    w: StreamWriter,
}

impl IdsEncoder {
    /// Wraps a writable id file. `compress` selects gzip framing.
    pub fn new(file: File, compress: bool) -> CodecResult<Self> {
        Ok(Self {
            w: StreamWriter::new(file, compress),
        })
    }

    /// Appends one id.
    pub fn write(&mut self, id: i64) -> CodecResult<()> {
        self.w.write_all(&id.to_le_bytes())?;
        Ok(())
    }

    /// Drains buffered ids to the file.
    pub fn flush(&mut self) -> CodecResult<()> {
        self.w.flush()?;
        Ok(())
    }

    /// Flushes and finalizes the stream (gzip trailer included).
    pub fn close(&mut self) -> CodecResult<()> {
        self.w.finish()?;
        Ok(())
    }
}

/// Reads committed ids from an id segment file.
pub struct IdsDecoder {
    r: StreamReader,
}

impl IdsDecoder {
    /// Wraps a readable id file. `compress` selects gzip decoding.
    pub fn new(file: File, compress: bool) -> CodecResult<Self> {
        Ok(Self {
            r: StreamReader::new(file, compress),
        })
    }

    /// Reads the next id, or `Ok(None)` at a clean end of file.
    pub fn read(&mut self) -> CodecResult<Option<i64>> {
        let mut word = [0u8; ID_LEN];
        match read_full(&mut self.r, &mut word)? {
            0 => Ok(None),
            ID_LEN => Ok(Some(i64::from_le_bytes(word))),
            n => Err(CodecError::truncated(format!("{n} of {ID_LEN} id bytes"))),
        }
    }

    /// Drains every remaining id into `set`.
    pub fn read_all_into(&mut self, set: &mut impl Extend<i64>) -> CodecResult<()> {
        while let Some(id) = self.read()? {
            set.extend([id]);
        }
        Ok(())
    }

    /// Scans the remaining stream and returns the largest id, or `None` for
    /// an empty stream.
    pub fn load_max(&mut self) -> CodecResult<Option<i64>> {
        let mut max = None;
        while let Some(id) = self.read()? {
            max = Some(max.map_or(id, |m: i64| m.max(id)));
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs::{File, OpenOptions};
    use std::path::Path;
    use tempfile::tempdir;

    fn write_ids(path: &Path, ids: &[i64], compress: bool) {
        let mut enc = IdsEncoder::new(File::create(path).unwrap(), compress).unwrap();
        for &id in ids {
            enc.write(id).unwrap();
        }
        enc.close().unwrap();
    }

    #[test]
    fn roundtrip_plain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.ids");
        write_ids(&path, &[1, -5, i64::MAX, 0], false);

        let mut dec = IdsDecoder::new(File::open(&path).unwrap(), false).unwrap();
        let mut got = Vec::new();
        while let Some(id) = dec.read().unwrap() {
            got.push(id);
        }
        assert_eq!(got, vec![1, -5, i64::MAX, 0]);
    }

    #[test]
    fn roundtrip_gzip_into_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.ids.gz");
        write_ids(&path, &[10, 20, 30], true);

        let mut dec = IdsDecoder::new(File::open(&path).unwrap(), true).unwrap();
        let mut set = HashSet::new();
        dec.read_all_into(&mut set).unwrap();
        assert_eq!(set, HashSet::from([10, 20, 30]));
    }

    #[test]
    fn load_max_returns_true_maximum() {
        // The maximum is in the middle, not last: regression guard against
        // returning the last id scanned.
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.ids");
        write_ids(&path, &[3, 900, 7], false);

        let mut dec = IdsDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert_eq!(dec.load_max().unwrap(), Some(900));
    }

    #[test]
    fn load_max_empty_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.ids");
        File::create(&path).unwrap();
        let mut dec = IdsDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert_eq!(dec.load_max().unwrap(), None);
    }

    #[test]
    fn partial_word_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.ids");
        write_ids(&path, &[1, 2], false);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(13).unwrap();

        let mut dec = IdsDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert_eq!(dec.read().unwrap(), Some(1));
        assert!(matches!(dec.read(), Err(CodecError::Truncated { .. })));
    }
}
