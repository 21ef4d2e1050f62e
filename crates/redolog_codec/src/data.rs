//! Streaming codec for data segment files.
//!
//! Each record is one self-framing unit:
//!
//! ```text
//! | magic "RDLG" (4) | body_len u32 LE (4) | body (N) | crc32 of body (4) |
//! ```
//!
//! The frame boundary is what lets a reader tell a clean end of file from a
//! crash mid-write ([`CodecError::Truncated`]) or damaged bytes
//! ([`CodecError::Corrupt`]). Clean end means either no bytes at a frame
//! boundary or an all-zero header, the latter being the untouched tail of a
//! preallocated segment.

use crate::error::{CodecError, CodecResult};
use crate::stream::{read_full, StreamReader, StreamWriter};
use crate::value::DataRecord;
use crate::wire::{encode_record, WireDecoder};
use std::fs::File;
use std::io::Write;

const FRAME_MAGIC: [u8; 4] = *b"RDLG";
const FRAME_HEADER: usize = 8;
const FRAME_CRC: usize = 4;

/// Upper bound on one record body. A length field beyond this is treated as
/// corruption rather than an allocation request.
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Appends framed data records to a segment file.
///
/// Writes are buffered; callers decide when to [`flush`](Self::flush).
/// [`close`](Self::close) must run before the file is handed to a reader
/// when compression is on, otherwise the gzip trailer is missing.
pub struct DataEncoder {
    w: StreamWriter,
    scratch: Vec<u8>,
}

impl DataEncoder {
    /// Wraps a writable segment file.
    ///
    /// `compress` must match the file's name suffix; the encoder does not
    /// inspect the path.
    pub fn new(file: File, compress: bool) -> CodecResult<Self> {
        Ok(Self {
            w: StreamWriter::new(file, compress),
            scratch: Vec::with_capacity(4096),
        })
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn write(&mut self, record: &DataRecord) -> CodecResult<()> {
        self.scratch.clear();
        encode_record(&mut self.scratch, record);

        let mut header = [0u8; FRAME_HEADER];
        header[..4].copy_from_slice(&FRAME_MAGIC);
        header[4..].copy_from_slice(&(self.scratch.len() as u32).to_le_bytes());

        self.w.write_all(&header)?;
        self.w.write_all(&self.scratch)?;
        self.w
            .write_all(&crc32fast::hash(&self.scratch).to_le_bytes())?;
        Ok(())
    }

    /// Drains buffered frames to the file. On a compressed stream this emits
    /// a sync point, so flushed records survive a crash.
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

/// Reads framed data records from a segment file.
pub struct DataDecoder {
    r: StreamReader,
}

impl DataDecoder {
    /// Wraps a readable segment file. `compress` selects gzip decoding.
    pub fn new(file: File, compress: bool) -> CodecResult<Self> {
        Ok(Self {
            r: StreamReader::new(file, compress),
        })
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at a clean end of file.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] when the stream ends inside a frame,
    /// [`CodecError::Corrupt`] on bad magic or checksum mismatch.
    pub fn read(&mut self) -> CodecResult<Option<DataRecord>> {
        let mut header = [0u8; FRAME_HEADER];
        match read_full(&mut self.r, &mut header)? {
            0 => return Ok(None),
            FRAME_HEADER => {}
            n => {
                return Err(CodecError::truncated(format!(
                    "{n} of {FRAME_HEADER} header bytes"
                )))
            }
        }

        // a zeroed header is the preallocated tail of the file, not a frame
        if header == [0u8; FRAME_HEADER] {
            return Ok(None);
        }
        if header[..4] != FRAME_MAGIC {
            return Err(CodecError::corrupt("bad frame magic"));
        }
        let body_len = u32::from_le_bytes(header[4..].try_into().expect("length checked")) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(CodecError::TooLarge {
                len: body_len,
                limit: MAX_BODY_LEN,
            });
        }

        let mut body = vec![0u8; body_len];
        let n = read_full(&mut self.r, &mut body)?;
        if n < body_len {
            return Err(CodecError::truncated(format!("{n} of {body_len} body bytes")));
        }

        let mut crc = [0u8; FRAME_CRC];
        if read_full(&mut self.r, &mut crc)? < FRAME_CRC {
            return Err(CodecError::truncated("frame checksum"));
        }
        let stored = u32::from_le_bytes(crc);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(CodecError::corrupt(format!(
                "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            )));
        }

        WireDecoder::new(&body).decode_record().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::fs::{File, OpenOptions};
    use std::io::{Seek, SeekFrom};
    use std::path::Path;
    use tempfile::tempdir;

    fn sample(id: i64) -> DataRecord {
        DataRecord::new(id, vec![("val".into(), Value::text(format!("payload {id}")))])
    }

    fn write_records(path: &Path, records: &[DataRecord], compress: bool) {
        let file = File::create(path).unwrap();
        let mut enc = DataEncoder::new(file, compress).unwrap();
        for rec in records {
            enc.write(rec).unwrap();
        }
        enc.close().unwrap();
    }

    fn read_records(path: &Path, compress: bool) -> Vec<DataRecord> {
        let mut dec = DataDecoder::new(File::open(path).unwrap(), compress).unwrap();
        let mut out = Vec::new();
        while let Some(rec) = dec.read().unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn roundtrip_plain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        let records: Vec<_> = (0..20).map(sample).collect();
        write_records(&path, &records, false);
        assert_eq!(read_records(&path, false), records);
    }

    #[test]
    fn roundtrip_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf.gz");
        let records: Vec<_> = (0..20).map(sample).collect();
        write_records(&path, &records, true);
        assert_eq!(read_records(&path, true), records);
    }

    #[test]
    fn empty_file_is_clean_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        File::create(&path).unwrap();
        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert!(dec.read().unwrap().is_none());
    }

    #[test]
    fn flushed_gzip_records_are_readable_without_close() {
        // A crash before close leaves no trailer; records up to the last
        // flush must still decode.
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf.gz");
        let file = File::create(&path).unwrap();
        let mut enc = DataEncoder::new(file, true).unwrap();
        enc.write(&sample(1)).unwrap();
        enc.write(&sample(2)).unwrap();
        enc.flush().unwrap();
        std::mem::forget(enc);

        let mut dec = DataDecoder::new(File::open(&path).unwrap(), true).unwrap();
        assert_eq!(dec.read().unwrap(), Some(sample(1)));
        assert_eq!(dec.read().unwrap(), Some(sample(2)));
        // Missing trailer surfaces as an error, not a silent clean EOF.
        assert!(dec.read().is_err());
    }

    #[test]
    fn truncated_frame_is_truncated_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        write_records(&path, &[sample(1)], false);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert!(matches!(dec.read(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn flipped_byte_is_corrupt_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        write_records(&path, &[sample(1)], false);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xff]).unwrap();

        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert!(matches!(dec.read(), Err(CodecError::Corrupt { .. })));
    }

    #[test]
    fn preallocated_zero_tail_is_clean_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        write_records(&path, &[sample(1), sample(2)], false);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len + 4096).unwrap();

        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert_eq!(dec.read().unwrap(), Some(sample(1)));
        assert_eq!(dec.read().unwrap(), Some(sample(2)));
        assert!(dec.read().unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_corrupt_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        std::fs::write(&path, b"not a frame at all").unwrap();
        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert!(matches!(dec.read(), Err(CodecError::Corrupt { .. })));
    }

    #[test]
    fn valid_records_before_truncation_are_yielded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.buf");
        write_records(&path, &[sample(1), sample(2)], false);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();

        let mut dec = DataDecoder::new(File::open(&path).unwrap(), false).unwrap();
        assert_eq!(dec.read().unwrap(), Some(sample(1)));
        assert!(dec.read().is_err());
    }
}
