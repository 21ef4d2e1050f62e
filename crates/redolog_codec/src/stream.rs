//! Buffered, optionally gzip-wrapped segment streams.
//!
//! Each segment file holds at most one gzip member; `flush` on a compressed
//! stream emits a sync point so records written before a crash remain
//! decodable, and `finish` writes the trailer.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

pub(crate) enum StreamWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl StreamWriter {
    pub(crate) fn new(file: File, compress: bool) -> Self {
        let inner = BufWriter::new(file);
        if compress {
            Self::Gzip(GzEncoder::new(inner, Compression::default()))
        } else {
            Self::Plain(inner)
        }
    }

    /// Finalizes the stream: writes the gzip trailer (if any) and drains
    /// buffers to the file.
    pub(crate) fn finish(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
        }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

pub(crate) enum StreamReader {
    Plain(BufReader<File>),
    Gzip(Box<GzDecoder<BufReader<File>>>),
}

impl StreamReader {
    pub(crate) fn new(file: File, compress: bool) -> Self {
        let inner = BufReader::new(file);
        if compress {
            Self::Gzip(Box::new(GzDecoder::new(inner)))
        } else {
            Self::Plain(inner)
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

/// Reads until `buf` is full or the stream ends. Returns the number of bytes
/// read, which is less than `buf.len()` only at end of stream.
pub(crate) fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
