//! Tag-byte binary encoding for record bodies.
//!
//! Layout, all lengths little-endian:
//!
//! ```text
//! NULL  = 0x00
//! FALSE = 0x01   TRUE = 0x02
//! INT   = 0x03   i64 (8 bytes)
//! BYTES = 0x04   u32 len + bytes
//! TEXT  = 0x05   u32 len + UTF-8 bytes
//! ARRAY = 0x06   u32 count + values
//! MAP   = 0x07   u32 count + (TEXT key, value) pairs
//! ```
//!
//! A record body is `INT id` followed by `MAP payload`.

use crate::error::{CodecError, CodecResult};
use crate::value::{DataRecord, Value};

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

/// Upper bound on a single byte/text length. Guards allocation when a
/// corrupt length field is decoded.
const MAX_BYTES_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on array/map element counts.
const MAX_CONTAINER_ELEMENTS: usize = 1024 * 1024;

/// Encodes one record body into `buf`.
pub(crate) fn encode_record(buf: &mut Vec<u8>, record: &DataRecord) {
    buf.push(TAG_INT);
    buf.extend_from_slice(&record.id.to_le_bytes());
    encode_map(buf, &record.payload);
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(false) => buf.push(TAG_FALSE),
        Value::Bool(true) => buf.push(TAG_TRUE),
        Value::Integer(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            encode_len(buf, b.len());
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            buf.push(TAG_TEXT);
            encode_len(buf, s.len());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            buf.push(TAG_ARRAY);
            encode_len(buf, items.len());
            for item in items {
                encode_value(buf, item);
            }
        }
        Value::Map(pairs) => encode_map(buf, pairs),
    }
}

fn encode_map(buf: &mut Vec<u8>, pairs: &[(String, Value)]) {
    buf.push(TAG_MAP);
    encode_len(buf, pairs.len());
    for (key, value) in pairs {
        buf.push(TAG_TEXT);
        encode_len(buf, key.len());
        buf.extend_from_slice(key.as_bytes());
        encode_value(buf, value);
    }
}

fn encode_len(buf: &mut Vec<u8>, len: usize) {
    // lengths above u32::MAX cannot occur: bounded by MAX_BYTES_LEN at decode
    // and by frame size at encode
    buf.extend_from_slice(&(len as u32).to_le_bytes());
}

/// Cursor over a record body.
pub(crate) struct WireDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decodes a full record body and verifies all bytes were consumed.
    pub(crate) fn decode_record(&mut self) -> CodecResult<DataRecord> {
        let id = match self.decode_value()? {
            Value::Integer(n) => n,
            other => {
                return Err(CodecError::corrupt(format!(
                    "record body must start with an integer id, found {other:?}"
                )))
            }
        };
        let payload = match self.decode_value()? {
            Value::Map(pairs) => pairs,
            other => {
                return Err(CodecError::corrupt(format!(
                    "record payload must be a map, found {other:?}"
                )))
            }
        };
        if self.pos != self.data.len() {
            return Err(CodecError::corrupt(format!(
                "{} trailing bytes after record body",
                self.data.len() - self.pos
            )));
        }
        Ok(DataRecord { id, payload })
    }

    fn decode_value(&mut self) -> CodecResult<Value> {
        match self.read_byte()? {
            TAG_NULL => Ok(Value::Null),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_INT => {
                let bytes: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
                Ok(Value::Integer(i64::from_le_bytes(bytes)))
            }
            TAG_BYTES => {
                let len = self.read_len(MAX_BYTES_LEN)?;
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            TAG_TEXT => Ok(Value::Text(self.read_text()?)),
            TAG_ARRAY => {
                let count = self.read_len(MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    items.push(self.decode_value()?);
                }
                Ok(Value::Array(items))
            }
            TAG_MAP => {
                let count = self.read_len(MAX_CONTAINER_ELEMENTS)?;
                let mut pairs = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    match self.read_byte()? {
                        TAG_TEXT => {}
                        tag => {
                            return Err(CodecError::corrupt(format!(
                                "map key must be text, found tag 0x{tag:02x}"
                            )))
                        }
                    }
                    let key = self.read_text()?;
                    let value = self.decode_value()?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            tag => Err(CodecError::corrupt(format!("unknown tag 0x{tag:02x}"))),
        }
    }

    fn read_text(&mut self) -> CodecResult<String> {
        let len = self.read_len(MAX_BYTES_LEN)?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::corrupt("text value is not valid UTF-8"))
    }

    fn read_len(&mut self, limit: usize) -> CodecResult<usize> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().expect("length checked");
        let len = u32::from_le_bytes(bytes) as usize;
        if len > limit {
            return Err(CodecError::TooLarge { len, limit });
        }
        Ok(len)
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::corrupt("record body ended mid-value"));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::corrupt("record body ended mid-value"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: &DataRecord) -> DataRecord {
        let mut buf = Vec::new();
        encode_record(&mut buf, record);
        WireDecoder::new(&buf).decode_record().unwrap()
    }

    #[test]
    fn roundtrip_empty_payload() {
        let rec = DataRecord::new(42, vec![]);
        assert_eq!(roundtrip(&rec), rec);
    }

    #[test]
    fn roundtrip_negative_id() {
        let rec = DataRecord::new(i64::MIN, vec![("k".into(), Value::Null)]);
        assert_eq!(roundtrip(&rec), rec);
    }

    #[test]
    fn roundtrip_nested_payload() {
        let rec = DataRecord::new(
            7,
            vec![
                ("tag".into(), Value::text("sensor")),
                ("ok".into(), Value::Bool(true)),
                ("raw".into(), Value::Bytes(vec![0, 1, 2, 255])),
                (
                    "samples".into(),
                    Value::Array(vec![Value::Integer(-1), Value::Integer(9000)]),
                ),
                (
                    "meta".into(),
                    Value::Map(vec![("depth".into(), Value::Integer(2))]),
                ),
            ],
        );
        assert_eq!(roundtrip(&rec), rec);
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &DataRecord::new(1, vec![]));
        buf[0] = 0x7f;
        assert!(matches!(
            WireDecoder::new(&buf).decode_record(),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &DataRecord::new(1, vec![]));
        buf.push(0x00);
        assert!(matches!(
            WireDecoder::new(&buf).decode_record(),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = vec![TAG_INT];
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.push(TAG_MAP);
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            WireDecoder::new(&buf).decode_record(),
            Err(CodecError::TooLarge { .. })
        ));
    }
}
