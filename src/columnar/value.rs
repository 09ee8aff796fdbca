use super::encoding::{Decodable, DecodeError, Decoder, Encodable};
use crate::value::ScalarValue;
use smol_str::SmolStr;

// Wire tags for the value meta column. The meta integer for each value is
// (byte_length << 4) | tag.
const TAG_NULL: u64 = 0;
const TAG_FALSE: u64 = 1;
const TAG_TRUE: u64 = 2;
const TAG_UINT: u64 = 3;
const TAG_INT: u64 = 4;
const TAG_F64: u64 = 5;
const TAG_UTF8: u64 = 6;
const TAG_BYTES: u64 = 7;
const TAG_COUNTER: u64 = 8;
const TAG_TIMESTAMP: u64 = 9;

/// Encodes scalars into the value column pair: a meta stream of
/// `(byte_length << 4) | tag` integers and a raw stream of the
/// concatenated payload bytes.
pub(crate) struct ValueEncoder {
    meta: Vec<u8>,
    raw: Vec<u8>,
}

impl ValueEncoder {
    pub fn new() -> ValueEncoder {
        ValueEncoder {
            meta: Vec::new(),
            raw: Vec::new(),
        }
    }

    pub fn append(&mut self, value: &ScalarValue) {
        let raw_start = self.raw.len();
        let tag = match value {
            ScalarValue::Null => TAG_NULL,
            ScalarValue::Boolean(false) => TAG_FALSE,
            ScalarValue::Boolean(true) => TAG_TRUE,
            ScalarValue::Uint(n) => {
                n.encode_to_vec(&mut self.raw);
                TAG_UINT
            }
            ScalarValue::Int(n) => {
                n.encode_to_vec(&mut self.raw);
                TAG_INT
            }
            ScalarValue::F64(n) => {
                n.encode_to_vec(&mut self.raw);
                TAG_F64
            }
            ScalarValue::Str(s) => {
                self.raw.extend_from_slice(s.as_bytes());
                TAG_UTF8
            }
            ScalarValue::Bytes(b) => {
                self.raw.extend_from_slice(b);
                TAG_BYTES
            }
            ScalarValue::Counter(c) => {
                c.start.encode_to_vec(&mut self.raw);
                TAG_COUNTER
            }
            ScalarValue::Timestamp(t) => {
                t.encode_to_vec(&mut self.raw);
                TAG_TIMESTAMP
            }
        };
        let raw_len = (self.raw.len() - raw_start) as u64;
        ((raw_len << 4) | tag).encode_to_vec(&mut self.meta);
    }

    /// The (meta, raw) column pair.
    pub fn finish(self) -> (Vec<u8>, Vec<u8>) {
        (self.meta, self.raw)
    }
}

/// Decodes the value column pair back into scalars.
#[derive(Debug)]
pub(crate) struct ValueDecoder<'a> {
    meta: Decoder<'a>,
    raw: Decoder<'a>,
}

impl<'a> ValueDecoder<'a> {
    pub fn new(meta: &'a [u8], raw: &'a [u8]) -> ValueDecoder<'a> {
        ValueDecoder {
            meta: Decoder::new(meta),
            raw: Decoder::new(raw),
        }
    }

    pub fn next(&mut self) -> Result<ScalarValue, DecodeError> {
        let meta = self.meta.read::<u64>()?;
        let tag = meta & 0x0f;
        let len = (meta >> 4) as usize;
        let raw = self.raw.read_bytes(len)?;
        match tag {
            TAG_NULL => Ok(ScalarValue::Null),
            TAG_FALSE => Ok(ScalarValue::Boolean(false)),
            TAG_TRUE => Ok(ScalarValue::Boolean(true)),
            TAG_UINT => Ok(ScalarValue::Uint(read_all::<u64>(raw)?)),
            TAG_INT => Ok(ScalarValue::Int(read_all::<i64>(raw)?)),
            TAG_F64 => {
                if len != 8 {
                    return Err(DecodeError::BadValue);
                }
                Ok(ScalarValue::F64(read_all::<f64>(raw)?))
            }
            TAG_UTF8 => std::str::from_utf8(raw)
                .map(|s| ScalarValue::Str(SmolStr::new(s)))
                .map_err(|_| DecodeError::BadValue),
            TAG_BYTES => Ok(ScalarValue::Bytes(raw.to_vec())),
            TAG_COUNTER => Ok(ScalarValue::counter(read_all::<i64>(raw)?)),
            TAG_TIMESTAMP => Ok(ScalarValue::Timestamp(read_all::<i64>(raw)?)),
            _ => Err(DecodeError::BadValue),
        }
    }

    pub fn done(&self) -> bool {
        self.meta.done()
    }
}

// Decode a single value which must consume the whole slice.
fn read_all<T: Decodable + std::fmt::Debug>(raw: &[u8]) -> Result<T, DecodeError> {
    let mut decoder = Decoder::new(raw);
    let val = decoder.read::<T>()?;
    if !decoder.done() {
        return Err(DecodeError::BadValue);
    }
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(vals: &[ScalarValue]) {
        let mut encoder = ValueEncoder::new();
        for v in vals {
            encoder.append(v);
        }
        let (meta, raw) = encoder.finish();
        let mut decoder = ValueDecoder::new(&meta, &raw);
        for v in vals {
            assert_eq!(&decoder.next().unwrap(), v);
        }
        assert!(decoder.done());
    }

    #[test]
    fn all_variants_round_trip() {
        round_trip(&[
            ScalarValue::Null,
            ScalarValue::Boolean(false),
            ScalarValue::Boolean(true),
            ScalarValue::Uint(u64::MAX),
            ScalarValue::Int(i64::MIN),
            ScalarValue::F64(1.25),
            ScalarValue::Str("héllo".into()),
            ScalarValue::Str("".into()),
            ScalarValue::Bytes(vec![0, 1, 2]),
            ScalarValue::counter(-7),
            ScalarValue::Timestamp(1_234_567_890),
        ]);
    }

    #[test]
    fn null_and_bools_write_no_raw_bytes() {
        let mut encoder = ValueEncoder::new();
        encoder.append(&ScalarValue::Null);
        encoder.append(&ScalarValue::Boolean(true));
        encoder.append(&ScalarValue::Boolean(false));
        let (meta, raw) = encoder.finish();
        assert_eq!(meta, vec![0, 2, 1]);
        assert!(raw.is_empty());
    }

    #[test]
    fn bad_f64_length_is_rejected() {
        // meta says f64 with 2 raw bytes
        let meta: Vec<u8> = vec![(2 << 4) | 5];
        let raw: Vec<u8> = vec![0, 0];
        let mut decoder = ValueDecoder::new(&meta, &raw);
        assert_eq!(decoder.next(), Err(DecodeError::BadValue));
    }

    fn arb_scalar() -> impl Strategy<Value = ScalarValue> {
        prop_oneof![
            Just(ScalarValue::Null),
            any::<bool>().prop_map(ScalarValue::Boolean),
            any::<u64>().prop_map(ScalarValue::Uint),
            any::<i64>().prop_map(ScalarValue::Int),
            any::<i64>().prop_map(ScalarValue::counter),
            any::<i64>().prop_map(ScalarValue::Timestamp),
            "[a-z]{0,8}".prop_map(|s| ScalarValue::Str(s.into())),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(ScalarValue::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn round_trips(vals in proptest::collection::vec(arb_scalar(), 0..20)) {
            round_trip(&vals);
        }
    }
}
