use super::encoding::DecodeError;
use super::rle::{RleDecoder, RleEncoder};

/// Delta encoder: stores the difference between consecutive values through
/// a signed RLE stream. Monotonic counter sequences collapse into a single
/// run of ones. The accumulator starts at 0; nulls pass through without
/// touching it.
pub(crate) struct DeltaEncoder {
    rle: RleEncoder<i64>,
    absolute_value: i64,
}

impl DeltaEncoder {
    pub fn new() -> DeltaEncoder {
        DeltaEncoder {
            rle: RleEncoder::new(),
            absolute_value: 0,
        }
    }

    pub fn append_value(&mut self, value: i64) {
        self.rle.append_value(value.wrapping_sub(self.absolute_value));
        self.absolute_value = value;
    }

    pub fn append_null(&mut self) {
        self.rle.append_null();
    }

    pub fn append(&mut self, value: Option<i64>) {
        match value {
            Some(v) => self.append_value(v),
            None => self.append_null(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.rle.finish()
    }
}

#[derive(Debug)]
pub(crate) struct DeltaDecoder<'a> {
    rle: RleDecoder<'a, i64>,
    absolute_value: i64,
}

impl<'a> From<&'a [u8]> for DeltaDecoder<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        DeltaDecoder {
            rle: RleDecoder::from(bytes),
            absolute_value: 0,
        }
    }
}

impl<'a> DeltaDecoder<'a> {
    pub fn next(&mut self) -> Result<Option<i64>, DecodeError> {
        match self.rle.next()? {
            Some(delta) => {
                self.absolute_value = self.absolute_value.wrapping_add(delta);
                Ok(Some(self.absolute_value))
            }
            None => Ok(None),
        }
    }

    pub fn done(&self) -> bool {
        self.rle.done()
    }
}
