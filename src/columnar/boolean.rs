use super::encoding::{DecodeError, Decoder, Encodable};

/// Boolean column encoder: alternating run counts of false and true,
/// always starting with the false count (possibly zero).
pub(crate) struct BooleanEncoder {
    buf: Vec<u8>,
    last: bool,
    count: usize,
}

impl BooleanEncoder {
    pub fn new() -> BooleanEncoder {
        BooleanEncoder {
            buf: Vec::new(),
            last: false,
            count: 0,
        }
    }

    pub fn append(&mut self, value: bool) {
        if value == self.last {
            self.count += 1;
        } else {
            self.count.encode_to_vec(&mut self.buf);
            self.last = value;
            self.count = 1;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.count.encode_to_vec(&mut self.buf);
        }
        self.buf
    }
}

/// Boolean column decoder. An exhausted (or omitted) column yields false
/// forever; a truncated count is an error.
#[derive(Debug)]
pub(crate) struct BooleanDecoder<'a> {
    decoder: Decoder<'a>,
    last_value: bool,
    count: usize,
}

impl<'a> From<&'a [u8]> for BooleanDecoder<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        BooleanDecoder {
            decoder: Decoder::new(bytes),
            last_value: true,
            count: 0,
        }
    }
}

impl<'a> BooleanDecoder<'a> {
    pub fn next(&mut self) -> Result<bool, DecodeError> {
        while self.count == 0 {
            if self.decoder.done() {
                return Ok(false);
            }
            self.count = self.decoder.read()?;
            self.last_value = !self.last_value;
        }
        self.count -= 1;
        Ok(self.last_value)
    }

    pub fn done(&self) -> bool {
        self.count == 0 && self.decoder.done()
    }
}
