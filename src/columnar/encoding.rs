use core::fmt::Debug;
use smol_str::SmolStr;
use std::io;
use std::io::{Read, Write};
use std::str;

/// Why a column stream failed to decode.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    Truncated,
    #[error("leb128 encoded integer does not fit in 64 bits")]
    Overflow,
    #[error("invalid value encoding")]
    BadValue,
}

impl From<leb128::read::Error> for DecodeError {
    fn from(e: leb128::read::Error) -> Self {
        match e {
            leb128::read::Error::Overflow => DecodeError::Overflow,
            leb128::read::Error::IoError(_) => DecodeError::Truncated,
        }
    }
}

/// A cursor over a column's bytes. Tracks how far it has read so callers
/// can advance through concatenated streams.
#[derive(Clone, Debug)]
pub(crate) struct Decoder<'a> {
    pub offset: usize,
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { offset: 0, buf }
    }

    pub fn read<T: Decodable + Debug>(&mut self) -> Result<T, DecodeError> {
        let mut new_buf = self.buf;
        let val = T::decode(&mut new_buf)?;
        let delta = self.buf.len() - new_buf.len();
        self.buf = new_buf;
        self.offset += delta;
        Ok(val)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < len {
            Err(DecodeError::Truncated)
        } else {
            let (head, rest) = self.buf.split_at(len);
            self.buf = rest;
            self.offset += len;
            Ok(head)
        }
    }

    pub fn done(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<'a> From<&'a [u8]> for Decoder<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Decoder::new(bytes)
    }
}

/// Values which can be written into a column stream.
pub(crate) trait Encodable {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize>;

    fn encode_to_vec(&self, buf: &mut Vec<u8>) {
        // Writing to a Vec cannot fail
        self.encode(buf).unwrap();
    }
}

impl Encodable for u64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::unsigned(buf, *self)
    }
}

impl Encodable for i64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::signed(buf, *self)
    }
}

impl Encodable for usize {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        (*self as u64).encode(buf)
    }
}

impl Encodable for u32 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        u64::from(*self).encode(buf)
    }
}

impl Encodable for i32 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        i64::from(*self).encode(buf)
    }
}

impl Encodable for f64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let bytes = self.to_le_bytes();
        buf.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

impl Encodable for &str {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let bytes = self.as_bytes();
        let head = bytes.len().encode(buf)?;
        buf.write_all(bytes)?;
        Ok(head + bytes.len())
    }
}

impl Encodable for SmolStr {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_str().encode(buf)
    }
}

impl Encodable for String {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_str().encode(buf)
    }
}

/// Values which can be read back out of a column stream.
pub(crate) trait Decodable: Sized {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError>;
}

impl Decodable for u64 {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        Ok(leb128::read::unsigned(bytes)?)
    }
}

impl Decodable for i64 {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        Ok(leb128::read::signed(bytes)?)
    }
}

impl Decodable for usize {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let val = u64::decode(bytes)?;
        usize::try_from(val).map_err(|_| DecodeError::Overflow)
    }
}

impl Decodable for u32 {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let val = u64::decode(bytes)?;
        u32::try_from(val).map_err(|_| DecodeError::Overflow)
    }
}

impl Decodable for i32 {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let val = i64::decode(bytes)?;
        i32::try_from(val).map_err(|_| DecodeError::Overflow)
    }
}

impl Decodable for f64 {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let mut buffer = [0; 8];
        bytes
            .read_exact(&mut buffer)
            .map_err(|_| DecodeError::Truncated)?;
        Ok(Self::from_le_bytes(buffer))
    }
}

impl Decodable for Vec<u8> {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let len = usize::decode(bytes)?;
        if len == 0 {
            return Ok(vec![]);
        }
        let mut buffer = vec![0; len];
        bytes
            .read_exact(buffer.as_mut_slice())
            .map_err(|_| DecodeError::Truncated)?;
        Ok(buffer)
    }
}

impl Decodable for SmolStr {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let buffer = Vec::decode(bytes)?;
        str::from_utf8(&buffer)
            .map(SmolStr::new)
            .map_err(|_| DecodeError::BadValue)
    }
}

impl Decodable for String {
    fn decode<R: Read>(bytes: &mut R) -> Result<Self, DecodeError> {
        let buffer = Vec::decode(bytes)?;
        String::from_utf8(buffer).map_err(|_| DecodeError::BadValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Encodable + Decodable + Debug + PartialEq>(val: T) {
        let mut buf = Vec::new();
        val.encode_to_vec(&mut buf);
        let mut decoder = Decoder::new(&buf);
        assert_eq!(decoder.read::<T>().unwrap(), val);
        assert!(decoder.done());
    }

    #[test]
    fn leb_round_trips() {
        round_trip(0_u64);
        round_trip(127_u64);
        round_trip(128_u64);
        round_trip(u64::MAX);
        round_trip(0_i64);
        round_trip(-1_i64);
        round_trip(63_i64);
        round_trip(-64_i64);
        round_trip(i64::MIN);
        round_trip(i64::MAX);
        round_trip(1.5_f64);
        round_trip(SmolStr::new("hello"));
        round_trip(String::new());
    }

    #[test]
    fn truncated_input_is_an_error() {
        // continuation bit set but no following byte
        let mut buf: &[u8] = &[0x81];
        assert_eq!(u64::decode(&mut buf), Err(DecodeError::Truncated));
    }

    #[test]
    fn overlong_leb_is_an_error() {
        let mut buf: &[u8] = &[0x80; 11];
        assert_eq!(u64::decode(&mut buf), Err(DecodeError::Overflow));
    }

    #[test]
    fn decoder_tracks_offset() {
        let mut buf = Vec::new();
        300_u64.encode_to_vec(&mut buf);
        1_u64.encode_to_vec(&mut buf);
        let mut decoder = Decoder::new(&buf);
        decoder.read::<u64>().unwrap();
        assert_eq!(decoder.offset, 2);
        decoder.read::<u64>().unwrap();
        assert_eq!(decoder.offset, 3);
        assert!(decoder.done());
    }
}
