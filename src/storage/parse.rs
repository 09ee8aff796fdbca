//! Slice based parser helpers. Every parser takes an input slice and
//! returns the remaining input alongside the parsed value, or fails with
//! either a hard error or `Incomplete` when more input is needed.

use core::{mem::size_of, num::NonZeroUsize};
use std::convert::TryInto;

use crate::types::{ActorId, ChangeHash};

const HASH_SIZE: usize = 32; // 256 bits = 32 bytes

pub(crate) type ParseResult<'a, O, E = ErrorKind> = Result<(&'a [u8], O), ParseError<E>>;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ParseError<E> {
    Error(E),
    Incomplete(Needed),
}

impl<E: std::fmt::Display> std::fmt::Display for ParseError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{}", e),
            Self::Incomplete(_) => write!(f, "not enough data"),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for ParseError<E> {}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Needed {
    #[allow(dead_code)]
    Unknown,
    Size(NonZeroUsize),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ErrorKind {
    Leb128TooLarge,
    InvalidMagicBytes,
    UnknownChunkType(u8),
    InvalidUtf8,
    InvalidColumnLayout,
    /// Thrown when decoding column bodies into operations
    InvalidColumns(String),
    Deflate,
    ActorIndexOutOfRange(u64),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leb128TooLarge => write!(f, "invalid leb 128"),
            Self::InvalidMagicBytes => write!(f, "invalid magic bytes"),
            Self::UnknownChunkType(t) => write!(f, "unknown chunk type: {}", t),
            Self::InvalidUtf8 => write!(f, "invalid utf8"),
            Self::InvalidColumnLayout => write!(f, "column specs were not ascending"),
            Self::InvalidColumns(desc) => write!(f, "error decoding columns: {}", desc),
            Self::Deflate => write!(f, "error decompressing column data"),
            Self::ActorIndexOutOfRange(idx) => write!(f, "actor index {} out of range", idx),
        }
    }
}

macro_rules! impl_leb {
    ($parser_name: ident, $ty: ty) => {
        #[allow(dead_code)]
        pub(crate) fn $parser_name(input: &[u8]) -> ParseResult<'_, $ty> {
            let mut res = 0;
            let mut shift = 0;

            for (pos, byte) in input.iter().enumerate() {
                if (byte & 0x80) == 0 {
                    res |= (*byte as $ty) << shift;
                    return Ok((&input[pos + 1..], res));
                } else if pos == leb128_size::<$ty>() - 1 {
                    return Err(ParseError::Error(ErrorKind::Leb128TooLarge));
                } else {
                    res |= ((byte & 0x7F) as $ty) << shift;
                }
                shift += 7;
            }
            Err(ParseError::Incomplete(NEED_ONE))
        }
    };
}

impl_leb!(leb128_u64, u64);
impl_leb!(leb128_u32, u32);

/// Parse a signed LEB128 integer, sign-extending the most significant
/// decoded bit.
pub(crate) fn leb128_i64(input: &[u8]) -> ParseResult<'_, i64> {
    let mut res = 0_i64;
    let mut shift = 0;

    for (pos, byte) in input.iter().enumerate() {
        res |= ((byte & 0x7F) as i64) << shift;
        shift += 7;
        if (byte & 0x80) == 0 {
            if shift < 64 && (byte & 0x40) != 0 {
                // sign extend the most significant decoded bit
                res |= -1_i64 << shift;
            }
            return Ok((&input[pos + 1..], res));
        } else if pos == leb128_size::<i64>() - 1 {
            return Err(ParseError::Error(ErrorKind::Leb128TooLarge));
        }
    }
    Err(ParseError::Incomplete(NEED_ONE))
}

/// Maximum LEB128-encoded size of an integer type
const fn leb128_size<T>() -> usize {
    let bits = size_of::<T>() * 8;
    (bits + 6) / 7 // equivalent to ceil(bits/7) w/o floats
}

const NEED_ONE: Needed = Needed::Size(unsafe { NonZeroUsize::new_unchecked(1) });

pub(crate) fn take1<E>(input: &[u8]) -> ParseResult<'_, u8, E> {
    if let Some(need) = NonZeroUsize::new(1_usize.saturating_sub(input.len())) {
        Err(ParseError::Incomplete(Needed::Size(need)))
    } else {
        let (result, remaining) = input.split_at(1);
        Ok((remaining, result[0]))
    }
}

pub(crate) fn take4<E>(input: &[u8]) -> ParseResult<'_, [u8; 4], E> {
    if let Some(need) = NonZeroUsize::new(4_usize.saturating_sub(input.len())) {
        Err(ParseError::Incomplete(Needed::Size(need)))
    } else {
        let (result, remaining) = input.split_at(4);
        Ok((remaining, result.try_into().expect("we checked the length")))
    }
}

/// Parse a slice of length `n` from `input`.
pub(crate) fn take_n<E>(n: usize, input: &[u8]) -> ParseResult<'_, &[u8], E> {
    if let Some(need) = NonZeroUsize::new(n.saturating_sub(input.len())) {
        Err(ParseError::Incomplete(Needed::Size(need)))
    } else {
        let (result, remaining) = input.split_at(n);
        Ok((remaining, result))
    }
}

/// Parse a ULEB count followed by that many occurrences of `g`.
pub(crate) fn length_prefixed<'a, G, O, E>(
    mut g: G,
) -> impl FnMut(&'a [u8]) -> ParseResult<'a, Vec<O>, E>
where
    G: FnMut(&'a [u8]) -> ParseResult<'a, O, E>,
    E: From<ErrorKind>,
{
    move |input: &'a [u8]| {
        let (mut i, count) = leb128_u64(input).map_err(lift)?;
        let mut res = Vec::new();
        for _ in 0..count {
            let (next, e) = g(i)?;
            i = next;
            res.push(e);
        }
        Ok((i, res))
    }
}

pub(crate) fn length_prefixed_bytes<E>(input: &[u8]) -> ParseResult<'_, &[u8], E>
where
    E: From<ErrorKind>,
{
    let (i, len) = leb128_u64(input).map_err(lift)?;
    take_n(len as usize, i)
}

/// Parse a raw 16 byte actor id.
pub(crate) fn actor_id<E>(input: &[u8]) -> ParseResult<'_, ActorId, E> {
    let (i, bytes) = take_n(ActorId::LEN, input)?;
    let actor = ActorId::try_from(bytes).expect("we checked the length above");
    Ok((i, actor))
}

pub(crate) fn change_hash<E>(input: &[u8]) -> ParseResult<'_, ChangeHash, E> {
    let (i, bytes) = take_n(HASH_SIZE, input)?;
    let hash: ChangeHash = bytes.try_into().expect("we checked the length above");
    Ok((i, hash))
}

pub(crate) fn utf_8<E>(len: usize, input: &[u8]) -> ParseResult<'_, String, E>
where
    E: From<ErrorKind>,
{
    let (i, bytes) = take_n(len, input)?;
    let result = String::from_utf8(bytes.to_vec())
        .map_err(|_| ParseError::Error(E::from(ErrorKind::InvalidUtf8)))?;
    Ok((i, result))
}

pub(crate) fn lift<Ef, Eg: From<Ef>>(e: ParseError<Ef>) -> ParseError<Eg> {
    match e {
        ParseError::Error(e) => ParseError::Error(Eg::from(e)),
        ParseError::Incomplete(n) => ParseError::Incomplete(n),
    }
}
