use std::convert::TryFrom;
use std::io::Read;

use sha2::{Digest, Sha256};

use super::{parse, MAGIC_BYTES};
use crate::types::ChangeHash;

/// The kind of payload a chunk carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkType {
    Document,
    Change,
    Compressed,
}

impl TryFrom<u8> for ChunkType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Document),
            1 => Ok(Self::Change),
            2 => Ok(Self::Compressed),
            other => Err(other),
        }
    }
}

impl From<ChunkType> for u8 {
    fn from(ct: ChunkType) -> Self {
        match ct {
            ChunkType::Document => 0,
            ChunkType::Change => 1,
            ChunkType::Compressed => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CheckSum([u8; 4]);

impl CheckSum {
    pub(crate) fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl From<[u8; 4]> for CheckSum {
    fn from(raw: [u8; 4]) -> Self {
        CheckSum(raw)
    }
}

/// The fixed part of a chunk: magic, checksum, type and body length.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Header {
    checksum: CheckSum,
    chunk_type: ChunkType,
    body_len: usize,
}

impl Header {
    pub(crate) fn new(chunk_type: ChunkType, body: &[u8]) -> Self {
        Self {
            checksum: checksum(body).into(),
            chunk_type,
            body_len: body.len(),
        }
    }

    pub(crate) fn chunk_type(&self) -> ChunkType {
        self.chunk_type
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend(MAGIC_BYTES);
        out.extend(self.checksum.bytes());
        out.push(u8::from(self.chunk_type));
        leb128::write::unsigned(out, self.body_len as u64).unwrap();
    }

    /// Parse the envelope, returning the header and the body slice. The
    /// remaining input continues after the body.
    pub(crate) fn parse(input: &[u8]) -> parse::ParseResult<'_, (Header, &[u8])> {
        let (i, magic) = parse::take4(input)?;
        if magic != MAGIC_BYTES {
            return Err(parse::ParseError::Error(
                parse::ErrorKind::InvalidMagicBytes,
            ));
        }
        let (i, checksum_bytes) = parse::take4(i)?;
        let (i, raw_chunk_type) = parse::take1(i)?;
        let chunk_type: ChunkType = raw_chunk_type
            .try_into()
            .map_err(|e| parse::ParseError::Error(parse::ErrorKind::UnknownChunkType(e)))?;
        let (i, body_len) = parse::leb128_u64(i)?;
        let (i, body) = parse::take_n(body_len as usize, i)?;
        Ok((
            i,
            (
                Header {
                    checksum: checksum_bytes.into(),
                    chunk_type,
                    body_len: body.len(),
                },
                body,
            ),
        ))
    }

    /// Recompute the body checksum and compare against the stored one.
    pub(crate) fn checksum_valid(&self, body: &[u8]) -> bool {
        CheckSum(checksum(body)) == self.checksum
    }
}

/// Write a complete chunk: envelope followed by the body.
pub(crate) fn write_chunk(chunk_type: ChunkType, body: &[u8], out: &mut Vec<u8>) {
    Header::new(chunk_type, body).write(out);
    out.extend(body);
}

/// The first four bytes of the SHA-256 digest of the body.
fn checksum(body: &[u8]) -> [u8; 4] {
    let hash = Sha256::digest(body);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// The content address of a change: SHA-256 over the sorted dependency
/// hashes, the change chunk type byte, and the chunk body. Tying the
/// identity to the causal parents as well as the contents means two
/// changes with identical bodies but different histories hash apart.
pub(crate) fn change_hash(mut deps: Vec<ChangeHash>, body: &[u8]) -> ChangeHash {
    deps.sort();
    let mut hasher = Sha256::new();
    for dep in &deps {
        hasher.update(dep.as_bytes());
    }
    hasher.update([u8::from(ChunkType::Change)]);
    hasher.update(body);
    ChangeHash(hasher.finalize().into())
}

/// Inflate the body of a compressed chunk into a change chunk body.
pub(crate) fn inflate_body(body: &[u8]) -> Result<Vec<u8>, parse::ParseError<parse::ErrorKind>> {
    let (compressed, uncompressed_len) =
        parse::leb128_u64(body).map(|(rest, len)| (rest, len as usize))?;
    let mut decoder = flate2::bufread::DeflateDecoder::new(compressed);
    let mut out = Vec::with_capacity(uncompressed_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|_| parse::ParseError::Error(parse::ErrorKind::Deflate))?;
    if out.len() != uncompressed_len {
        return Err(parse::ParseError::Error(parse::ErrorKind::Deflate));
    }
    Ok(out)
}
