use crate::storage::change as stored;
use crate::storage::chunk::{self, ChunkType, Header};
use crate::storage::parse;
use crate::types::{ActorId, ChangeHash, Op};

/// A group of operations committed atomically by one actor.
///
/// Changes are the unit of replication. The identity of a change is its
/// content address: a hash over its dependency hashes and its serialized
/// body, so a change's hash pins both its contents and its causal history.
#[derive(Clone, Debug)]
pub struct Change {
    actor: ActorId,
    seq: u64,
    start_op: u64,
    timestamp: i64,
    message: Option<String>,
    deps: Vec<ChangeHash>,
    pub(crate) ops: Vec<Op>,
    /// The canonical chunk body, kept so that `raw_bytes` and `hash` are
    /// always consistent with what peers saw.
    body: Vec<u8>,
    hash: ChangeHash,
}

impl Change {
    pub(crate) fn new(
        actor: ActorId,
        seq: u64,
        start_op: u64,
        timestamp: i64,
        message: Option<String>,
        deps: Vec<ChangeHash>,
        ops: Vec<Op>,
    ) -> Change {
        Self::from_stored(stored::ChangeParts {
            actor,
            seq,
            start_op,
            timestamp,
            message,
            deps,
            ops,
        })
    }

    pub(crate) fn from_stored(parts: stored::ChangeParts) -> Change {
        let body = stored::encode_chunk_body(&parts);
        Self::from_parts(parts, body)
    }

    pub(crate) fn from_parts(parts: stored::ChangeParts, body: Vec<u8>) -> Change {
        let hash = chunk::change_hash(parts.deps.clone(), &body);
        Change {
            actor: parts.actor,
            seq: parts.seq,
            start_op: parts.start_op,
            timestamp: parts.timestamp,
            message: parts.message,
            deps: parts.deps,
            ops: parts.ops,
            body,
            hash,
        }
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn start_op(&self) -> u64 {
        self.start_op
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn message(&self) -> Option<&String> {
        self.message.as_ref()
    }

    pub fn deps(&self) -> &[ChangeHash] {
        &self.deps
    }

    pub fn hash(&self) -> ChangeHash {
        self.hash
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// The highest op counter used by this change.
    pub fn max_op(&self) -> u64 {
        self.start_op + (self.ops.len() as u64).saturating_sub(1)
    }

    /// The change as a standalone chunk, the unit of sync transport.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 16);
        chunk::write_chunk(ChunkType::Change, &self.body, &mut out);
        out
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Change {}

#[derive(thiserror::Error, Debug)]
pub enum LoadChangeError {
    #[error("unable to parse change: {0}")]
    Parse(String),
    #[error("change checksum does not match its contents")]
    BadChecksum,
    #[error("leftover data after parsing")]
    LeftoverData,
    #[error("wrong chunk type")]
    WrongChunkType,
}

impl From<parse::ParseError<parse::ErrorKind>> for LoadChangeError {
    fn from(e: parse::ParseError<parse::ErrorKind>) -> Self {
        LoadChangeError::Parse(e.to_string())
    }
}

impl TryFrom<&[u8]> for Change {
    type Error = LoadChangeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let (remaining, (header, body)) = Header::parse(bytes)?;
        if !remaining.is_empty() {
            return Err(LoadChangeError::LeftoverData);
        }
        if !header.checksum_valid(body) {
            return Err(LoadChangeError::BadChecksum);
        }
        let body = match header.chunk_type() {
            ChunkType::Change => body.to_vec(),
            ChunkType::Compressed => chunk::inflate_body(body)?,
            ChunkType::Document => return Err(LoadChangeError::WrongChunkType),
        };
        let (rest, parts) = stored::parse_chunk_body(&body)?;
        if !rest.is_empty() {
            return Err(LoadChangeError::LeftoverData);
        }
        Ok(Change::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::columns;
    use crate::types::{ActorId, Key, OpId, OpType};

    fn sample_change() -> Change {
        let actor = ActorId::from([3; 16]);
        let ops = vec![Op {
            id: OpId::new(1, actor),
            obj: crate::ROOT,
            key: Key::Map("greeting".into()),
            action: OpType::Put("hello".into()),
            pred: vec![],
            insert: false,
        }];
        Change::new(actor, 1, 1, 0, Some("hi".to_string()), vec![], ops)
    }

    #[test]
    fn raw_bytes_round_trip() {
        let change = sample_change();
        let parsed = Change::try_from(change.raw_bytes().as_slice()).unwrap();
        assert_eq!(parsed, change);
        assert_eq!(parsed.message(), Some(&"hi".to_string()));
        assert_eq!(parsed.max_op(), 1);
    }

    #[test]
    fn compressed_chunks_parse() {
        let change = sample_change();
        let mut compressed_body = Vec::new();
        leb128::write::unsigned(&mut compressed_body, change.body.len() as u64).unwrap();
        compressed_body.extend(columns::deflate(&change.body));
        let mut bytes = Vec::new();
        chunk::write_chunk(ChunkType::Compressed, &compressed_body, &mut bytes);

        let parsed = Change::try_from(bytes.as_slice()).unwrap();
        assert_eq!(parsed.hash(), change.hash());
        assert_eq!(parsed.ops, change.ops);
    }

    #[test]
    fn document_chunks_are_not_changes() {
        let mut bytes = Vec::new();
        chunk::write_chunk(ChunkType::Document, b"whatever", &mut bytes);
        assert!(matches!(
            Change::try_from(bytes.as_slice()),
            Err(LoadChangeError::WrongChunkType)
        ));
    }
}
