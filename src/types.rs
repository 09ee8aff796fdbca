use crate::error;
use crate::marks::MarkData;
use crate::ScalarValue;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::cmp::Ordering;
use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::str::FromStr;

/// A 16 byte identifier for a peer.
///
/// Every operation is attributed to an actor, and actor ordering (the
/// lexicographic ordering of the raw bytes) is used for deterministic
/// tie-breaking during merge.
//
// Note that the binary format relies on the Ord implementation being the
// lexicographic ordering of the underlying bytes. Be aware of this if you are
// changing the ActorId implementation in ways which might affect Ord.
#[derive(Eq, PartialEq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ActorId([u8; 16]);

impl ActorId {
    pub const LEN: usize = 16;

    /// Generate a fresh random actor id.
    pub fn random() -> ActorId {
        ActorId(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorId").field(&hex::encode(self.0)).finish()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl From<[u8; 16]> for ActorId {
    fn from(b: [u8; 16]) -> Self {
        ActorId(b)
    }
}

impl From<uuid::Uuid> for ActorId {
    fn from(u: uuid::Uuid) -> Self {
        ActorId(*u.as_bytes())
    }
}

impl TryFrom<&[u8]> for ActorId {
    type Error = error::InvalidActorId;

    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 16] = b
            .try_into()
            .map_err(|_| error::InvalidActorId(hex::encode(b)))?;
        Ok(ActorId(arr))
    }
}

impl TryFrom<&str> for ActorId {
    type Error = error::InvalidActorId;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(s).map_err(|_| error::InvalidActorId(s.into()))?;
        ActorId::try_from(bytes.as_slice())
    }
}

impl FromStr for ActorId {
    type Err = error::InvalidActorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActorId::try_from(s)
    }
}

/// The type of a container object in the document tree.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Copy, Hash)]
#[serde(rename_all = "camelCase", untagged)]
pub enum ObjType {
    Map,
    Table,
    List,
    Text,
}

impl ObjType {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::List | Self::Text)
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjType::Map => write!(f, "map"),
            ObjType::Table => write!(f, "table"),
            ObjType::List => write!(f, "list"),
            ObjType::Text => write!(f, "text"),
        }
    }
}

/// Identifies a single operation: a per-actor counter plus the actor.
///
/// OpIds are globally unique as long as no actor reuses a counter, and they
/// are totally ordered: counter first, then actor bytes ascending.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct OpId {
    pub counter: u64,
    pub actor: ActorId,
}

impl OpId {
    pub fn new(counter: u64, actor: ActorId) -> Self {
        OpId { counter, actor }
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.actor.cmp(&other.actor),
            order => order,
        }
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

/// Identifies an object in the document: either the distinguished root map
/// or the id of the operation which created the object.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ObjId {
    Root,
    Id(OpId),
}

/// The root object. Always exists and is always a map.
pub const ROOT: ObjId = ObjId::Root;

impl ObjId {
    pub fn is_root(&self) -> bool {
        matches!(self, ObjId::Root)
    }
}

impl From<OpId> for ObjId {
    fn from(o: OpId) -> Self {
        ObjId::Id(o)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjId::Root => write!(f, "_root"),
            ObjId::Id(id) => write!(f, "{}", id),
        }
    }
}

impl Ord for ObjId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ObjId::Root, ObjId::Root) => Ordering::Equal,
            (ObjId::Root, _) => Ordering::Less,
            (_, ObjId::Root) => Ordering::Greater,
            (ObjId::Id(a), ObjId::Id(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ObjId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A position in a sequence: the head (before every element) or the element
/// created by the given operation. Used as the anchor for RGA insertion.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ElemId {
    Head,
    Id(OpId),
}

impl From<OpId> for ElemId {
    fn from(o: OpId) -> Self {
        ElemId::Id(o)
    }
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemId::Head => write!(f, "_head"),
            ElemId::Id(id) => write!(f, "{}", id),
        }
    }
}

/// The property an operation targets: a map key or a sequence position.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) enum Key {
    Map(SmolStr),
    Seq(ElemId),
}

impl Key {
    pub(crate) fn elemid(&self) -> Option<ElemId> {
        match self {
            Key::Map(_) => None,
            Key::Seq(id) => Some(*id),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Map(s) => write!(f, "{}", s),
            Key::Seq(id) => write!(f, "{}", id),
        }
    }
}

/// A user facing property: a map key or a list index.
#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone)]
pub enum Prop {
    Map(String),
    Seq(usize),
}

impl From<String> for Prop {
    fn from(p: String) -> Self {
        Prop::Map(p)
    }
}

impl From<&String> for Prop {
    fn from(p: &String) -> Self {
        Prop::Map(p.clone())
    }
}

impl From<&str> for Prop {
    fn from(p: &str) -> Self {
        Prop::Map(p.to_owned())
    }
}

impl From<usize> for Prop {
    fn from(index: usize) -> Self {
        Prop::Seq(index)
    }
}

/// The kind of mutation an operation performs.
#[derive(Debug, PartialEq, Clone)]
pub(crate) enum OpType {
    /// Create a nested object.
    Make(ObjType),
    /// Set a scalar value. Combined with `insert` this is a sequence
    /// insertion; an inserted string scalar on a text object is a text
    /// splice.
    Put(ScalarValue),
    /// Remove the targeted entry or element.
    Delete,
    /// Add a delta to a counter.
    Increment(i64),
    /// Attach a rich text mark to the range named by `pred`.
    Mark(MarkData),
}

/// A single operation in the log. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Op {
    pub id: OpId,
    pub obj: ObjId,
    pub key: Key,
    pub action: OpType,
    /// Ids of the operations this one supersedes.
    pub pred: Vec<OpId>,
    /// Whether this op inserts a new sequence element after `key`.
    pub insert: bool,
}

/// The 32 byte content address of a change.
#[derive(Eq, PartialEq, Hash, Clone, PartialOrd, Ord, Copy)]
pub struct ChangeHash(pub [u8; 32]);

impl ChangeHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChangeHash")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseChangeHashError {
    #[error(transparent)]
    HexDecode(#[from] hex::FromHexError),
    #[error("incorrect length, change hash should be 32 bytes, got {actual}")]
    IncorrectLength { actual: usize },
}

impl FromStr for ChangeHash {
    type Err = ParseChangeHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() == 32 {
            Ok(ChangeHash(bytes.try_into().unwrap()))
        } else {
            Err(ParseChangeHashError::IncorrectLength {
                actual: bytes.len(),
            })
        }
    }
}

impl TryFrom<&[u8]> for ChangeHash {
    type Error = error::InvalidChangeHashSlice;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            Err(error::InvalidChangeHashSlice(Vec::from(bytes)))
        } else {
            let mut array = [0; 32];
            array.copy_from_slice(bytes);
            Ok(ChangeHash(array))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opid_orders_by_counter_then_actor() {
        let a = ActorId::from([1; 16]);
        let b = ActorId::from([2; 16]);
        assert!(OpId::new(2, a) > OpId::new(1, b));
        assert!(OpId::new(1, a) < OpId::new(1, b));
        assert_eq!(OpId::new(3, a), OpId::new(3, a));
    }

    #[test]
    fn actor_id_hex_round_trip() {
        let actor = ActorId::random();
        let parsed: ActorId = actor.to_hex_string().parse().unwrap();
        assert_eq!(actor, parsed);
    }

    #[test]
    fn change_hash_from_str_rejects_wrong_length() {
        assert!("abcd".parse::<ChangeHash>().is_err());
    }
}
