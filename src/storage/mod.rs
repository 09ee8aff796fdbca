//! The stored form of documents and changes.
//!
//! Everything on disk or on the wire is a chunk: a magic/checksum/type
//! envelope ([`chunk`]) around a body. Change bodies hold one change's
//! metadata plus its operations encoded as columns ([`columns`],
//! [`change_ops`]); document bodies hold an actor table, every change, the
//! DAG heads and the vector clock ([`document`]).

pub(crate) mod change;
pub(crate) mod change_ops;
pub(crate) mod chunk;
pub(crate) mod columns;
pub(crate) mod document;
pub(crate) mod parse;

pub(crate) const MAGIC_BYTES: [u8; 4] = [0x85, 0x6f, 0x4a, 0x83];
