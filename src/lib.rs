//! A local-first collaborative document engine.
//!
//! `concord` keeps a tree of maps, lists, text and counters which any
//! number of peers can edit independently, offline and without a server,
//! then merge again deterministically. Conflicts never surface
//! as errors: concurrent writes to one key are all retained and resolved
//! by a total order on operation ids, concurrent list inserts are ordered
//! by the RGA rule, and counters accumulate increments from every peer.
//!
//! Three subsystems make up the crate:
//!
//! - the operation log and the object states derived from it
//!   ([`Document`], transactions, time-travel reads);
//! - a columnar binary format with content-addressed integrity
//!   ([`Document::save`] / [`Document::load`], [`Change`]);
//! - a two-peer sync protocol built on Bloom-filter summaries
//!   ([`sync`]).
//!
//! ```
//! use concord::{Document, ROOT};
//!
//! let mut left = Document::new();
//! left.transact(|tx| tx.put(&ROOT, "title", "shopping"))?;
//!
//! let mut right = left.fork();
//! right.transact(|tx| tx.put(&ROOT, "done", false))?;
//! left.transact(|tx| tx.put(&ROOT, "items", 3_i64))?;
//!
//! left.merge(&right)?;
//! right.merge(&left)?;
//! assert_eq!(left.keys(&ROOT), right.keys(&ROOT));
//! # Ok::<(), concord::ConcordError>(())
//! ```

mod change;
mod change_graph;
mod clock;
mod columnar;
mod cursor;
mod document;
mod error;
mod marks;
mod op_set;
mod patch;
mod storage;
mod transaction;
mod types;
mod value;

pub mod sync;

pub use change::{Change, LoadChangeError};
pub use cursor::Cursor;
pub use document::Document;
pub use error::{ConcordError, InvalidActorId, InvalidChangeHashSlice};
pub use marks::Mark;
pub use patch::{Patch, PatchAction};
pub use transaction::{CommitOptions, Transaction};
pub use types::{
    ActorId, ChangeHash, ObjId, ObjType, OpId, ParseChangeHashError, Prop, ROOT,
};
pub use value::{Counter, ScalarValue, Value};
