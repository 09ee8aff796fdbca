use crate::ScalarValue;
use smol_str::SmolStr;

/// The name/value payload of a mark operation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MarkData {
    pub name: SmolStr,
    pub value: ScalarValue,
}

/// A rich text mark over a range of a text or list object.
///
/// Marks are anchored to element ids internally, so they survive
/// insertions, deletions and merges; this projection carries the current
/// visible indices. `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub start: usize,
    pub end: usize,
    pub name: SmolStr,
    pub value: ScalarValue,
}
