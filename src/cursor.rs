use crate::types::OpId;

/// A stable position in a list or text object.
///
/// A cursor is backed by the id of the element it was created on, not the
/// index, so it keeps pointing at the same element across insertions,
/// deletions and merges. Create one with [`crate::Document::cursor`] and
/// turn it back into an index with [`crate::Document::resolve_cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub(crate) OpId);

impl Cursor {
    /// The id of the element this cursor is anchored to.
    pub fn elem(&self) -> OpId {
        self.0
    }
}
