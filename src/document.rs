use crate::change::Change;
use crate::change_graph::ChangeGraph;
use crate::cursor::Cursor;
use crate::error::ConcordError;
use crate::marks::Mark;
use crate::op_set::OpSet;
use crate::patch::Patch;
use crate::storage::chunk::{self, ChunkType, Header};
use crate::storage::document as stored;
use crate::transaction::Transaction;
use crate::types::{ActorId, ChangeHash, ObjId, ObjType, OpId, Prop};
use crate::Value;

/// A CRDT document: a tree of maps, lists, text and counters which can be
/// edited independently by many peers and merged deterministically.
///
/// All mutation goes through a [`Transaction`] (see [`Document::transact`]);
/// reads are available directly. Documents can be forked, merged, saved to
/// a binary chunk, loaded back, and synchronized over the two-peer protocol
/// in [`crate::sync`].
///
/// ```
/// use concord::{Document, ROOT};
///
/// let mut doc = Document::new();
/// doc.transact(|tx| tx.put(&ROOT, "greeting", "hello"))?;
/// let (value, _) = doc.get(&ROOT, "greeting")?.unwrap();
/// assert_eq!(value.to_str(), Some("hello"));
/// # Ok::<(), concord::ConcordError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) actor: ActorId,
    /// The counter the next operation will be assigned.
    pub(crate) next_counter: u64,
    pub(crate) local_seq: u64,
    pub(crate) ops: OpSet,
    pub(crate) graph: ChangeGraph,
    /// Received changes whose dependencies have not arrived yet.
    queue: Vec<Change>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with a random actor id. The root map exists from
    /// the start.
    pub fn new() -> Document {
        Document {
            actor: ActorId::random(),
            next_counter: 1,
            local_seq: 0,
            ops: OpSet::new(),
            graph: ChangeGraph::new(),
            queue: Vec::new(),
        }
    }

    pub fn get_actor(&self) -> &ActorId {
        &self.actor
    }

    /// Set the actor id used for subsequent transactions.
    pub fn set_actor(&mut self, actor: ActorId) -> &mut Self {
        self.actor = actor;
        self.local_seq = self.graph.seq_of(&actor);
        self
    }

    pub fn with_actor(actor: ActorId) -> Document {
        let mut doc = Self::new();
        doc.set_actor(actor);
        doc
    }

    // -- mutation -----------------------------------------------------------

    /// Start a transaction. The transaction mutates the document
    /// immediately; dropping it without committing rolls everything back.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back
    /// on `Err`.
    pub fn transact<F, O>(&mut self, f: F) -> Result<O, ConcordError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<O, ConcordError>,
    {
        let mut tx = self.transaction();
        match f(&mut tx) {
            Ok(result) => {
                tx.commit();
                Ok(result)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Like [`Document::transact`], additionally returning the patches
    /// which describe the externally visible effects of the transaction.
    pub fn transact_with_patches<F, O>(&mut self, f: F) -> Result<(O, Vec<Patch>), ConcordError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<O, ConcordError>,
    {
        let mut tx = self.transaction();
        match f(&mut tx) {
            Ok(result) => {
                let patches = tx.take_patches();
                tx.commit();
                Ok((result, patches))
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    // -- reads --------------------------------------------------------------

    /// The winning value at a map key or list index, with the id of the op
    /// which put it there. For object values the op id is also the object's
    /// [`ObjId`].
    pub fn get<P: Into<Prop>>(
        &self,
        obj: &ObjId,
        prop: P,
    ) -> Result<Option<(Value, OpId)>, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.get(obj, &prop.into()))
    }

    /// Every concurrent value at a map key, in op id order (the last entry
    /// is the winner).
    pub fn get_all(&self, obj: &ObjId, key: &str) -> Result<Vec<(Value, OpId)>, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.map_get_all(obj, key))
    }

    /// The keys of a map, sorted lexicographically. Empty for missing or
    /// non-map objects.
    pub fn keys(&self, obj: &ObjId) -> Vec<String> {
        self.ops.keys(obj)
    }

    /// Map values in key order, or sequence values in index order.
    pub fn values(&self, obj: &ObjId) -> Vec<(Value, OpId)> {
        self.ops.values(obj)
    }

    /// Number of keys in a map or visible elements in a sequence.
    pub fn length(&self, obj: &ObjId) -> usize {
        self.ops.length(obj)
    }

    /// The content of a text object.
    pub fn text(&self, obj: &ObjId) -> Result<String, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.text(obj))
    }

    pub fn object_type(&self, obj: &ObjId) -> Option<ObjType> {
        self.ops.object_type(obj)
    }

    // -- historical reads ---------------------------------------------------

    pub fn get_at<P: Into<Prop>>(
        &self,
        obj: &ObjId,
        prop: P,
        heads: &[ChangeHash],
    ) -> Result<Option<(Value, OpId)>, ConcordError> {
        let snapshot = self.snapshot_at(heads)?;
        Ok(snapshot.get(obj, &prop.into()))
    }

    pub fn get_all_at(
        &self,
        obj: &ObjId,
        key: &str,
        heads: &[ChangeHash],
    ) -> Result<Vec<(Value, OpId)>, ConcordError> {
        Ok(self.snapshot_at(heads)?.map_get_all(obj, key))
    }

    pub fn keys_at(&self, obj: &ObjId, heads: &[ChangeHash]) -> Result<Vec<String>, ConcordError> {
        Ok(self.snapshot_at(heads)?.keys(obj))
    }

    pub fn values_at(
        &self,
        obj: &ObjId,
        heads: &[ChangeHash],
    ) -> Result<Vec<(Value, OpId)>, ConcordError> {
        Ok(self.snapshot_at(heads)?.values(obj))
    }

    pub fn length_at(&self, obj: &ObjId, heads: &[ChangeHash]) -> Result<usize, ConcordError> {
        Ok(self.snapshot_at(heads)?.length(obj))
    }

    pub fn text_at(&self, obj: &ObjId, heads: &[ChangeHash]) -> Result<String, ConcordError> {
        Ok(self.snapshot_at(heads)?.text(obj))
    }

    pub fn marks_at(&self, obj: &ObjId, heads: &[ChangeHash]) -> Result<Vec<Mark>, ConcordError> {
        Ok(self.snapshot_at(heads)?.marks(obj))
    }

    /// Rebuild the materialized state as it was at `heads` by replaying,
    /// in application order, exactly the changes reachable from them.
    fn snapshot_at(&self, heads: &[ChangeHash]) -> Result<OpSet, ConcordError> {
        if !self.graph.has_all(heads) {
            return Err(ConcordError::InvalidChange(
                "unknown head in historical read".to_string(),
            ));
        }
        let ancestors = self.graph.ancestors(heads);
        let mut set = OpSet::new();
        let mut remaining = ancestors.len();
        for change in self.graph.changes() {
            if remaining == 0 {
                break;
            }
            if !ancestors.contains(&change.hash()) {
                continue;
            }
            for op in &change.ops {
                set.apply(op)
                    .map_err(|e| ConcordError::InvalidChange(e.to_string()))?;
            }
            remaining -= 1;
        }
        Ok(set)
    }

    // -- cursors and marks --------------------------------------------------

    /// A stable cursor for the element at `index`, or None when the index
    /// is out of bounds.
    pub fn cursor(&self, obj: &ObjId, index: usize) -> Result<Option<Cursor>, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.elem_id_at(obj, index).map(Cursor))
    }

    /// The current visible index of a cursor's element, or None once the
    /// element has been deleted.
    pub fn resolve_cursor(
        &self,
        obj: &ObjId,
        cursor: &Cursor,
    ) -> Result<Option<usize>, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.visible_index_of(obj, cursor.0))
    }

    /// A cursor for the element which was at `index` when the document
    /// looked like `heads`.
    pub fn cursor_at(
        &self,
        obj: &ObjId,
        index: usize,
        heads: &[ChangeHash],
    ) -> Result<Option<Cursor>, ConcordError> {
        Ok(self.snapshot_at(heads)?.elem_id_at(obj, index).map(Cursor))
    }

    /// Resolve a cursor against the state at `heads`.
    pub fn resolve_cursor_at(
        &self,
        obj: &ObjId,
        cursor: &Cursor,
        heads: &[ChangeHash],
    ) -> Result<Option<usize>, ConcordError> {
        Ok(self.snapshot_at(heads)?.visible_index_of(obj, cursor.0))
    }

    /// All marks on a text or list object, projected to current indices.
    pub fn marks(&self, obj: &ObjId) -> Result<Vec<Mark>, ConcordError> {
        self.ensure_object(obj)?;
        Ok(self.ops.marks(obj))
    }

    // -- fork and merge -----------------------------------------------------

    /// An independent deep copy carrying a fresh actor identity.
    pub fn fork(&self) -> Document {
        let mut forked = self.clone();
        forked.actor = ActorId::random();
        forked.local_seq = 0;
        forked
    }

    /// Apply every change from `other` that this document has not seen.
    /// Merge is commutative, associative and idempotent.
    pub fn merge(&mut self, other: &Document) -> Result<(), ConcordError> {
        let mut missing: Vec<Change> = other
            .graph
            .changes()
            .iter()
            .filter(|c| !self.graph.clock().covers(c.actor_id(), c.seq()))
            .cloned()
            .collect();
        // causal order within an actor follows start_op
        missing.sort_by_key(|c| c.start_op());
        tracing::debug!(changes = missing.len(), "merging remote document");
        self.apply_changes(missing)
    }

    pub fn get_heads(&self) -> Vec<ChangeHash> {
        self.graph.heads().to_vec()
    }

    /// The full change history, in application order.
    pub fn get_changes(&self) -> Vec<&Change> {
        self.graph.changes().iter().collect()
    }

    /// The changes not reachable from `have`, in application order.
    pub fn get_changes_since(&self, have: &[ChangeHash]) -> Vec<&Change> {
        self.graph.changes_since(have)
    }

    pub fn get_change_by_hash(&self, hash: &ChangeHash) -> Option<&Change> {
        self.graph.get(hash)
    }

    /// Dependency hashes we are missing: unresolved parents of queued
    /// changes plus any of `heads` we have never seen.
    pub fn get_missing_deps(&self, heads: &[ChangeHash]) -> Vec<ChangeHash> {
        let in_queue: Vec<ChangeHash> = self.queue.iter().map(|c| c.hash()).collect();
        let mut missing: Vec<ChangeHash> = self
            .queue
            .iter()
            .flat_map(|c| c.deps().iter())
            .chain(heads.iter())
            .copied()
            .filter(|h| !self.graph.has(h) && !in_queue.contains(h))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Apply changes received from another peer. Changes whose
    /// dependencies are missing are buffered and retried as their parents
    /// arrive.
    pub fn apply_changes(
        &mut self,
        changes: impl IntoIterator<Item = Change>,
    ) -> Result<(), ConcordError> {
        for change in changes {
            if self.graph.has(&change.hash()) || self.is_queued(&change.hash()) {
                continue;
            }
            if self.graph.deps_satisfied(&change) {
                self.apply_change(change)?;
                self.drain_queue()?;
            } else {
                tracing::debug!(hash = %change.hash(), "deferring change with missing deps");
                self.queue.push(change);
            }
        }
        Ok(())
    }

    fn is_queued(&self, hash: &ChangeHash) -> bool {
        self.queue.iter().any(|c| c.hash() == *hash)
    }

    fn drain_queue(&mut self) -> Result<(), ConcordError> {
        let mut progress = true;
        while progress {
            progress = false;
            let mut idx = 0;
            while idx < self.queue.len() {
                if self.graph.deps_satisfied(&self.queue[idx]) {
                    let change = self.queue.remove(idx);
                    self.apply_change(change)?;
                    progress = true;
                } else {
                    idx += 1;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn apply_change(&mut self, change: Change) -> Result<(), ConcordError> {
        for op in &change.ops {
            self.ops
                .apply(op)
                .map_err(|e| ConcordError::InvalidChange(e.to_string()))?;
        }
        self.next_counter = self.next_counter.max(change.max_op() + 1);
        self.graph.add(change);
        Ok(())
    }

    // -- binary serialization -----------------------------------------------

    /// Serialize the whole document into one chunk.
    pub fn save(&self) -> Vec<u8> {
        let body = stored::encode_body(
            self.actor,
            self.next_counter,
            self.local_seq,
            self.graph.changes(),
            self.graph.heads(),
            &self.graph.clock().sorted_entries(),
        );
        let mut out = Vec::with_capacity(body.len() + 16);
        chunk::write_chunk(ChunkType::Document, &body, &mut out);
        out
    }

    /// Load a document saved with [`Document::save`]. Any structural,
    /// checksum or codec failure rejects the input without partial state.
    pub fn load(data: &[u8]) -> Result<Document, ConcordError> {
        let invalid = |msg: String| ConcordError::InvalidDocument(msg);
        let (remaining, (header, body)) =
            Header::parse(data).map_err(|e| invalid(e.to_string()))?;
        if !remaining.is_empty() {
            return Err(invalid("leftover data after document chunk".into()));
        }
        if header.chunk_type() != ChunkType::Document {
            return Err(invalid("not a document chunk".into()));
        }
        if !header.checksum_valid(body) {
            return Err(invalid("checksum mismatch".into()));
        }
        let (rest, parts) = stored::parse_body(body).map_err(|e| invalid(e.to_string()))?;
        if !rest.is_empty() {
            return Err(invalid("leftover data inside document body".into()));
        }

        let mut doc = Document::new();
        doc.actor = parts.actor;
        tracing::debug!(
            changes = parts.changes.len(),
            actor = %parts.actor,
            "loading document"
        );
        for change_parts in parts.changes {
            let change = Change::from_stored(change_parts);
            if !doc.graph.deps_satisfied(&change) {
                return Err(invalid("change stored before its dependencies".into()));
            }
            doc.apply_change(change)
                .map_err(|e| invalid(e.to_string()))?;
        }
        if doc.graph.heads() != parts.heads.as_slice() {
            return Err(invalid("stored heads do not match replayed history".into()));
        }
        if doc.graph.clock().sorted_entries() != parts.clock {
            return Err(invalid("stored clock does not match replayed history".into()));
        }
        doc.next_counter = doc.next_counter.max(parts.next_counter);
        doc.local_seq = parts.local_seq;
        Ok(doc)
    }

    fn ensure_object(&self, obj: &ObjId) -> Result<(), ConcordError> {
        if self.ops.has_object(obj) {
            Ok(())
        } else {
            Err(ConcordError::InvalidObjId(*obj))
        }
    }
}
