use crate::change::Change;
use crate::document::Document;
use crate::error::ConcordError;
use crate::marks::MarkData;
use crate::op_set::OpSet;
use crate::patch::{Patch, PatchAction};
use crate::types::{ChangeHash, ElemId, Key, ObjId, ObjType, Op, OpId, OpType, Prop};
use crate::value::{ScalarValue, Value};
use smol_str::SmolStr;

/// Metadata recorded on the change a transaction commits.
#[derive(Debug, Default, Clone)]
pub struct CommitOptions {
    pub message: Option<String>,
    /// Unix timestamp in milliseconds. Defaults to 0; this library never
    /// reads wall clock time itself.
    pub timestamp: Option<i64>,
}

/// An in-progress group of operations against one document.
///
/// Operations apply to the document state immediately; on commit they are
/// packaged into a [`Change`] whose hash extends the document's heads, and
/// on rollback (explicit or by drop) the pre-transaction state is
/// restored, so a failed transaction leaves nothing behind.
pub struct Transaction<'a> {
    doc: &'a mut Document,
    inner: Option<TransactionInner>,
}

struct TransactionInner {
    start_op: u64,
    pending: Vec<Op>,
    patches: Vec<Patch>,
    /// Pre-transaction state, restored on rollback.
    snapshot: OpSet,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(doc: &'a mut Document) -> Transaction<'a> {
        let inner = TransactionInner {
            start_op: doc.next_counter,
            pending: Vec::new(),
            patches: Vec::new(),
            snapshot: doc.ops.clone(),
        };
        Transaction {
            doc,
            inner: Some(inner),
        }
    }

    // -- operations ---------------------------------------------------------

    /// Set a value at a map key or overwrite a list element.
    pub fn put<P, V>(&mut self, obj: &ObjId, prop: P, value: V) -> Result<(), ConcordError>
    where
        P: Into<Prop>,
        V: Into<ScalarValue>,
    {
        let value = value.into();
        match prop.into() {
            Prop::Map(key) => self.map_write(obj, key, OpType::Put(value)).map(|_| ()),
            Prop::Seq(index) => self.seq_write(obj, index, OpType::Put(value)).map(|_| ()),
        }
    }

    /// Create a nested object at a map key or list index, returning its id.
    pub fn put_object<P: Into<Prop>>(
        &mut self,
        obj: &ObjId,
        prop: P,
        obj_type: ObjType,
    ) -> Result<ObjId, ConcordError> {
        let id = match prop.into() {
            Prop::Map(key) => self.map_write(obj, key, OpType::Make(obj_type))?,
            Prop::Seq(index) => self.seq_write(obj, index, OpType::Make(obj_type))?,
        };
        Ok(ObjId::Id(id))
    }

    /// Delete a map key or a list element.
    pub fn delete<P: Into<Prop>>(&mut self, obj: &ObjId, prop: P) -> Result<(), ConcordError> {
        match prop.into() {
            Prop::Map(key) => {
                let key = SmolStr::new(&key);
                self.ensure_map(obj)?;
                let pred = self.doc.ops.map_pred(obj, &key);
                if pred.is_empty() {
                    return Err(ConcordError::InvalidOperation(format!(
                        "delete of missing key \"{}\"",
                        key
                    )));
                }
                let prop = Prop::Map(key.to_string());
                self.apply_local(Op {
                    id: OpId::new(0, self.doc.actor),
                    obj: *obj,
                    key: Key::Map(key),
                    action: OpType::Delete,
                    pred,
                    insert: false,
                })?;
                self.push_patch(Patch {
                    obj: *obj,
                    prop,
                    action: PatchAction::Delete { index: 0, count: 1 },
                });
                Ok(())
            }
            Prop::Seq(index) => {
                self.seq_delete(obj, index)?;
                // consecutive deletes at one index fold into one patch
                let inner = self.inner_mut();
                let mut coalesced = false;
                if let Some(Patch {
                    obj: last_obj,
                    prop: Prop::Seq(last_index),
                    action: PatchAction::Delete { count, .. },
                }) = inner.patches.last_mut()
                {
                    if last_obj == obj && *last_index == index {
                        *count += 1;
                        coalesced = true;
                    }
                }
                if !coalesced {
                    inner.patches.push(Patch {
                        obj: *obj,
                        prop: Prop::Seq(index),
                        action: PatchAction::Delete { index, count: 1 },
                    });
                }
                Ok(())
            }
        }
    }

    /// Insert a value into a list at `index`.
    pub fn insert<V: Into<ScalarValue>>(
        &mut self,
        obj: &ObjId,
        index: usize,
        value: V,
    ) -> Result<(), ConcordError> {
        let value = value.into();
        self.seq_insert(obj, index, OpType::Put(value.clone()))?;
        self.push_patch(Patch {
            obj: *obj,
            prop: Prop::Seq(index),
            action: PatchAction::Insert {
                index,
                value: Value::Scalar(value),
            },
        });
        Ok(())
    }

    /// Insert a nested object into a list at `index`, returning its id.
    pub fn insert_object(
        &mut self,
        obj: &ObjId,
        index: usize,
        obj_type: ObjType,
    ) -> Result<ObjId, ConcordError> {
        let id = self.seq_insert(obj, index, OpType::Make(obj_type))?;
        self.push_patch(Patch {
            obj: *obj,
            prop: Prop::Seq(index),
            action: PatchAction::Insert {
                index,
                value: Value::Object(obj_type),
            },
        });
        Ok(ObjId::Id(id))
    }

    /// Delete `del` characters at `pos`, then insert `text`, as
    /// character-granular operations.
    pub fn splice_text(
        &mut self,
        obj: &ObjId,
        pos: usize,
        del: usize,
        text: &str,
    ) -> Result<(), ConcordError> {
        if self.doc.ops.object_type(obj) != Some(ObjType::Text) {
            return Err(ConcordError::InvalidOperation(format!(
                "splice_text on non-text object {}",
                obj
            )));
        }
        for _ in 0..del {
            self.seq_delete(obj, pos)?;
        }
        let mut prev: Option<OpId> = None;
        for ch in text.chars() {
            let anchor = match prev {
                Some(id) => ElemId::Id(id),
                None => self
                    .doc
                    .ops
                    .insert_anchor(obj, pos)
                    .ok_or(ConcordError::InvalidIndex(pos))?,
            };
            let id = self.apply_local(Op {
                id: OpId::new(0, self.doc.actor),
                obj: *obj,
                key: Key::Seq(anchor),
                action: OpType::Put(ch.into()),
                pred: vec![],
                insert: true,
            })?;
            prev = Some(id);
        }
        if del > 0 || !text.is_empty() {
            self.push_patch(Patch {
                obj: *obj,
                prop: Prop::Seq(pos),
                action: PatchAction::SpliceText {
                    index: pos,
                    delete_count: del,
                    text: text.to_string(),
                },
            });
        }
        Ok(())
    }

    /// Add `delta` to the counter at a map key.
    pub fn increment(&mut self, obj: &ObjId, key: &str, delta: i64) -> Result<(), ConcordError> {
        self.ensure_map(obj)?;
        match self.doc.ops.map_get(obj, key) {
            Some((Value::Scalar(ScalarValue::Counter(_)), _)) => {}
            Some(_) => {
                return Err(ConcordError::InvalidOperation(format!(
                    "increment of non-counter key \"{}\"",
                    key
                )))
            }
            None => {
                return Err(ConcordError::InvalidOperation(format!(
                    "increment of missing key \"{}\"",
                    key
                )))
            }
        }
        // increments address exactly the counter entries they saw
        let pred: Vec<OpId> = self
            .doc
            .ops
            .map_get_all(obj, key)
            .into_iter()
            .filter(|(v, _)| matches!(v, Value::Scalar(ScalarValue::Counter(_))))
            .map(|(_, id)| id)
            .collect();
        self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Map(SmolStr::new(key)),
            action: OpType::Increment(delta),
            pred,
            insert: false,
        })?;
        self.push_patch(Patch {
            obj: *obj,
            prop: Prop::Map(key.to_string()),
            action: PatchAction::Increment { delta },
        });
        Ok(())
    }

    /// Apply a named mark to the range `start..end` of a text or list.
    pub fn mark<V: Into<ScalarValue>>(
        &mut self,
        obj: &ObjId,
        start: usize,
        end: usize,
        name: &str,
        value: V,
    ) -> Result<(), ConcordError> {
        self.ensure_sequence(obj)?;
        if start >= end {
            return Err(ConcordError::InvalidOperation(format!(
                "mark range {}..{} is empty",
                start, end
            )));
        }
        let start_elem = self
            .doc
            .ops
            .elem_id_at(obj, start)
            .ok_or(ConcordError::InvalidIndex(start))?;
        let end_elem = self
            .doc
            .ops
            .elem_id_at(obj, end - 1)
            .ok_or(ConcordError::InvalidIndex(end - 1))?;
        let name = SmolStr::new(name);
        self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Map(name.clone()),
            action: OpType::Mark(MarkData {
                name,
                value: value.into(),
            }),
            pred: vec![start_elem, end_elem],
            insert: false,
        })?;
        Ok(())
    }

    // -- commit and rollback ------------------------------------------------

    /// Commit the pending operations as one change, returning its hash.
    /// An empty transaction commits nothing and returns None.
    pub fn commit(mut self) -> Option<ChangeHash> {
        self.commit_impl(CommitOptions::default())
    }

    /// Commit with an optional message and timestamp.
    pub fn commit_with(mut self, options: CommitOptions) -> Option<ChangeHash> {
        self.commit_impl(options)
    }

    fn commit_impl(&mut self, options: CommitOptions) -> Option<ChangeHash> {
        let inner = self.inner.take().expect("transaction already finished");
        if inner.pending.is_empty() {
            return None;
        }
        let doc = &mut *self.doc;
        let seq = doc.local_seq + 1;
        let deps = doc.graph.heads().to_vec();
        let change = Change::new(
            doc.actor,
            seq,
            inner.start_op,
            options.timestamp.unwrap_or(0),
            options.message,
            deps,
            inner.pending,
        );
        let hash = change.hash();
        doc.local_seq = seq;
        doc.graph.add(change);
        Some(hash)
    }

    /// Discard the pending operations and restore the pre-transaction
    /// state. Returns how many operations were discarded.
    pub fn rollback(mut self) -> usize {
        self.rollback_impl()
    }

    fn rollback_impl(&mut self) -> usize {
        let Some(inner) = self.inner.take() else {
            return 0;
        };
        let discarded = inner.pending.len();
        self.doc.ops = inner.snapshot;
        self.doc.next_counter = inner.start_op;
        discarded
    }

    pub(crate) fn take_patches(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.inner_mut().patches)
    }

    // -- internals ----------------------------------------------------------

    fn inner_mut(&mut self) -> &mut TransactionInner {
        self.inner.as_mut().expect("transaction already finished")
    }

    /// Assign the next op id, apply the op to the document state and
    /// record it in the pending list. The placeholder id on `op` is
    /// replaced here.
    fn apply_local(&mut self, mut op: Op) -> Result<OpId, ConcordError> {
        let id = OpId::new(self.doc.next_counter, self.doc.actor);
        op.id = id;
        self.doc.ops.apply(&op)?;
        self.doc.next_counter += 1;
        self.inner_mut().pending.push(op);
        Ok(id)
    }

    fn push_patch(&mut self, patch: Patch) {
        self.inner_mut().patches.push(patch);
    }

    fn map_write(&mut self, obj: &ObjId, key: String, action: OpType) -> Result<OpId, ConcordError> {
        if key.is_empty() {
            return Err(ConcordError::InvalidOperation(
                "key must not be an empty string".into(),
            ));
        }
        self.ensure_map(obj)?;
        let key = SmolStr::new(&key);
        let pred = self.doc.ops.map_pred(obj, &key);
        let value = action_value(&action);
        let id = self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Map(key.clone()),
            action,
            pred,
            insert: false,
        })?;
        self.push_patch(Patch {
            obj: *obj,
            prop: Prop::Map(key.to_string()),
            action: PatchAction::Put {
                value,
                conflict: false,
            },
        });
        Ok(id)
    }

    fn seq_write(&mut self, obj: &ObjId, index: usize, action: OpType) -> Result<OpId, ConcordError> {
        self.ensure_sequence(obj)?;
        let (elem, value_id) = self
            .doc
            .ops
            .elem_pred(obj, index)
            .ok_or(ConcordError::InvalidIndex(index))?;
        let value = action_value(&action);
        let id = self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Seq(elem),
            action,
            pred: vec![value_id],
            insert: false,
        })?;
        self.push_patch(Patch {
            obj: *obj,
            prop: Prop::Seq(index),
            action: PatchAction::Put {
                value,
                conflict: false,
            },
        });
        Ok(id)
    }

    fn seq_insert(&mut self, obj: &ObjId, index: usize, action: OpType) -> Result<OpId, ConcordError> {
        self.ensure_sequence(obj)?;
        let anchor = self
            .doc
            .ops
            .insert_anchor(obj, index)
            .ok_or(ConcordError::InvalidIndex(index))?;
        self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Seq(anchor),
            action,
            pred: vec![],
            insert: true,
        })
    }

    fn seq_delete(&mut self, obj: &ObjId, index: usize) -> Result<(), ConcordError> {
        self.ensure_sequence(obj)?;
        let (elem, value_id) = self
            .doc
            .ops
            .elem_pred(obj, index)
            .ok_or(ConcordError::InvalidIndex(index))?;
        self.apply_local(Op {
            id: OpId::new(0, self.doc.actor),
            obj: *obj,
            key: Key::Seq(elem),
            action: OpType::Delete,
            pred: vec![value_id],
            insert: false,
        })?;
        Ok(())
    }

    fn ensure_map(&self, obj: &ObjId) -> Result<(), ConcordError> {
        match self.doc.ops.object_type(obj) {
            None => Err(ConcordError::InvalidObjId(*obj)),
            Some(t) if t.is_sequence() => Err(ConcordError::InvalidOperation(format!(
                "map operation on {} object {}",
                t, obj
            ))),
            Some(_) => Ok(()),
        }
    }

    fn ensure_sequence(&self, obj: &ObjId) -> Result<(), ConcordError> {
        match self.doc.ops.object_type(obj) {
            None => Err(ConcordError::InvalidObjId(*obj)),
            Some(t) if !t.is_sequence() => Err(ConcordError::InvalidOperation(format!(
                "sequence operation on {} object {}",
                t, obj
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        // an uncommitted transaction rolls back
        if self.inner.is_some() {
            self.rollback_impl();
        }
    }
}

fn action_value(action: &OpType) -> Value {
    match action {
        OpType::Put(s) => Value::Scalar(s.clone()),
        OpType::Make(t) => Value::Object(*t),
        _ => Value::Scalar(ScalarValue::Null),
    }
}
