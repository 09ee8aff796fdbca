use crate::error::ConcordError;
use crate::marks::Mark;
use crate::types::{ElemId, Key, ObjId, ObjType, Op, OpId, OpType, Prop};
use crate::value::{ScalarValue, Value};
use fxhash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// An entry at a map key. Multiple entries at one key are the conflict
/// set left by concurrent writes; the winner is the entry with the
/// greatest op id.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MapEntry {
    pub id: OpId,
    pub value: Value,
}

/// An element of a list or text object. Deleted elements stay in the
/// array as tombstones so that RGA anchors keep resolving.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListElement {
    pub insert_id: OpId,
    /// The op which set the current value; concurrent overwrites of one
    /// element resolve by op id through this field.
    pub value_id: OpId,
    pub value: Value,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MarkRecord {
    pub id: OpId,
    pub start: OpId,
    /// Inclusive end element.
    pub end: OpId,
    pub name: SmolStr,
    pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjectState {
    pub obj_type: ObjType,
    pub map: BTreeMap<SmolStr, Vec<MapEntry>>,
    pub elements: Vec<ListElement>,
    pub marks: Vec<MarkRecord>,
}

impl ObjectState {
    fn new(obj_type: ObjType) -> Self {
        ObjectState {
            obj_type,
            map: BTreeMap::new(),
            elements: Vec::new(),
            marks: Vec::new(),
        }
    }

    fn is_sequence(&self) -> bool {
        self.obj_type.is_sequence()
    }
}

/// The op log plus the object states derived from it.
#[derive(Debug, Clone)]
pub(crate) struct OpSet {
    objects: FxHashMap<ObjId, ObjectState>,
    pub(crate) log: Vec<Op>,
    applied: FxHashSet<OpId>,
}

impl Default for OpSet {
    fn default() -> Self {
        let mut objects = FxHashMap::default();
        objects.insert(ObjId::Root, ObjectState::new(ObjType::Map));
        OpSet {
            objects,
            log: Vec::new(),
            applied: FxHashSet::default(),
        }
    }
}

impl OpSet {
    pub fn new() -> Self {
        Default::default()
    }

    fn object(&self, id: &ObjId) -> Option<&ObjectState> {
        self.objects.get(id)
    }

    pub fn object_type(&self, id: &ObjId) -> Option<ObjType> {
        self.object(id).map(|o| o.obj_type)
    }

    pub fn has_object(&self, id: &ObjId) -> bool {
        self.objects.contains_key(id)
    }

    /// Apply one operation. Re-applying an op that has already been seen
    /// is a no-op, which makes replay and merge idempotent.
    pub fn apply(&mut self, op: &Op) -> Result<(), ConcordError> {
        if self.applied.contains(&op.id) {
            return Ok(());
        }
        if let OpType::Make(t) = &op.action {
            self.objects.insert(ObjId::Id(op.id), ObjectState::new(*t));
        }
        let state = self
            .objects
            .get_mut(&op.obj)
            .ok_or(ConcordError::InvalidObjId(op.obj))?;

        if op.insert {
            if !state.is_sequence() {
                return Err(ConcordError::InvalidOperation(format!(
                    "insert into non-sequence object {}",
                    op.obj
                )));
            }
            let anchor = op.key.elemid().ok_or_else(|| {
                ConcordError::InvalidOperation("insert op without an element key".into())
            })?;
            let value = op_value(op)?;
            let pos = rga_insert_position(&state.elements, anchor, op.id)?;
            state.elements.insert(
                pos,
                ListElement {
                    insert_id: op.id,
                    value_id: op.id,
                    value,
                    visible: true,
                },
            );
        } else {
            match &op.action {
                OpType::Put(_) | OpType::Make(_) => match &op.key {
                    Key::Map(key) => {
                        if state.is_sequence() {
                            return Err(ConcordError::InvalidOperation(format!(
                                "map write on sequence object {}",
                                op.obj
                            )));
                        }
                        let value = op_value(op)?;
                        let entries = state.map.entry(key.clone()).or_default();
                        entries.retain(|e| !op.pred.contains(&e.id));
                        let pos = entries
                            .binary_search_by(|e| e.id.cmp(&op.id))
                            .unwrap_or_else(|p| p);
                        entries.insert(pos, MapEntry { id: op.id, value });
                    }
                    Key::Seq(elem) => {
                        let ElemId::Id(target) = elem else {
                            return Err(ConcordError::InvalidOperation(
                                "sequence overwrite targeting the head".into(),
                            ));
                        };
                        let value = op_value(op)?;
                        let el = state
                            .elements
                            .iter_mut()
                            .find(|e| e.insert_id == *target)
                            .ok_or_else(|| {
                                ConcordError::InvalidOperation(format!(
                                    "sequence overwrite of unknown element {}",
                                    target
                                ))
                            })?;
                        // concurrent overwrites: greatest op id wins
                        if op.id > el.value_id {
                            el.value = value;
                            el.value_id = op.id;
                        }
                    }
                },
                OpType::Delete => match &op.key {
                    Key::Map(key) => {
                        if let Some(entries) = state.map.get_mut(key) {
                            entries.retain(|e| !op.pred.contains(&e.id));
                            if entries.is_empty() {
                                state.map.remove(key);
                            }
                        }
                    }
                    Key::Seq(_) => {
                        // the element is named by the first predecessor;
                        // a delete with no pred cannot be resolved
                        let target = op.pred.first().ok_or_else(|| {
                            ConcordError::InvalidOperation(
                                "sequence delete without a predecessor".into(),
                            )
                        })?;
                        let el = state
                            .elements
                            .iter_mut()
                            .find(|e| e.value_id == *target || e.insert_id == *target)
                            .ok_or_else(|| {
                                ConcordError::InvalidOperation(format!(
                                    "sequence delete of unknown element {}",
                                    target
                                ))
                            })?;
                        el.visible = false;
                    }
                },
                OpType::Increment(delta) => {
                    let Key::Map(key) = &op.key else {
                        return Err(ConcordError::InvalidOperation(
                            "increment on a sequence element".into(),
                        ));
                    };
                    if let Some(entries) = state.map.get_mut(key) {
                        for e in entries.iter_mut().filter(|e| op.pred.contains(&e.id)) {
                            match &mut e.value {
                                Value::Scalar(ScalarValue::Counter(c)) => {
                                    c.current += delta;
                                    c.increments += 1;
                                }
                                _ => {
                                    return Err(ConcordError::InvalidOperation(format!(
                                        "increment of non-counter value at \"{}\"",
                                        key
                                    )))
                                }
                            }
                        }
                    }
                }
                OpType::Mark(m) => {
                    if !state.is_sequence() {
                        return Err(ConcordError::InvalidOperation(format!(
                            "mark on non-sequence object {}",
                            op.obj
                        )));
                    }
                    let (Some(start), Some(end)) = (op.pred.first(), op.pred.get(1)) else {
                        return Err(ConcordError::InvalidOperation(
                            "mark op without start and end anchors".into(),
                        ));
                    };
                    state.marks.push(MarkRecord {
                        id: op.id,
                        start: *start,
                        end: *end,
                        name: m.name.clone(),
                        value: m.value.clone(),
                    });
                }
            }
        }

        self.applied.insert(op.id);
        self.log.push(op.clone());
        Ok(())
    }

    // -- map reads ----------------------------------------------------------

    pub fn map_get(&self, obj: &ObjId, key: &str) -> Option<(Value, OpId)> {
        let entries = self.object(obj)?.map.get(key)?;
        // entries are sorted by id, so the winner is the last
        entries.last().map(|e| (e.value.clone(), e.id))
    }

    pub fn map_get_all(&self, obj: &ObjId, key: &str) -> Vec<(Value, OpId)> {
        self.object(obj)
            .and_then(|o| o.map.get(key))
            .map(|entries| entries.iter().map(|e| (e.value.clone(), e.id)).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self, obj: &ObjId) -> Vec<String> {
        self.object(obj)
            .map(|o| o.map.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default()
    }

    // -- sequence reads -----------------------------------------------------

    pub fn seq_get(&self, obj: &ObjId, index: usize) -> Option<(Value, OpId)> {
        self.visible_elem(obj, index)
            .map(|e| (e.value.clone(), e.value_id))
    }

    fn visible_elem(&self, obj: &ObjId, index: usize) -> Option<&ListElement> {
        self.object(obj)?
            .elements
            .iter()
            .filter(|e| e.visible)
            .nth(index)
    }

    pub fn values(&self, obj: &ObjId) -> Vec<(Value, OpId)> {
        let Some(state) = self.object(obj) else {
            return Vec::new();
        };
        if state.is_sequence() {
            state
                .elements
                .iter()
                .filter(|e| e.visible)
                .map(|e| (e.value.clone(), e.value_id))
                .collect()
        } else {
            state
                .map
                .values()
                .filter_map(|entries| entries.last())
                .map(|e| (e.value.clone(), e.id))
                .collect()
        }
    }

    pub fn length(&self, obj: &ObjId) -> usize {
        let Some(state) = self.object(obj) else {
            return 0;
        };
        if state.is_sequence() {
            state.elements.iter().filter(|e| e.visible).count()
        } else {
            state.map.len()
        }
    }

    pub fn text(&self, obj: &ObjId) -> String {
        let Some(state) = self.object(obj) else {
            return String::new();
        };
        let mut out = String::new();
        for e in state.elements.iter().filter(|e| e.visible) {
            if let Value::Scalar(ScalarValue::Str(s)) = &e.value {
                out.push_str(s);
            }
        }
        out
    }

    // -- cursor and mark support --------------------------------------------

    /// The insert id of the element at a visible index.
    pub fn elem_id_at(&self, obj: &ObjId, index: usize) -> Option<OpId> {
        self.visible_elem(obj, index).map(|e| e.insert_id)
    }

    /// The visible index of the element created by `elem`, or None if it
    /// has been tombstoned.
    pub fn visible_index_of(&self, obj: &ObjId, elem: OpId) -> Option<usize> {
        let state = self.object(obj)?;
        let mut visible = 0;
        for e in &state.elements {
            if e.insert_id == elem {
                return e.visible.then_some(visible);
            }
            if e.visible {
                visible += 1;
            }
        }
        None
    }

    /// All marks on `obj`, projected to current visible indices and
    /// ordered by mark op id.
    pub fn marks(&self, obj: &ObjId) -> Vec<Mark> {
        let Some(state) = self.object(obj) else {
            return Vec::new();
        };
        let mut records: Vec<&MarkRecord> = state.marks.iter().collect();
        records.sort_by_key(|r| r.id);
        records
            .iter()
            .filter_map(|r| {
                let start = self.position_before(state, r.start)?;
                let end_start = self.position_before(state, r.end)?;
                let end_visible = state
                    .elements
                    .iter()
                    .find(|e| e.insert_id == r.end)
                    .map(|e| e.visible)
                    .unwrap_or(false);
                Some(Mark {
                    start,
                    end: end_start + usize::from(end_visible),
                    name: r.name.clone(),
                    value: r.value.clone(),
                })
            })
            .collect()
    }

    // Count of visible elements strictly before `elem` in the array.
    fn position_before(&self, state: &ObjectState, elem: OpId) -> Option<usize> {
        let mut visible = 0;
        for e in &state.elements {
            if e.insert_id == elem {
                return Some(visible);
            }
            if e.visible {
                visible += 1;
            }
        }
        None
    }

    // -- transaction support ------------------------------------------------

    /// The ids of the current entries at a map key, in id order. These
    /// become the `pred` of an op overwriting or deleting the key.
    pub fn map_pred(&self, obj: &ObjId, key: &str) -> Vec<OpId> {
        self.object(obj)
            .and_then(|o| o.map.get(key))
            .map(|entries| entries.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    /// The element and current-value ids at a visible index, used to
    /// address sequence overwrites and deletes.
    pub fn elem_pred(&self, obj: &ObjId, index: usize) -> Option<(ElemId, OpId)> {
        self.visible_elem(obj, index)
            .map(|e| (ElemId::Id(e.insert_id), e.value_id))
    }

    /// The anchor for inserting at a visible index: the head for index 0,
    /// otherwise the element currently at `index - 1`. None when the
    /// index is past the end of the sequence.
    pub fn insert_anchor(&self, obj: &ObjId, index: usize) -> Option<ElemId> {
        if index == 0 {
            Some(ElemId::Head)
        } else {
            self.visible_elem(obj, index - 1)
                .map(|e| ElemId::Id(e.insert_id))
        }
    }

    pub fn get(&self, obj: &ObjId, prop: &Prop) -> Option<(Value, OpId)> {
        match prop {
            Prop::Map(key) => self.map_get(obj, key),
            Prop::Seq(index) => self.seq_get(obj, *index),
        }
    }
}

/// RGA integration: insert after the anchor, skipping over any elements
/// with a greater insert id. Concurrent inserts sharing an anchor
/// therefore order greatest-id first, and an element's subtree stays
/// attached to it (descendants always carry higher counters than their
/// parent, hence higher ids than any concurrent sibling's).
fn rga_insert_position(
    elements: &[ListElement],
    anchor: ElemId,
    id: OpId,
) -> Result<usize, ConcordError> {
    let mut idx = match anchor {
        ElemId::Head => 0,
        ElemId::Id(a) => {
            elements
                .iter()
                .position(|e| e.insert_id == a)
                .ok_or_else(|| {
                    ConcordError::InvalidOperation(format!("insert anchor {} not present", a))
                })?
                + 1
        }
    };
    while idx < elements.len() && elements[idx].insert_id > id {
        idx += 1;
    }
    Ok(idx)
}

fn op_value(op: &Op) -> Result<Value, ConcordError> {
    match &op.action {
        OpType::Put(s) => Ok(Value::Scalar(s.clone())),
        OpType::Make(t) => Ok(Value::Object(*t)),
        _ => Err(ConcordError::InvalidOperation(format!(
            "op {} does not carry a value",
            op.id
        ))),
    }
}
