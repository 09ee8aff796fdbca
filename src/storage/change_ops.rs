//! Columnar encoding of the operations inside a change.
//!
//! Ops are stored field-wise across parallel columns. OpIds are not stored
//! at all: the i-th op of a change has id `(start_op + i, change_actor)`.

use smol_str::SmolStr;

use super::columns::{ColumnSpec, ColumnType, RawColumns, DEFLATE_THRESHOLD};
use crate::columnar::{
    BooleanDecoder, BooleanEncoder, DecodeError, DeltaDecoder, DeltaEncoder, RleDecoder,
    RleEncoder, ValueDecoder, ValueEncoder,
};
use crate::marks::MarkData;
use crate::types::{ActorId, ElemId, Key, ObjId, ObjType, Op, OpId, OpType};
use crate::value::ScalarValue;

pub(crate) const OBJ_ACTOR: ColumnSpec = ColumnSpec::new(0, ColumnType::ActorIdx);
pub(crate) const OBJ_COUNTER: ColumnSpec = ColumnSpec::new(0, ColumnType::DeltaInt);
pub(crate) const KEY_ACTOR: ColumnSpec = ColumnSpec::new(1, ColumnType::ActorIdx);
pub(crate) const KEY_COUNTER: ColumnSpec = ColumnSpec::new(1, ColumnType::DeltaInt);
pub(crate) const KEY_STRING: ColumnSpec = ColumnSpec::new(1, ColumnType::StringRle);
pub(crate) const INSERT: ColumnSpec = ColumnSpec::new(3, ColumnType::Boolean);
pub(crate) const ACTION: ColumnSpec = ColumnSpec::new(4, ColumnType::IntRle);
pub(crate) const VALUE_META: ColumnSpec = ColumnSpec::new(5, ColumnType::ValueMeta);
pub(crate) const VALUE_RAW: ColumnSpec = ColumnSpec::new(5, ColumnType::ValueRaw);
pub(crate) const PRED_GROUP: ColumnSpec = ColumnSpec::new(7, ColumnType::GroupCard);
pub(crate) const PRED_ACTOR: ColumnSpec = ColumnSpec::new(7, ColumnType::ActorIdx);
pub(crate) const PRED_COUNTER: ColumnSpec = ColumnSpec::new(7, ColumnType::DeltaInt);
pub(crate) const EXPAND: ColumnSpec = ColumnSpec::new(9, ColumnType::Boolean);
pub(crate) const MARK_NAME: ColumnSpec = ColumnSpec::new(10, ColumnType::StringRle);

#[derive(thiserror::Error, Debug)]
pub(crate) enum ReadOpsError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("actor index {0} out of range")]
    ActorIndex(u64),
    #[error("unknown action code {0}")]
    UnknownAction(u64),
    #[error("op is missing its action code")]
    MissingAction,
    #[error("leftover data in op columns")]
    LeftoverColumnData,
    #[error("op has inconsistent key columns")]
    BadKey,
    #[error("op has inconsistent object columns")]
    BadObj,
    #[error("increment op carries a non numeric value")]
    BadIncrement,
    #[error("mark op is missing its name")]
    MissingMarkName,
}

// Wire codes for object types, carried in the value column of make ops.
fn objtype_code(t: ObjType) -> u64 {
    match t {
        ObjType::Map => 0,
        ObjType::List => 1,
        ObjType::Text => 2,
        ObjType::Table => 3,
    }
}

fn objtype_from_code(code: u64) -> Option<ObjType> {
    match code {
        0 => Some(ObjType::Map),
        1 => Some(ObjType::List),
        2 => Some(ObjType::Text),
        3 => Some(ObjType::Table),
        _ => None,
    }
}

// Compact action codes: 0 make map/table, 1 put, 2 make list/text, 3 del,
// 4 increment, 5 mark.
fn action_code(action: &OpType) -> u64 {
    match action {
        OpType::Make(ObjType::Map | ObjType::Table) => 0,
        OpType::Put(_) => 1,
        OpType::Make(ObjType::List | ObjType::Text) => 2,
        OpType::Delete => 3,
        OpType::Increment(_) => 4,
        OpType::Mark(_) => 5,
    }
}

fn value_scalar(action: &OpType) -> ScalarValue {
    match action {
        OpType::Make(t) => ScalarValue::Uint(objtype_code(*t)),
        OpType::Put(s) => s.clone(),
        OpType::Delete => ScalarValue::Null,
        OpType::Increment(delta) => ScalarValue::counter(*delta),
        OpType::Mark(m) => m.value.clone(),
    }
}

/// Encode a run of operations into the op columns, compressing any column
/// body that grows past the deflate threshold.
pub(crate) fn encode_ops(ops: &[Op], actors: &[ActorId]) -> RawColumns {
    let idx = |actor: &ActorId| -> u64 {
        actors
            .iter()
            .position(|a| a == actor)
            .expect("actor missing from actor table") as u64
    };

    let mut obj_actor = RleEncoder::<u64>::new();
    let mut obj_counter = DeltaEncoder::new();
    let mut key_actor = RleEncoder::<u64>::new();
    let mut key_counter = DeltaEncoder::new();
    let mut key_string = RleEncoder::<SmolStr>::new();
    let mut insert = BooleanEncoder::new();
    let mut action = RleEncoder::<u64>::new();
    let mut value = ValueEncoder::new();
    let mut pred_group = RleEncoder::<u64>::new();
    let mut pred_actor = RleEncoder::<u64>::new();
    let mut pred_counter = DeltaEncoder::new();
    let mut expand = BooleanEncoder::new();
    let mut mark_name = RleEncoder::<SmolStr>::new();
    let mut has_marks = false;

    for op in ops {
        match op.obj {
            ObjId::Root => {
                obj_actor.append_null();
                obj_counter.append_value(0);
            }
            ObjId::Id(id) => {
                obj_actor.append_value(idx(&id.actor));
                obj_counter.append_value(id.counter as i64);
            }
        }

        match &op.key {
            Key::Map(s) => {
                key_actor.append_null();
                key_counter.append_null();
                key_string.append_value(s.clone());
            }
            Key::Seq(ElemId::Head) => {
                key_actor.append_null();
                key_counter.append_value(0);
                key_string.append_null();
            }
            Key::Seq(ElemId::Id(id)) => {
                key_actor.append_value(idx(&id.actor));
                key_counter.append_value(id.counter as i64);
                key_string.append_null();
            }
        }

        insert.append(op.insert);
        action.append_value(action_code(&op.action));
        value.append(&value_scalar(&op.action));

        pred_group.append_value(op.pred.len() as u64);
        for p in &op.pred {
            pred_actor.append_value(idx(&p.actor));
            pred_counter.append_value(p.counter as i64);
        }

        if let OpType::Mark(m) = &op.action {
            has_marks = true;
            expand.append(true);
            mark_name.append_value(m.name.clone());
        } else {
            expand.append(false);
            mark_name.append_null();
        }
    }

    let (value_meta, value_raw) = value.finish();

    let mut columns = RawColumns::default();
    columns.push(OBJ_ACTOR, obj_actor.finish());
    columns.push(OBJ_COUNTER, obj_counter.finish());
    columns.push(KEY_ACTOR, key_actor.finish());
    columns.push(KEY_COUNTER, key_counter.finish());
    columns.push(KEY_STRING, key_string.finish());
    columns.push(INSERT, insert.finish());
    columns.push(ACTION, action.finish());
    columns.push(VALUE_META, value_meta);
    columns.push(VALUE_RAW, value_raw);
    columns.push(PRED_GROUP, pred_group.finish());
    columns.push(PRED_ACTOR, pred_actor.finish());
    columns.push(PRED_COUNTER, pred_counter.finish());
    if has_marks {
        columns.push(EXPAND, expand.finish());
        columns.push(MARK_NAME, mark_name.finish());
    }
    columns.compress(DEFLATE_THRESHOLD);
    columns
}

/// Decode `num_ops` operations back out of the columns. `actors` is the
/// chunk's actor table, `actor`/`start_op` come from the change metadata.
pub(crate) fn decode_ops(
    columns: &RawColumns,
    actors: &[ActorId],
    actor: ActorId,
    start_op: u64,
    num_ops: usize,
) -> Result<Vec<Op>, ReadOpsError> {
    let lookup = |idx: u64| -> Result<ActorId, ReadOpsError> {
        actors
            .get(idx as usize)
            .copied()
            .ok_or(ReadOpsError::ActorIndex(idx))
    };

    let mut obj_actor = RleDecoder::<u64>::from(columns.get(OBJ_ACTOR));
    let mut obj_counter = DeltaDecoder::from(columns.get(OBJ_COUNTER));
    let mut key_actor = RleDecoder::<u64>::from(columns.get(KEY_ACTOR));
    let mut key_counter = DeltaDecoder::from(columns.get(KEY_COUNTER));
    let mut key_string = RleDecoder::<SmolStr>::from(columns.get(KEY_STRING));
    let mut insert = BooleanDecoder::from(columns.get(INSERT));
    let mut action = RleDecoder::<u64>::from(columns.get(ACTION));
    let mut value = ValueDecoder::new(columns.get(VALUE_META), columns.get(VALUE_RAW));
    let mut pred_group = RleDecoder::<u64>::from(columns.get(PRED_GROUP));
    let mut pred_actor = RleDecoder::<u64>::from(columns.get(PRED_ACTOR));
    let mut pred_counter = DeltaDecoder::from(columns.get(PRED_COUNTER));
    let mut expand = BooleanDecoder::from(columns.get(EXPAND));
    let mut mark_name = RleDecoder::<SmolStr>::from(columns.get(MARK_NAME));

    let mut ops = Vec::with_capacity(num_ops);
    for i in 0..num_ops {
        let obj = match (obj_actor.next()?, obj_counter.next()?) {
            (None, None) | (None, Some(0)) => ObjId::Root,
            (Some(a), Some(c)) if c > 0 => ObjId::Id(OpId::new(c as u64, lookup(a)?)),
            _ => return Err(ReadOpsError::BadObj),
        };

        let key_string_val = key_string.next()?;
        let key = match (key_string_val, key_actor.next()?, key_counter.next()?) {
            (Some(s), None, _) => Key::Map(s),
            (None, None, None) | (None, None, Some(0)) => Key::Seq(ElemId::Head),
            (None, Some(a), Some(c)) if c > 0 => {
                Key::Seq(ElemId::Id(OpId::new(c as u64, lookup(a)?)))
            }
            _ => return Err(ReadOpsError::BadKey),
        };

        let is_insert = insert.next()?;
        let code = action.next()?.ok_or(ReadOpsError::MissingAction)?;
        let scalar = value.next()?;
        let _ = expand.next()?;
        let mark_name_val = mark_name.next()?;

        let action = match code {
            0 | 2 => {
                let fallback = if code == 0 { ObjType::Map } else { ObjType::List };
                let t = match &scalar {
                    ScalarValue::Uint(n) => objtype_from_code(*n).unwrap_or(fallback),
                    _ => fallback,
                };
                OpType::Make(t)
            }
            1 => OpType::Put(scalar),
            3 => OpType::Delete,
            4 => OpType::Increment(scalar.to_i64().ok_or(ReadOpsError::BadIncrement)?),
            5 => {
                let name = match &key {
                    Key::Map(s) => s.clone(),
                    Key::Seq(_) => mark_name_val.ok_or(ReadOpsError::MissingMarkName)?,
                };
                OpType::Mark(MarkData {
                    name,
                    value: scalar,
                })
            }
            other => return Err(ReadOpsError::UnknownAction(other)),
        };

        let pred_len = pred_group.next()?.unwrap_or(0);
        let mut pred = Vec::with_capacity(pred_len as usize);
        for _ in 0..pred_len {
            let a = pred_actor.next()?.ok_or(ReadOpsError::BadKey)?;
            let c = pred_counter.next()?.ok_or(ReadOpsError::BadKey)?;
            pred.push(OpId::new(c as u64, lookup(a)?));
        }

        ops.push(Op {
            id: OpId::new(start_op + i as u64, actor),
            obj,
            key,
            action,
            pred,
            insert: is_insert,
        });
    }
    // every column group must be consumed exactly by num_ops rows
    let obj_done = obj_actor.done() && obj_counter.done();
    let key_done = key_actor.done() && key_counter.done() && key_string.done();
    let pred_done = pred_group.done() && pred_actor.done() && pred_counter.done();
    let mark_done = expand.done() && mark_name.done();
    if !(obj_done && key_done && insert.done() && action.done() && value.done() && pred_done && mark_done)
    {
        return Err(ReadOpsError::LeftoverColumnData);
    }
    Ok(ops)
}
