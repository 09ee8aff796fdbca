use super::change_ops;
use super::columns::RawColumns;
use super::parse;
use crate::types::{ActorId, ChangeHash, ElemId, Key, ObjId, Op};

/// The fields of a change as they appear in storage, before hashing.
#[derive(Debug, Clone)]
pub(crate) struct ChangeParts {
    pub actor: ActorId,
    pub seq: u64,
    pub start_op: u64,
    pub timestamp: i64,
    pub message: Option<String>,
    pub deps: Vec<ChangeHash>,
    pub ops: Vec<Op>,
}

/// A borrowed view of the fields of the per-change payload.
#[derive(Clone, Copy)]
pub(crate) struct PayloadRef<'a> {
    pub actor: &'a ActorId,
    pub seq: u64,
    pub start_op: u64,
    pub timestamp: i64,
    pub message: Option<&'a str>,
    pub deps: &'a [ChangeHash],
    pub ops: &'a [Op],
}

impl<'a> From<&'a ChangeParts> for PayloadRef<'a> {
    fn from(p: &'a ChangeParts) -> Self {
        PayloadRef {
            actor: &p.actor,
            seq: p.seq,
            start_op: p.start_op,
            timestamp: p.timestamp,
            message: p.message.as_deref(),
            deps: &p.deps,
            ops: &p.ops,
        }
    }
}

/// Every actor a payload's ops mention: the author first, then foreign
/// actors in order of first appearance (object ids, then keys, then
/// predecessors, per op). The writer and the reader derive the same table,
/// so indices agree.
pub(crate) fn note_op_actors(ops: &[Op], table: &mut Vec<ActorId>) {
    let mut note = |actor: &ActorId, table: &mut Vec<ActorId>| {
        if !table.contains(actor) {
            table.push(*actor);
        }
    };
    for op in ops {
        note(&op.id.actor, table);
        if let ObjId::Id(id) = &op.obj {
            note(&id.actor, table);
        }
        if let Key::Seq(ElemId::Id(id)) = &op.key {
            note(&id.actor, table);
        }
        for p in &op.pred {
            note(&p.actor, table);
        }
    }
}

fn chunk_actor_table(parts: &ChangeParts) -> Vec<ActorId> {
    let mut table = vec![parts.actor];
    note_op_actors(&parts.ops, &mut table);
    table
}

/// Serialize a change body which can travel alone: its own actor table
/// followed by the per-change payload.
pub(crate) fn encode_chunk_body(parts: &ChangeParts) -> Vec<u8> {
    let actors = chunk_actor_table(parts);
    let mut out = Vec::new();
    leb128::write::unsigned(&mut out, actors.len() as u64).unwrap();
    for actor in &actors {
        out.extend(actor.to_bytes());
    }
    encode_payload(parts.into(), &actors, &mut out);
    out
}

pub(crate) fn parse_chunk_body(input: &[u8]) -> parse::ParseResult<'_, ChangeParts> {
    let (i, actors) = parse::length_prefixed(parse::actor_id)(input)?;
    parse_payload(i, &actors)
}

/// Serialize the per-change payload against an externally supplied actor
/// table: actor index, seq, start_op, timestamp, optional message,
/// dependency hashes, op count and the op columns.
pub(crate) fn encode_payload(p: PayloadRef<'_>, actors: &[ActorId], out: &mut Vec<u8>) {
    let actor_idx = actors
        .iter()
        .position(|a| a == p.actor)
        .expect("change author missing from actor table");
    leb128::write::unsigned(out, actor_idx as u64).unwrap();
    leb128::write::unsigned(out, p.seq).unwrap();
    leb128::write::unsigned(out, p.start_op).unwrap();
    leb128::write::signed(out, p.timestamp).unwrap();
    let message = p.message.unwrap_or("");
    leb128::write::unsigned(out, message.len() as u64).unwrap();
    out.extend(message.as_bytes());
    leb128::write::unsigned(out, p.deps.len() as u64).unwrap();
    for dep in p.deps {
        out.extend(dep.as_bytes());
    }
    leb128::write::unsigned(out, p.ops.len() as u64).unwrap();
    change_ops::encode_ops(p.ops, actors).write(out);
}

pub(crate) fn parse_payload<'a>(
    input: &'a [u8],
    actors: &[ActorId],
) -> parse::ParseResult<'a, ChangeParts> {
    let (i, actor_idx) = parse::leb128_u64(input)?;
    let actor = *actors.get(actor_idx as usize).ok_or(parse::ParseError::Error(
        parse::ErrorKind::ActorIndexOutOfRange(actor_idx),
    ))?;
    let (i, seq) = parse::leb128_u64(i)?;
    let (i, start_op) = parse::leb128_u64(i)?;
    let (i, timestamp) = parse::leb128_i64(i)?;
    let (i, message_len) = parse::leb128_u64(i)?;
    let (i, message) = parse::utf_8(message_len as usize, i)?;
    let (i, deps) = parse::length_prefixed(parse::change_hash)(i)?;
    let (i, num_ops) = parse::leb128_u64(i)?;
    let (i, mut columns) = RawColumns::parse(i)?;
    columns.decompress()?;
    let ops = change_ops::decode_ops(&columns, actors, actor, start_op, num_ops as usize)
        .map_err(|e| parse::ParseError::Error(parse::ErrorKind::InvalidColumns(e.to_string())))?;
    Ok((
        i,
        ChangeParts {
            actor,
            seq,
            start_op,
            timestamp,
            message: if message.is_empty() {
                None
            } else {
                Some(message)
            },
            deps,
            ops,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjType, OpId, OpType};
    use crate::ScalarValue;

    fn sample_parts() -> ChangeParts {
        let a = ActorId::from([1; 16]);
        let b = ActorId::from([9; 16]);
        ChangeParts {
            actor: a,
            seq: 3,
            start_op: 17,
            timestamp: -42,
            message: Some("fix typo".to_string()),
            deps: vec![ChangeHash([5; 32]), ChangeHash([6; 32])],
            ops: vec![
                Op {
                    id: OpId::new(17, a),
                    obj: ObjId::Root,
                    key: Key::Map("x".into()),
                    action: OpType::Put(ScalarValue::Int(1)),
                    pred: vec![OpId::new(2, b)],
                    insert: false,
                },
                Op {
                    id: OpId::new(18, a),
                    obj: ObjId::Root,
                    key: Key::Map("y".into()),
                    action: OpType::Make(ObjType::Text),
                    pred: vec![],
                    insert: false,
                },
            ],
        }
    }

    #[test]
    fn chunk_body_round_trip() {
        let parts = sample_parts();
        let body = encode_chunk_body(&parts);
        let (rest, parsed) = parse_chunk_body(&body).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.actor, parts.actor);
        assert_eq!(parsed.seq, parts.seq);
        assert_eq!(parsed.start_op, parts.start_op);
        assert_eq!(parsed.timestamp, parts.timestamp);
        assert_eq!(parsed.message, parts.message);
        assert_eq!(parsed.deps, parts.deps);
        assert_eq!(parsed.ops, parts.ops);
    }

    #[test]
    fn author_comes_first_in_actor_table() {
        let parts = sample_parts();
        let table = chunk_actor_table(&parts);
        assert_eq!(table[0], parts.actor);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn payloads_concatenate_cleanly() {
        let parts = sample_parts();
        let actors = chunk_actor_table(&parts);
        let mut out = Vec::new();
        encode_payload((&parts).into(), &actors, &mut out);
        encode_payload((&parts).into(), &actors, &mut out);
        let (rest, first) = parse_payload(&out, &actors).unwrap();
        let (rest, second) = parse_payload(rest, &actors).unwrap();
        assert!(rest.is_empty());
        assert_eq!(first.ops, parts.ops);
        assert_eq!(second.ops, parts.ops);
    }

    #[test]
    fn out_of_range_actor_index_is_rejected() {
        let parts = sample_parts();
        let actors = chunk_actor_table(&parts);
        let mut out = Vec::new();
        encode_payload((&parts).into(), &actors, &mut out);
        assert!(parse_payload(&out, &actors).is_ok());
        // a table missing the referenced actors cannot resolve the indices
        assert!(parse_payload(&out, &actors[..1]).is_err());
        assert!(parse_payload(&out, &[]).is_err());
    }
}
