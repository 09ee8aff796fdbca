use super::change::{self, ChangeParts, PayloadRef};
use super::parse;
use crate::change::Change;
use crate::types::{ActorId, ChangeHash};

/// Everything a document chunk body holds.
#[derive(Debug)]
pub(crate) struct DocumentParts {
    pub actor: ActorId,
    pub next_counter: u64,
    pub local_seq: u64,
    pub changes: Vec<ChangeParts>,
    pub heads: Vec<ChangeHash>,
    pub clock: Vec<(ActorId, u64)>,
}

/// The deduplicated actor table of a document: the local actor first,
/// then each change author and every actor its ops mention, in order of
/// first appearance.
fn actor_table(actor: ActorId, changes: &[Change]) -> Vec<ActorId> {
    let mut table = vec![actor];
    for change in changes {
        if !table.contains(change.actor_id()) {
            table.push(*change.actor_id());
        }
        change::note_op_actors(&change.ops, &mut table);
    }
    table
}

/// Serialize a document chunk body: actor table, the local actor's index,
/// next-counter and local seq, every change, the DAG heads and the vector
/// clock.
pub(crate) fn encode_body(
    actor: ActorId,
    next_counter: u64,
    local_seq: u64,
    changes: &[Change],
    heads: &[ChangeHash],
    clock: &[(ActorId, u64)],
) -> Vec<u8> {
    let actors = actor_table(actor, changes);
    let idx = |a: &ActorId| -> u64 {
        actors
            .iter()
            .position(|x| x == a)
            .expect("actor missing from document actor table") as u64
    };

    let mut out = Vec::new();
    leb128::write::unsigned(&mut out, actors.len() as u64).unwrap();
    for a in &actors {
        out.extend(a.to_bytes());
    }
    leb128::write::unsigned(&mut out, idx(&actor)).unwrap();
    leb128::write::unsigned(&mut out, next_counter).unwrap();
    leb128::write::unsigned(&mut out, local_seq).unwrap();

    leb128::write::unsigned(&mut out, changes.len() as u64).unwrap();
    for c in changes {
        let payload = PayloadRef {
            actor: c.actor_id(),
            seq: c.seq(),
            start_op: c.start_op(),
            timestamp: c.timestamp(),
            message: c.message().map(|m| m.as_str()),
            deps: c.deps(),
            ops: &c.ops,
        };
        change::encode_payload(payload, &actors, &mut out);
    }

    leb128::write::unsigned(&mut out, heads.len() as u64).unwrap();
    for head in heads {
        out.extend(head.as_bytes());
    }

    leb128::write::unsigned(&mut out, clock.len() as u64).unwrap();
    for (a, seq) in clock {
        leb128::write::unsigned(&mut out, idx(a)).unwrap();
        leb128::write::unsigned(&mut out, *seq).unwrap();
    }
    out
}

pub(crate) fn parse_body(input: &[u8]) -> parse::ParseResult<'_, DocumentParts> {
    let (i, actors) = parse::length_prefixed(parse::actor_id)(input)?;
    let (i, local_idx) = parse::leb128_u64(i)?;
    let actor = *actors.get(local_idx as usize).ok_or(parse::ParseError::Error(
        parse::ErrorKind::ActorIndexOutOfRange(local_idx),
    ))?;
    let (i, next_counter) = parse::leb128_u64(i)?;
    let (i, local_seq) = parse::leb128_u64(i)?;

    let (mut i, num_changes) = parse::leb128_u64(i)?;
    let mut changes = Vec::with_capacity(num_changes as usize);
    for _ in 0..num_changes {
        let (next, parts) = change::parse_payload(i, &actors)?;
        changes.push(parts);
        i = next;
    }

    let (i, heads) = parse::length_prefixed(parse::change_hash)(i)?;

    let (mut i, num_clock) = parse::leb128_u64(i)?;
    let mut clock = Vec::with_capacity(num_clock as usize);
    for _ in 0..num_clock {
        let (next, a_idx) = parse::leb128_u64(i)?;
        let a = *actors.get(a_idx as usize).ok_or(parse::ParseError::Error(
            parse::ErrorKind::ActorIndexOutOfRange(a_idx),
        ))?;
        let (next, seq) = parse::leb128_u64(next)?;
        clock.push((a, seq));
        i = next;
    }

    Ok((
        i,
        DocumentParts {
            actor,
            next_counter,
            local_seq,
            changes,
            heads,
            clock,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Key, Op, OpId, OpType};
    use crate::ScalarValue;

    fn actor(n: u8) -> ActorId {
        ActorId::from([n; 16])
    }

    fn change(actor: ActorId, seq: u64, start_op: u64, deps: Vec<ChangeHash>) -> Change {
        let ops = vec![Op {
            id: OpId::new(start_op, actor),
            obj: crate::ROOT,
            key: Key::Map("k".into()),
            action: OpType::Put(ScalarValue::Uint(seq)),
            pred: vec![],
            insert: false,
        }];
        Change::new(actor, seq, start_op, 0, None, deps, ops)
    }

    #[test]
    fn body_round_trip() {
        let local = actor(1);
        let remote = actor(2);
        let c1 = change(local, 1, 1, vec![]);
        let c2 = change(remote, 1, 2, vec![c1.hash()]);
        let heads = vec![c2.hash()];
        let clock = vec![(local, 1), (remote, 1)];

        let body = encode_body(local, 3, 1, &[c1.clone(), c2.clone()], &heads, &clock);
        let (rest, parts) = parse_body(&body).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parts.actor, local);
        assert_eq!(parts.next_counter, 3);
        assert_eq!(parts.local_seq, 1);
        assert_eq!(parts.heads, heads);
        assert_eq!(parts.clock, clock);
        assert_eq!(parts.changes.len(), 2);
        // reconstructed changes hash identically
        assert_eq!(
            Change::from_stored(parts.changes[0].clone()).hash(),
            c1.hash()
        );
        assert_eq!(
            Change::from_stored(parts.changes[1].clone()).hash(),
            c2.hash()
        );
    }

    #[test]
    fn local_actor_leads_the_table() {
        let local = actor(9);
        let remote = actor(1);
        let c1 = change(remote, 1, 1, vec![]);
        let body = encode_body(local, 2, 0, &[c1], &[], &[(remote, 1)]);
        let (_, parts) = parse_body(&body).unwrap();
        assert_eq!(parts.actor, local);
    }

    #[test]
    fn truncated_body_is_rejected() {
        let local = actor(1);
        let c1 = change(local, 1, 1, vec![]);
        let body = encode_body(local, 2, 1, &[c1], &[], &[(local, 1)]);
        for cut in [1, body.len() / 2, body.len() - 1] {
            assert!(parse_body(&body[..cut]).is_err());
        }
    }
}
