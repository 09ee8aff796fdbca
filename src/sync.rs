//! The two-peer sync protocol.
//!
//! Each peer keeps a per-remote [`State`] and alternates
//! [`Document::generate_sync_message`] / [`Document::receive_sync_message`]
//! calls over an opaque transport. A message advertises the sender's heads,
//! explicitly requests hashes it knows it is missing, and summarises what
//! it already has with Bloom filters, so that after a bounded number of
//! rounds both peers hold the same history and fall silent.

use itertools::Itertools;
use std::collections::{HashMap, HashSet};

use crate::change::LoadChangeError;
use crate::storage::parse;
use crate::{Change, ChangeHash, ConcordError, Document};

mod bloom;
mod state;

pub use bloom::BloomFilter;
pub use state::{DecodeStateError, Have, State};

const MESSAGE_TYPE_SYNC: u8 = 0x42; // first byte of a sync message, for identification

impl Document {
    /// Produce the next message for the peer tracked by `sync_state`, or
    /// None when both sides are known to be in sync and nothing is owed.
    pub fn generate_sync_message(&self, sync_state: &mut State) -> Option<Message> {
        let our_heads = self.get_heads();

        let our_need =
            self.get_missing_deps(sync_state.their_heads.as_deref().unwrap_or(&[]));

        let their_heads_set: HashSet<&ChangeHash> = sync_state
            .their_heads
            .as_ref()
            .map(|heads| heads.iter().collect())
            .unwrap_or_default();
        // only summarise what we have when every needed hash is already
        // advertised by the peer; otherwise we first have to fetch
        let our_have = if our_need.iter().all(|hash| their_heads_set.contains(hash)) {
            vec![self.make_bloom_filter(sync_state.shared_heads.clone())]
        } else {
            Vec::new()
        };

        if let Some(their_have) = sync_state.their_have.as_ref() {
            if let Some(first_have) = their_have.first() {
                // the peer's last_sync references changes we do not have:
                // answer with an empty Have to force a full resync
                if !first_have
                    .last_sync
                    .iter()
                    .all(|hash| self.get_change_by_hash(hash).is_some())
                {
                    tracing::debug!("peer last_sync unknown to us, requesting reset");
                    return Some(Message {
                        heads: our_heads,
                        need: Vec::new(),
                        have: vec![Have::default()],
                        changes: Vec::new(),
                    });
                }
            }
        }

        let changes_to_send = if let (Some(their_have), Some(their_need)) = (
            sync_state.their_have.as_ref(),
            sync_state.their_need.as_ref(),
        ) {
            self.get_changes_to_send(their_have, their_need)
        } else {
            Vec::new()
        };

        let heads_unchanged = sync_state.last_sent_heads == our_heads;
        let heads_equal = sync_state.their_heads.as_ref() == Some(&our_heads);

        if heads_unchanged && sync_state.have_responded {
            if heads_equal && changes_to_send.is_empty() {
                return None;
            }
            if sync_state.in_flight {
                return None;
            }
        }

        // deduplicate against everything already shipped this session
        let changes_to_send: Vec<Change> = changes_to_send
            .into_iter()
            .filter(|change| !sync_state.sent_hashes.contains(&change.hash()))
            .cloned()
            .collect();

        sync_state.have_responded = true;
        sync_state.last_sent_heads = our_heads.clone();
        sync_state.in_flight = true;
        sync_state
            .sent_hashes
            .extend(changes_to_send.iter().map(|c| c.hash()));

        tracing::trace!(
            heads = our_heads.len(),
            need = our_need.len(),
            changes = changes_to_send.len(),
            "generated sync message"
        );
        Some(Message {
            heads: our_heads,
            need: our_need,
            have: our_have,
            changes: changes_to_send,
        })
    }

    /// Apply a message received from the peer tracked by `sync_state`.
    /// Changes with missing dependencies are buffered; unknown heads are
    /// remembered and drive the next [`Document::generate_sync_message`].
    pub fn receive_sync_message(
        &mut self,
        sync_state: &mut State,
        message: Message,
    ) -> Result<(), ConcordError> {
        sync_state.in_flight = false;

        let before_heads = self.get_heads();
        let Message {
            heads: message_heads,
            need: message_need,
            have: message_have,
            changes: message_changes,
        } = message;

        let changes_is_empty = message_changes.is_empty();
        if !changes_is_empty {
            tracing::trace!(changes = message_changes.len(), "received changes");
            self.apply_changes(message_changes)?;
            sync_state.shared_heads = advance_heads(
                &before_heads.iter().collect(),
                &self.get_heads().into_iter().collect(),
                &sync_state.shared_heads,
            );
        }

        // trim sent_hashes down to what the peer has not yet acknowledged
        let known_heads: Vec<ChangeHash> = message_heads
            .iter()
            .filter(|head| self.get_change_by_hash(head).is_some())
            .copied()
            .collect();
        let acknowledged = self.graph.ancestors(&known_heads);
        sync_state.sent_hashes.retain(|h| !acknowledged.contains(h));

        if changes_is_empty && message_heads == before_heads {
            sync_state.last_sent_heads = message_heads.clone();
        }

        if known_heads.len() == message_heads.len() {
            sync_state.shared_heads = message_heads.clone();
            // the peer has lost all its data: reset to a full resync
            if message_heads.is_empty() {
                sync_state.last_sent_heads = Default::default();
                sync_state.sent_hashes = Default::default();
            }
        } else {
            sync_state.shared_heads = sync_state
                .shared_heads
                .iter()
                .chain(known_heads.iter())
                .copied()
                .unique()
                .sorted()
                .collect::<Vec<_>>();
        }

        sync_state.their_have = Some(message_have);
        sync_state.their_heads = Some(message_heads);
        sync_state.their_need = Some(message_need);

        Ok(())
    }

    fn make_bloom_filter(&self, last_sync: Vec<ChangeHash>) -> Have {
        let hashes: Vec<ChangeHash> = self
            .get_changes_since(&last_sync)
            .iter()
            .map(|change| change.hash())
            .collect();
        Have {
            last_sync,
            bloom: BloomFilter::from_hashes(hashes.into_iter()),
        }
    }

    fn get_changes_to_send(&self, have: &[Have], need: &[ChangeHash]) -> Vec<&Change> {
        if have.is_empty() {
            return need
                .iter()
                .filter_map(|hash| self.get_change_by_hash(hash))
                .collect();
        }

        let mut last_sync_hashes = HashSet::new();
        let mut bloom_filters = Vec::with_capacity(have.len());
        for h in have {
            last_sync_hashes.extend(h.last_sync.iter());
            bloom_filters.push(&h.bloom);
        }
        let last_sync_hashes: Vec<ChangeHash> = last_sync_hashes.into_iter().copied().collect();

        let changes = self.get_changes_since(&last_sync_hashes);

        let mut change_hashes = HashSet::with_capacity(changes.len());
        let mut dependents: HashMap<ChangeHash, Vec<ChangeHash>> = HashMap::new();
        let mut hashes_to_send = HashSet::new();

        for change in &changes {
            change_hashes.insert(change.hash());
            for dep in change.deps() {
                dependents.entry(*dep).or_default().push(change.hash());
            }
            // not in any of their filters: they are missing it (modulo the
            // false positive rate, which the next round repairs)
            if bloom_filters
                .iter()
                .all(|bloom| !bloom.contains_hash(&change.hash()))
            {
                hashes_to_send.insert(change.hash());
            }
        }

        // a receiver must never see a change before its parents, so close
        // the set under descendants
        let mut stack: Vec<ChangeHash> = hashes_to_send.iter().copied().collect();
        while let Some(hash) = stack.pop() {
            if let Some(deps) = dependents.get(&hash) {
                for dep in deps {
                    if hashes_to_send.insert(*dep) {
                        stack.push(*dep);
                    }
                }
            }
        }

        let mut changes_to_send = Vec::new();
        for hash in need {
            hashes_to_send.insert(*hash);
            if !change_hashes.contains(hash) {
                if let Some(change) = self.get_change_by_hash(hash) {
                    changes_to_send.push(change);
                }
            }
        }
        for change in changes {
            if hashes_to_send.contains(&change.hash()) {
                changes_to_send.push(change);
            }
        }
        changes_to_send
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadMessageError {
    #[error("expected {expected} but found {found}")]
    WrongType { expected: u8, found: u8 },
    #[error("{0}")]
    Parse(String),
    #[error("not enough input")]
    NotEnoughInput,
}

impl From<parse::ErrorKind> for ReadMessageError {
    fn from(e: parse::ErrorKind) -> Self {
        ReadMessageError::Parse(e.to_string())
    }
}

impl From<LoadChangeError> for ReadMessageError {
    fn from(e: LoadChangeError) -> Self {
        ReadMessageError::Parse(e.to_string())
    }
}

impl From<parse::ParseError<ReadMessageError>> for ReadMessageError {
    fn from(p: parse::ParseError<ReadMessageError>) -> Self {
        match p {
            parse::ParseError::Error(e) => e,
            parse::ParseError::Incomplete(..) => Self::NotEnoughInput,
        }
    }
}

impl From<ReadMessageError> for ConcordError {
    fn from(e: ReadMessageError) -> Self {
        ConcordError::Sync(e.to_string())
    }
}

/// The sync message exchanged between two peers.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The sender's current DAG heads.
    pub heads: Vec<ChangeHash>,
    /// Hashes the sender explicitly requests from the recipient.
    pub need: Vec<ChangeHash>,
    /// Summaries of what the sender already has.
    pub have: Vec<Have>,
    /// Changes for the recipient to apply, as complete change chunks.
    pub changes: Vec<Change>,
}

fn parse_have(input: &[u8]) -> parse::ParseResult<'_, Have, ReadMessageError> {
    let (i, last_sync) = parse::length_prefixed(parse::change_hash)(input)?;
    let (i, bloom_bytes) = parse::length_prefixed_bytes(i)?;
    let bloom = BloomFilter::try_from(bloom_bytes)
        .map_err(|e| parse::ParseError::Error(ReadMessageError::Parse(e.to_string())))?;
    Ok((i, Have { last_sync, bloom }))
}

impl Message {
    pub fn decode(input: &[u8]) -> Result<Self, ReadMessageError> {
        let (i, message_type) = parse::take1::<ReadMessageError>(input)?;
        if message_type != MESSAGE_TYPE_SYNC {
            return Err(ReadMessageError::WrongType {
                expected: MESSAGE_TYPE_SYNC,
                found: message_type,
            });
        }

        let (i, heads) = parse::length_prefixed(parse::change_hash)(i)?;
        let (i, need) = parse::length_prefixed(parse::change_hash)(i)?;
        let (i, have) = parse::length_prefixed(parse_have)(i)?;

        let change_parser = |i| {
            let (i, bytes) = parse::length_prefixed_bytes::<ReadMessageError>(i)?;
            let change =
                Change::try_from(bytes).map_err(|e| parse::ParseError::Error(e.into()))?;
            Ok((i, change))
        };
        let (i, changes) = parse::length_prefixed(change_parser)(i)?;
        if !i.is_empty() {
            return Err(ReadMessageError::Parse(
                "leftover data after sync message".to_string(),
            ));
        }

        Ok(Message {
            heads,
            need,
            have,
            changes,
        })
    }

    pub fn encode(self) -> Vec<u8> {
        let mut buf = vec![MESSAGE_TYPE_SYNC];

        encode_hashes(&mut buf, &self.heads);
        encode_hashes(&mut buf, &self.need);
        encode_many(&mut buf, self.have.iter(), |buf, h| {
            encode_hashes(buf, &h.last_sync);
            let bloom = h.bloom.to_bytes();
            leb128::write::unsigned(buf, bloom.len() as u64).unwrap();
            buf.extend(bloom);
        });

        encode_many(&mut buf, self.changes.iter(), |buf, change| {
            let bytes = change.raw_bytes();
            leb128::write::unsigned(buf, bytes.len() as u64).unwrap();
            buf.extend(bytes);
        });

        buf
    }
}

fn encode_many<'a, I, It, F>(out: &mut Vec<u8>, data: I, f: F)
where
    I: Iterator<Item = It> + ExactSizeIterator + 'a,
    F: Fn(&mut Vec<u8>, It),
{
    leb128::write::unsigned(out, data.len() as u64).unwrap();
    for datum in data {
        f(out, datum)
    }
}

fn encode_hashes(buf: &mut Vec<u8>, hashes: &[ChangeHash]) {
    debug_assert!(
        hashes.windows(2).all(|h| h[0] <= h[1]),
        "hashes were not sorted"
    );
    encode_many(buf, hashes.iter(), |buf, hash| buf.extend(hash.as_bytes()))
}

fn advance_heads(
    my_old_heads: &HashSet<&ChangeHash>,
    my_new_heads: &HashSet<ChangeHash>,
    our_old_shared_heads: &[ChangeHash],
) -> Vec<ChangeHash> {
    let new_heads = my_new_heads
        .iter()
        .filter(|head| !my_old_heads.contains(head))
        .copied();

    let common_heads = our_old_shared_heads
        .iter()
        .filter(|head| my_new_heads.contains(head))
        .copied();

    let mut advanced_heads: Vec<ChangeHash> = new_heads.chain(common_heads).unique().collect();
    advanced_heads.sort();
    advanced_heads
}
