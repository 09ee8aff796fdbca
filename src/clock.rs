use crate::types::ActorId;
use fxhash::FxBuildHasher;
use std::cmp;
use std::collections::HashMap;

/// Per-actor highest applied change sequence number.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Clock(HashMap<ActorId, u64, FxBuildHasher>);

impl Clock {
    pub fn include(&mut self, actor: ActorId, seq: u64) {
        self.0
            .entry(actor)
            .and_modify(|m| *m = cmp::max(seq, *m))
            .or_insert(seq);
    }

    /// The highest seq applied for `actor`, or 0 if none.
    pub fn get(&self, actor: &ActorId) -> u64 {
        self.0.get(actor).copied().unwrap_or(0)
    }

    pub fn covers(&self, actor: &ActorId, seq: u64) -> bool {
        self.get(actor) >= seq
    }

    /// Entries sorted by actor, for deterministic serialization.
    pub fn sorted_entries(&self) -> Vec<(ActorId, u64)> {
        let mut entries: Vec<_> = self.0.iter().map(|(a, s)| (*a, *s)).collect();
        entries.sort();
        entries
    }
}
