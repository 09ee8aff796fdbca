use crate::change::Change;
use crate::clock::Clock;
use crate::types::{ActorId, ChangeHash};
use fxhash::{FxHashMap, FxHashSet};

/// The change history and the DAG structure over it: a hash index, the
/// current heads (changes with no descendant), and the vector clock.
/// Changes are appended in application order, which is always a
/// topological order of the DAG because a change is only applied once its
/// dependencies are present.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeGraph {
    changes: Vec<Change>,
    index: FxHashMap<ChangeHash, usize>,
    heads: Vec<ChangeHash>,
    clock: Clock,
}

impl ChangeGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn heads(&self) -> &[ChangeHash] {
        &self.heads
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn has(&self, hash: &ChangeHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn has_all(&self, hashes: &[ChangeHash]) -> bool {
        hashes.iter().all(|h| self.has(h))
    }

    pub fn get(&self, hash: &ChangeHash) -> Option<&Change> {
        self.index.get(hash).map(|idx| &self.changes[*idx])
    }

    pub fn deps_satisfied(&self, change: &Change) -> bool {
        change.deps().iter().all(|d| self.has(d))
    }

    /// Record an applied change: index it, advance the clock, and replace
    /// the heads it supersedes with its own hash. Heads stay sorted.
    pub fn add(&mut self, change: Change) {
        let hash = change.hash();
        if self.index.contains_key(&hash) {
            return;
        }
        self.heads.retain(|h| !change.deps().contains(h));
        if let Err(pos) = self.heads.binary_search(&hash) {
            self.heads.insert(pos, hash);
        }
        self.clock.include(*change.actor_id(), change.seq());
        self.index.insert(hash, self.changes.len());
        self.changes.push(change);
    }

    /// Every hash reachable from `heads` (the heads themselves included).
    /// Unknown hashes are ignored.
    pub fn ancestors(&self, heads: &[ChangeHash]) -> FxHashSet<ChangeHash> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<ChangeHash> = heads
            .iter()
            .filter(|h| self.has(h))
            .copied()
            .collect();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            if let Some(change) = self.get(&hash) {
                for dep in change.deps() {
                    if !seen.contains(dep) {
                        stack.push(*dep);
                    }
                }
            }
        }
        seen
    }

    /// The changes not reachable from `have`, in application order. With
    /// an empty `have` this is the whole history.
    pub fn changes_since(&self, have: &[ChangeHash]) -> Vec<&Change> {
        let ancestors = self.ancestors(have);
        self.changes
            .iter()
            .filter(|c| !ancestors.contains(&c.hash()))
            .collect()
    }

    /// The seq of the latest change by `actor`, or 0.
    pub fn seq_of(&self, actor: &ActorId) -> u64 {
        self.clock.get(actor)
    }
}
