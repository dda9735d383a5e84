//! Rollback collaborator contract and an in-memory implementation.
//!
//! The player never does snapshot bookkeeping for backward travel: it hands
//! snapshots to a [`StateRollback`], asks it for the newest permitted match
//! and applies what comes back.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::player::PlayerSave;
use crate::spot::PlaybackSpot;
use crate::variables::VariableSnapshot;

/// Everything needed to put the game back at one spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Assigned by the store; increases monotonically.
    #[serde(default)]
    pub id: u64,
    pub spot: PlaybackSpot,
    pub player: PlayerSave,
    pub variables: VariableSnapshot,
    /// Only permitted snapshots are rollback targets.
    #[serde(default)]
    pub rollback_allowed: bool,
}

pub trait StateRollback: Send + Sync {
    /// Record a snapshot as the newest entry.
    fn push(&self, snapshot: GameSnapshot);

    /// Mark the newest snapshot as a rollback target.
    fn permit_rollback_at_current_spot(&self);

    /// Newest permitted snapshot whose spot matches `predicate`.
    fn find_snapshot(&self, predicate: &dyn Fn(&PlaybackSpot) -> bool) -> Option<GameSnapshot>;

    /// Make `snapshot` the newest entry again, discarding the ones after it.
    fn restore(&self, snapshot: &GameSnapshot);

    fn clear(&self);
}

/// Bounded stack of snapshots; the oldest entry is evicted when full.
#[derive(Debug)]
pub struct InMemoryRollback {
    capacity: usize,
    inner: Mutex<RollbackStack>,
}

#[derive(Debug, Default)]
struct RollbackStack {
    snapshots: VecDeque<GameSnapshot>,
    next_id: u64,
}

impl InMemoryRollback {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RollbackStack::default()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().snapshots.is_empty()
    }

    /// Spots of every retained snapshot, oldest first.
    #[must_use]
    pub fn spots(&self) -> Vec<PlaybackSpot> {
        self.inner
            .lock()
            .snapshots
            .iter()
            .map(|s| s.spot.clone())
            .collect()
    }
}

impl Default for InMemoryRollback {
    fn default() -> Self {
        Self::new(128)
    }
}

impl StateRollback for InMemoryRollback {
    fn push(&self, mut snapshot: GameSnapshot) {
        let mut inner = self.inner.lock();
        snapshot.id = inner.next_id;
        inner.next_id += 1;
        if inner.snapshots.len() >= self.capacity {
            inner.snapshots.pop_front();
        }
        inner.snapshots.push_back(snapshot);
    }

    fn permit_rollback_at_current_spot(&self) {
        if let Some(newest) = self.inner.lock().snapshots.back_mut() {
            newest.rollback_allowed = true;
        }
    }

    fn find_snapshot(&self, predicate: &dyn Fn(&PlaybackSpot) -> bool) -> Option<GameSnapshot> {
        self.inner
            .lock()
            .snapshots
            .iter()
            .rev()
            .find(|s| s.rollback_allowed && predicate(&s.spot))
            .cloned()
    }

    fn restore(&self, snapshot: &GameSnapshot) {
        self.inner.lock().snapshots.retain(|s| s.id <= snapshot.id);
    }

    fn clear(&self) {
        self.inner.lock().snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(line: u32) -> GameSnapshot {
        let spot = PlaybackSpot::new("s", line, 0);
        GameSnapshot {
            id: 0,
            spot: spot.clone(),
            player: PlayerSave {
                playback_spot: Some(spot),
                ..PlayerSave::default()
            },
            variables: VariableSnapshot::new(),
            rollback_allowed: false,
        }
    }

    #[test]
    fn only_permitted_snapshots_are_found() {
        let store = InMemoryRollback::new(8);
        store.push(snap(1));
        assert!(store.find_snapshot(&|_| true).is_none());
        store.permit_rollback_at_current_spot();
        assert_eq!(store.find_snapshot(&|_| true).unwrap().spot.line, 1);
    }

    #[test]
    fn newest_match_wins() {
        let store = InMemoryRollback::new(8);
        for line in [1, 2, 1] {
            store.push(snap(line));
            store.permit_rollback_at_current_spot();
        }
        let found = store.find_snapshot(&|spot| spot.line == 1).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn restore_discards_newer_entries() {
        let store = InMemoryRollback::new(8);
        for line in 0..4 {
            store.push(snap(line));
            store.permit_rollback_at_current_spot();
        }
        let target = store.find_snapshot(&|spot| spot.line == 1).unwrap();
        store.restore(&target);
        assert_eq!(store.len(), 2);
        assert_eq!(store.spots().last().unwrap().line, 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = InMemoryRollback::new(2);
        for line in 0..3 {
            store.push(snap(line));
        }
        let lines: Vec<u32> = store.spots().iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2]);
        store.clear();
        assert!(store.is_empty());
    }
}
