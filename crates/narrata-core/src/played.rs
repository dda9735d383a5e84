//! Persistent record of which playlist indices have been visited.
//!
//! Stored per script as sorted, non-overlapping, non-adjacent inclusive
//! ranges. Consecutive visits extend the last range so a typical playthrough
//! costs one range per contiguous stretch instead of one entry per command.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive range of played indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    #[must_use]
    pub const fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    /// Number of indices covered.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Played indices per script name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayedRegister {
    scripts: BTreeMap<String, Vec<IndexRange>>,
}

impl PlayedRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit. Idempotent.
    pub fn add_index(&mut self, script: &str, index: usize) {
        let ranges = self.scripts.entry(script.to_string()).or_default();
        // First range that ends at or after index - 1 (could absorb index).
        let pos = ranges.partition_point(|r| r.end.saturating_add(1) < index);
        let Some(range) = ranges.get(pos).copied() else {
            ranges.push(IndexRange::single(index));
            return;
        };
        if range.contains(index) {
            return;
        }
        if range.end + 1 == index {
            ranges[pos].end = index;
            // Bridge into the following range when the gap closed.
            if ranges.get(pos + 1).is_some_and(|next| next.start == index + 1) {
                ranges[pos].end = ranges[pos + 1].end;
                ranges.remove(pos + 1);
            }
        } else if index + 1 == range.start {
            ranges[pos].start = index;
        } else {
            ranges.insert(pos, IndexRange::single(index));
        }
    }

    #[must_use]
    pub fn contains_index(&self, script: &str, index: usize) -> bool {
        self.scripts.get(script).is_some_and(|ranges| {
            let pos = ranges.partition_point(|r| r.end < index);
            ranges.get(pos).is_some_and(|r| r.contains(index))
        })
    }

    /// Number of distinct indices visited in `script`.
    #[must_use]
    pub fn count_played(&self, script: &str) -> usize {
        self.scripts
            .get(script)
            .map_or(0, |ranges| ranges.iter().map(IndexRange::count).sum())
    }

    /// Ranges recorded for `script`, in ascending order.
    #[must_use]
    pub fn ranges(&self, script: &str) -> &[IndexRange] {
        self.scripts.get(script).map_or(&[], Vec::as_slice)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_visits_share_one_range() {
        let mut reg = PlayedRegister::new();
        for i in 0..5 {
            reg.add_index("s", i);
        }
        assert_eq!(reg.ranges("s"), &[IndexRange { start: 0, end: 4 }]);
        assert_eq!(reg.count_played("s"), 5);
    }

    #[test]
    fn filling_a_gap_merges_neighbours() {
        let mut reg = PlayedRegister::new();
        reg.add_index("s", 1);
        reg.add_index("s", 3);
        assert_eq!(reg.ranges("s").len(), 2);
        reg.add_index("s", 2);
        assert_eq!(reg.ranges("s"), &[IndexRange { start: 1, end: 3 }]);
    }

    #[test]
    fn prepending_extends_start() {
        let mut reg = PlayedRegister::new();
        reg.add_index("s", 5);
        reg.add_index("s", 4);
        assert_eq!(reg.ranges("s"), &[IndexRange { start: 4, end: 5 }]);
        assert!(!reg.contains_index("s", 3));
        assert!(reg.contains_index("s", 4));
    }

    #[test]
    fn scripts_are_independent() {
        let mut reg = PlayedRegister::new();
        reg.add_index("a", 0);
        assert!(!reg.contains_index("b", 0));
        assert_eq!(reg.count_played("b"), 0);
        assert_eq!(reg.scripts().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn idempotent() {
        let mut reg = PlayedRegister::new();
        reg.add_index("s", 7);
        let before = reg.clone();
        reg.add_index("s", 7);
        assert_eq!(reg, before);
    }

    #[test]
    fn serializes_as_map() {
        let mut reg = PlayedRegister::new();
        reg.add_index("s", 0);
        let json = serde_json::to_string(&reg).unwrap();
        assert_eq!(json, r#"{"s":[{"start":0,"end":0}]}"#);
    }
}
