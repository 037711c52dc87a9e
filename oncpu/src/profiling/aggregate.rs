//! Stack sample aggregation
//!
//! Samples are tallied by their resolved frame sequence (leaf first, as the
//! kernel emits call-chains).

use serde::Serialize;
use std::collections::HashMap;

/// One distinct stack and how many samples hit it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedStack {
    /// Frame names, leaf first
    pub frames: Vec<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StackTable {
    counts: HashMap<Vec<String>, u64>,
    total: u64,
}

impl StackTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one sample of `frames`
    pub fn record(&mut self, frames: Vec<String>) {
        self.record_n(frames, 1);
    }

    pub fn record_n(&mut self, frames: Vec<String>, count: u64) {
        *self.counts.entry(frames).or_default() += count;
        self.total += count;
    }

    /// Distinct stacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Samples recorded
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[String], u64)> {
        self.counts.iter().map(|(frames, &count)| (frames.as_slice(), count))
    }

    /// Merge another table into this one
    pub fn merge(&mut self, other: &StackTable) {
        for (frames, count) in other.iter() {
            self.record_n(frames.to_vec(), count);
        }
    }

    /// Move everything out, leaving the table empty, heaviest stacks first
    pub fn drain_batch(&mut self) -> Vec<AggregatedStack> {
        self.total = 0;
        let mut batch: Vec<AggregatedStack> = self
            .counts
            .drain()
            .map(|(frames, count)| AggregatedStack { frames, count })
            .collect();
        sort_stacks(&mut batch);
        batch
    }

    /// The `n` heaviest stacks
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<AggregatedStack> {
        let mut stacks: Vec<AggregatedStack> = self
            .iter()
            .map(|(frames, count)| AggregatedStack { frames: frames.to_vec(), count })
            .collect();
        sort_stacks(&mut stacks);
        stacks.truncate(n);
        stacks
    }
}

/// Descending count, ties broken by frames so output is deterministic
fn sort_stacks(stacks: &mut [AggregatedStack]) {
    stacks.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.frames.cmp(&b.frames)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(frames: &[&str]) -> Vec<String> {
        frames.iter().map(|f| (*f).to_string()).collect()
    }

    #[test]
    fn test_identical_stacks_share_a_key() {
        let mut table = StackTable::new();
        table.record(stack(&["leaf", "main"]));
        table.record(stack(&["leaf", "main"]));
        table.record(stack(&["other", "main"]));

        assert_eq!(table.len(), 2);
        assert_eq!(table.total(), 3);
        let top = table.top(1);
        assert_eq!(top[0].frames, stack(&["leaf", "main"]));
        assert_eq!(top[0].count, 2);
    }

    #[test]
    fn test_drain_batch_empties_table() {
        let mut table = StackTable::new();
        table.record(stack(&["a"]));
        table.record_n(stack(&["b"]), 5);

        let batch = table.drain_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].frames, stack(&["b"]));
        assert!(table.is_empty());
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn test_merge() {
        let mut a = StackTable::new();
        a.record(stack(&["x"]));
        let mut b = StackTable::new();
        b.record_n(stack(&["x"]), 2);
        b.record(stack(&["y"]));

        a.merge(&b);
        assert_eq!(a.total(), 4);
        assert_eq!(a.top(1)[0].count, 3);
    }
}
