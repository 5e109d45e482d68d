//! Per-partition contiguous commit tracking
//!
//! Workers finish in any order. A finished message is only released for
//! commit once every earlier offset of the same partition that was dispatched
//! has also finished, so a crash can never skip an unfinished message.

use crate::broker::BrokerMessage;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionState {
    in_flight: BTreeSet<i64>,
    finished: BTreeMap<i64, BrokerMessage>,
}

/// Orders commits by offset within each `(topic, partition)`.
#[derive(Debug, Default)]
pub struct CommitTracker {
    partitions: HashMap<(String, i32), PartitionState>,
}

impl CommitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message as dispatched.
    pub fn track(&mut self, message: &BrokerMessage) {
        self.partitions
            .entry((message.topic.clone(), message.partition))
            .or_default()
            .in_flight
            .insert(message.offset);
    }

    /// Mark a message finished and return every message that may now be
    /// committed, in offset order.
    pub fn complete(&mut self, message: BrokerMessage) -> Vec<BrokerMessage> {
        let key = (message.topic.clone(), message.partition);
        let Some(state) = self.partitions.get_mut(&key) else {
            // Never tracked: nothing earlier can be outstanding.
            return vec![message];
        };

        state.in_flight.remove(&message.offset);
        state.finished.insert(message.offset, message);

        let ready: Vec<i64> = match state.in_flight.first() {
            Some(&low_water) => state.finished.range(..low_water).map(|(o, _)| *o).collect(),
            None => state.finished.keys().copied().collect(),
        };

        let released = ready
            .into_iter()
            .filter_map(|offset| state.finished.remove(&offset))
            .collect();

        if state.in_flight.is_empty() && state.finished.is_empty() {
            self.partitions.remove(&key);
        }

        released
    }

    /// Messages dispatched or finished but not yet released.
    pub fn outstanding(&self) -> usize {
        self.partitions
            .values()
            .map(|p| p.in_flight.len() + p.finished.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Headers;

    fn msg(partition: i32, offset: i64) -> BrokerMessage {
        BrokerMessage {
            topic: "stt.jobs".to_string(),
            partition,
            offset,
            key: None,
            payload: Vec::new(),
            headers: Headers::new(),
            id: offset.to_string(),
        }
    }

    fn offsets(messages: &[BrokerMessage]) -> Vec<i64> {
        messages.iter().map(|m| m.offset).collect()
    }

    #[test]
    fn test_in_order_completion_releases_immediately() {
        let mut tracker = CommitTracker::new();
        tracker.track(&msg(0, 1));
        tracker.track(&msg(0, 2));

        assert_eq!(offsets(&tracker.complete(msg(0, 1))), vec![1]);
        assert_eq!(offsets(&tracker.complete(msg(0, 2))), vec![2]);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_later_offset_waits_for_earlier() {
        let mut tracker = CommitTracker::new();
        for offset in 10..=12 {
            tracker.track(&msg(0, offset));
        }

        assert!(tracker.complete(msg(0, 12)).is_empty());
        assert!(tracker.complete(msg(0, 11)).is_empty());
        assert_eq!(tracker.outstanding(), 3);

        assert_eq!(offsets(&tracker.complete(msg(0, 10))), vec![10, 11, 12]);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = CommitTracker::new();
        tracker.track(&msg(0, 5));
        tracker.track(&msg(1, 6));

        assert_eq!(offsets(&tracker.complete(msg(1, 6))), vec![6]);
        assert_eq!(offsets(&tracker.complete(msg(0, 5))), vec![5]);
    }

    #[test]
    fn test_gap_holds_only_later_offsets() {
        let mut tracker = CommitTracker::new();
        for offset in 1..=4 {
            tracker.track(&msg(0, offset));
        }

        assert_eq!(offsets(&tracker.complete(msg(0, 1))), vec![1]);
        assert!(tracker.complete(msg(0, 3)).is_empty());
        assert!(tracker.complete(msg(0, 4)).is_empty());
        assert_eq!(offsets(&tracker.complete(msg(0, 2))), vec![2, 3, 4]);
    }

    #[test]
    fn test_untracked_message_is_released() {
        let mut tracker = CommitTracker::new();
        assert_eq!(offsets(&tracker.complete(msg(3, 99))), vec![99]);
    }
}
