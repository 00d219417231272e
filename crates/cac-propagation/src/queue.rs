//! Bounded priority queue of pending messages
//!
//! Ordered by priority (descending), then insertion sequence. Overflow trims
//! the low-priority tail.

use crate::message::PropagationMessage;
use std::collections::VecDeque;
use tokio::time::Instant;

/// A message with its enqueue bookkeeping
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: PropagationMessage,
    pub enqueued_at: Instant,
    sequence: u64,
}

impl QueuedMessage {
    /// Whether the TTL has elapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.enqueued_at) >= self.message.ttl()
    }

    /// Time spent in the queue
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

#[derive(Debug)]
pub struct MessageQueue {
    entries: VecDeque<QueuedMessage>,
    capacity: usize,
    next_sequence: u64,
}

impl MessageQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Insert a message; returns the messages trimmed from the tail
    pub fn push(&mut self, message: PropagationMessage) -> Vec<PropagationMessage> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let priority = message.priority;
        let at = self
            .entries
            .partition_point(|e| e.message.priority >= priority);
        self.entries.insert(
            at,
            QueuedMessage {
                message,
                enqueued_at: Instant::now(),
                sequence,
            },
        );

        let mut dropped = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(tail) = self.entries.pop_back() {
                dropped.push(tail.message);
            }
        }
        dropped
    }

    /// Remove the highest-priority, oldest message
    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.entries.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued messages in dispatch order
    #[must_use]
    pub fn snapshot(&self) -> Vec<PropagationMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Insertion sequence of the head, for diagnostics
    #[must_use]
    pub fn head_sequence(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Channel, Targets};
    use cac_core::MessageId;
    use chrono::Utc;
    use proptest::prelude::*;

    fn message(priority: i32) -> PropagationMessage {
        PropagationMessage {
            id: MessageId::new(),
            timestamp: Utc::now(),
            channel: Channel::Broadcast,
            source: "system".into(),
            targets: Targets::All,
            change_type: format!("p{priority}"),
            payload: serde_json::Value::Null,
            priority,
            ttl_ms: 60_000,
            requires_ack: false,
        }
    }

    fn drain(queue: &mut MessageQueue) -> Vec<i32> {
        std::iter::from_fn(|| queue.pop())
            .map(|q| q.message.priority)
            .collect()
    }

    #[tokio::test]
    async fn drains_highest_priority_first() {
        let mut queue = MessageQueue::new(10);
        for p in [1, 5, 3] {
            queue.push(message(p));
        }
        assert_eq!(drain(&mut queue), vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn equal_priorities_keep_insertion_order() {
        let mut queue = MessageQueue::new(10);
        let first = message(2);
        let second = message(2);
        queue.push(first.clone());
        queue.push(second.clone());
        assert_eq!(queue.pop().map(|q| q.message.id), Some(first.id));
        assert_eq!(queue.pop().map(|q| q.message.id), Some(second.id));
    }

    #[tokio::test]
    async fn overflow_trims_lowest_priority_tail() {
        let mut queue = MessageQueue::new(2);
        queue.push(message(5));
        queue.push(message(1));
        let dropped = queue.push(message(3));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].priority, 1);
        assert_eq!(drain(&mut queue), vec![5, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_measured_from_enqueue() {
        let mut queue = MessageQueue::new(10);
        let mut short = message(1);
        short.ttl_ms = 100;
        queue.push(short);
        let head = queue.pop().unwrap();
        assert!(!head.is_expired(Instant::now()));
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        assert!(head.is_expired(Instant::now()));
    }

    proptest! {
        #[test]
        fn prop_drain_is_sorted_and_stable(priorities in prop::collection::vec(-5i32..5, 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let _guard = rt.enter();
            let mut queue = MessageQueue::new(100);
            let mut expected: Vec<(i32, usize)> = Vec::new();
            for (i, p) in priorities.iter().enumerate() {
                queue.push(message(*p));
                expected.push((*p, i));
            }
            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            let drained: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|q| q.sequence).collect();
            let expected_seq: Vec<u64> = expected.iter().map(|(_, i)| *i as u64).collect();
            prop_assert_eq!(drained, expected_seq);
        }
    }
}
