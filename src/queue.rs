//! Message buffers used while no peer or no subscriber is available.
//!
//! - [`UnclaimedQueue`] - bounded, newest-first buffer of inbound messages
//!   whose channel has no subscriber yet. Overflow drops the oldest entries.
//! - [`OutboundQueue`] - unbounded FIFO of messages sent while disconnected.

use std::collections::VecDeque;

use crate::envelope::Envelope;

/// Default bound of the unclaimed queue.
pub const DEFAULT_UNCLAIMED_CAPACITY: usize = 1000;

/// Inbound messages waiting for a subscriber.
///
/// Entries are kept most-recent-first, so trimming to capacity is a tail
/// drop of the oldest-received messages.
#[derive(Debug)]
pub struct UnclaimedQueue {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl UnclaimedQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a message at the front and trim the tail.
    ///
    /// Returns the number of evicted messages.
    pub fn push(&mut self, envelope: Envelope) -> usize {
        self.entries.push_front(envelope);
        let evicted = self.entries.len().saturating_sub(self.capacity);
        self.entries.truncate(self.capacity);
        evicted
    }

    /// Remove every message on `channel`, oldest-received first.
    pub fn claim(&mut self, channel: &str) -> Vec<Envelope> {
        let mut claimed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());

        // Walk from the tail so claimed messages come out in arrival order.
        while let Some(envelope) = self.entries.pop_back() {
            if envelope.channel == channel {
                claimed.push(envelope);
            } else {
                kept.push_front(envelope);
            }
        }

        self.entries = kept;
        claimed
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter()
    }
}

impl Default for UnclaimedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_UNCLAIMED_CAPACITY)
    }
}

/// Application messages produced while disconnected.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Envelope>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the back.
    pub fn push(&mut self, envelope: Envelope) {
        self.entries.push_back(envelope);
    }

    /// Take the oldest queued message.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.entries.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(channel: &str, n: u8) -> Envelope {
        Envelope::message(channel, "1", Bytes::from(vec![n]))
    }

    #[test]
    fn test_unclaimed_is_newest_first() {
        let mut queue = UnclaimedQueue::new(10);
        queue.push(msg("a", 1));
        queue.push(msg("a", 2));

        let order: Vec<u8> = queue.iter().map(|e| e.payload[0]).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_unclaimed_evicts_oldest() {
        let mut queue = UnclaimedQueue::new(3);
        for n in 0..3 {
            assert_eq!(queue.push(msg("d", n)), 0);
        }

        assert_eq!(queue.push(msg("d", 3)), 1);
        assert_eq!(queue.len(), 3);

        let kept: Vec<u8> = queue.iter().map(|e| e.payload[0]).collect();
        assert_eq!(kept, vec![3, 2, 1]);
    }

    #[test]
    fn test_unclaimed_default_bound() {
        let mut queue = UnclaimedQueue::default();
        for n in 0..=DEFAULT_UNCLAIMED_CAPACITY {
            queue.push(msg("d", (n % 256) as u8));
        }
        assert_eq!(queue.len(), DEFAULT_UNCLAIMED_CAPACITY);
    }

    #[test]
    fn test_claim_takes_only_matching_in_arrival_order() {
        let mut queue = UnclaimedQueue::new(10);
        queue.push(msg("a", 1));
        queue.push(msg("b", 2));
        queue.push(msg("a", 3));
        queue.push(msg("b", 4));

        let claimed: Vec<u8> = queue.claim("a").iter().map(|e| e.payload[0]).collect();
        assert_eq!(claimed, vec![1, 3]);

        let left: Vec<u8> = queue.iter().map(|e| e.payload[0]).collect();
        assert_eq!(left, vec![4, 2]);
        assert!(queue.claim("a").is_empty());
    }

    #[test]
    fn test_outbound_is_fifo() {
        let mut queue = OutboundQueue::new();
        queue.push(msg("x", 1));
        queue.push(msg("x", 2));
        queue.push(msg("x", 3));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().payload[0], 1);
        assert_eq!(queue.pop().unwrap().payload[0], 2);
        assert_eq!(queue.pop().unwrap().payload[0], 3);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
