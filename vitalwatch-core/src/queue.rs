//! Bounded Retry Queue for Outbound Messages
//!
//! ## Overview
//!
//! When the publish/subscribe client reports a full send buffer, the message
//! is parked here and retried later instead of being lost. The queue is a
//! fixed array of slots used as a ring:
//!
//! ```text
//! ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┐
//! │  0  │  1  │  2  │  3  │  4  │  5  │  6  │  7  │  8  │  9  │
//! └─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┘
//!          ↑                 ↑
//!     extract_index     insert_index
//!     (next retry)      (next parked message)
//! ```
//!
//! ## Rules
//!
//! - `insert` on a full queue fails and changes nothing. Nothing is ever
//!   overwritten; the caller decides to drop.
//! - `extract` on an empty queue fails and changes nothing.
//! - Topics and payloads are copied by value. Anything longer than the slot
//!   is truncated to `capacity - 1` bytes and NUL-terminated, the layout
//!   collectors reading raw frames expect.
//! - FIFO order holds for the entries themselves. A retried message that
//!   fails again is inserted at the tail, so order across retries is best
//!   effort only.
//!
//! ## Memory Layout
//!
//! Storage is inline, no heap:
//! ```text
//! DeliveryQueue<10, 128, 256>
//! ├── slots: 10 × (128 + 256 + 2 lengths) ≈ 4 KB
//! └── indices + length: 3 × usize
//! ```

use heapless::Vec;

use crate::constants::{MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN, QUEUE_CAPACITY};

/// Queue sized for the monitor's publish path
pub type MonitorQueue = DeliveryQueue<QUEUE_CAPACITY, MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN>;

/// One parked message: topic and payload, each NUL-terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry<const T: usize, const P: usize> {
    topic: Vec<u8, T>,
    payload: Vec<u8, P>,
}

impl<const T: usize, const P: usize> QueueEntry<T, P> {
    const EMPTY: Self = Self { topic: Vec::new(), payload: Vec::new() };

    fn store(topic: &[u8], payload: &[u8]) -> Self {
        Self { topic: terminated(topic), payload: terminated(payload) }
    }

    /// Topic bytes, terminator excluded
    pub fn topic_bytes(&self) -> &[u8] {
        strip(&self.topic)
    }

    /// Topic as text, cut at the last complete UTF-8 character
    pub fn topic(&self) -> &str {
        let bytes = self.topic_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    /// Payload bytes, terminator excluded
    pub fn payload(&self) -> &[u8] {
        strip(&self.payload)
    }

    /// Payload exactly as stored, terminator included
    pub fn stored_payload(&self) -> &[u8] {
        &self.payload
    }

    /// Topic exactly as stored, terminator included
    pub fn stored_topic(&self) -> &[u8] {
        &self.topic
    }
}

/// Copy at most `N - 1` bytes and append a NUL.
fn terminated<const N: usize>(src: &[u8]) -> Vec<u8, N> {
    let mut out = Vec::new();
    if N == 0 {
        return out;
    }
    let keep = src.len().min(N - 1);
    // Both fit by construction.
    let _ = out.extend_from_slice(&src[..keep]);
    let _ = out.push(0);
    out
}

fn strip(stored: &[u8]) -> &[u8] {
    match stored.split_last() {
        Some((&0, rest)) => rest,
        _ => stored,
    }
}

/// Fixed-capacity FIFO of `(topic, payload)` pairs.
///
/// `N` slots, topics up to `T` bytes and payloads up to `P` bytes, both
/// terminator included.
#[derive(Debug, Clone)]
pub struct DeliveryQueue<const N: usize, const T: usize, const P: usize> {
    slots: [QueueEntry<T, P>; N],
    insert_index: usize,
    extract_index: usize,
    length: usize,
}

impl<const N: usize, const T: usize, const P: usize> DeliveryQueue<N, T, P> {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| QueueEntry::EMPTY),
            insert_index: 0,
            extract_index: 0,
            length: 0,
        }
    }

    /// Number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Parked messages
    pub fn len(&self) -> usize {
        self.length
    }

    /// Nothing to retry
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Every slot taken
    pub fn is_full(&self) -> bool {
        self.length == N
    }

    /// Slot the next insert writes to
    pub fn insert_index(&self) -> usize {
        self.insert_index
    }

    /// Slot the next extract reads from
    pub fn extract_index(&self) -> usize {
        self.extract_index
    }

    /// Park a copy of `topic` and `payload`. Returns `false` if full.
    pub fn insert(&mut self, topic: &str, payload: &[u8]) -> bool {
        if self.is_full() || N == 0 {
            return false;
        }

        self.slots[self.insert_index] = QueueEntry::store(topic.as_bytes(), payload);
        self.insert_index = (self.insert_index + 1) % N;
        self.length += 1;
        true
    }

    /// Take the oldest parked message, if any
    pub fn extract(&mut self) -> Option<QueueEntry<T, P>> {
        if self.is_empty() {
            return None;
        }

        let entry = core::mem::replace(&mut self.slots[self.extract_index], QueueEntry::EMPTY);
        self.extract_index = (self.extract_index + 1) % N;
        self.length -= 1;
        Some(entry)
    }

    /// Oldest parked message without removing it
    pub fn peek(&self) -> Option<&QueueEntry<T, P>> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.extract_index])
        }
    }

    /// Drop every parked message and rewind both indices
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = QueueEntry::EMPTY;
        }
        self.insert_index = 0;
        self.extract_index = 0;
        self.length = 0;
    }
}

impl<const N: usize, const T: usize, const P: usize> Default for DeliveryQueue<N, T, P> {
    fn default() -> Self {
        Self::new()
    }
}
