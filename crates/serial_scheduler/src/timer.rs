// SPDX-License-Identifier: MIT OR Apache-2.0
//! Keyed delayed-message queue.
//!
//! Entries are keyed by slot. Posting an entry for a key that already has one
//! pending replaces it, so at most one future event exists per slot. Due
//! entries are released in fire-time order, ties in posting order.

use crate::slot::SlotKey;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A pending timer entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry<P> {
    /// Slot the entry belongs to
    pub key: SlotKey,
    /// Absolute fire time on the scheduler clock
    pub fire_at: Duration,
    /// Payload handed back when the entry fires
    pub payload: P,
    seq: u64,
}

/// Delayed-message queue with one pending entry per key
#[derive(Debug)]
pub struct TimerQueue<P> {
    entries: HashMap<SlotKey, TimerEntry<P>>,
    order: BTreeMap<(Duration, u64), SlotKey>,
    next_seq: u64,
}

impl<P> TimerQueue<P> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Post an entry, replacing any entry pending for the same key.
    ///
    /// Returns the replaced entry.
    pub fn post(&mut self, key: SlotKey, fire_at: Duration, payload: P) -> Option<TimerEntry<P>> {
        let replaced = self.cancel(key);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((fire_at, seq), key);
        self.entries.insert(
            key,
            TimerEntry {
                key,
                fire_at,
                payload,
                seq,
            },
        );

        replaced
    }

    /// Remove the entry pending for `key`
    pub fn cancel(&mut self, key: SlotKey) -> Option<TimerEntry<P>> {
        let entry = self.entries.remove(&key)?;
        self.order.remove(&(entry.fire_at, entry.seq));
        Some(entry)
    }

    /// Remove every pending entry
    pub fn cancel_all(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Pop the earliest entry whose fire time is at or before `now`
    pub fn pop_due(&mut self, now: Duration) -> Option<TimerEntry<P>> {
        let (&(fire_at, _), &key) = self.order.first_key_value()?;
        if fire_at > now {
            return None;
        }
        self.cancel(key)
    }

    /// Fire time of the earliest pending entry
    pub fn next_deadline(&self) -> Option<Duration> {
        self.order.first_key_value().map(|(&(fire_at, _), _)| fire_at)
    }

    /// Entry pending for `key`
    pub fn get(&self, key: SlotKey) -> Option<&TimerEntry<P>> {
        self.entries.get(&key)
    }

    /// Whether an entry is pending for `key`
    pub fn contains(&self, key: SlotKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys with a pending entry, in fire order
    pub fn pending_keys(&self) -> impl Iterator<Item = SlotKey> + '_ {
        self.order.values().copied()
    }
}

impl<P> Default for TimerQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}
