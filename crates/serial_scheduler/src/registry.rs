// SPDX-License-Identifier: MIT OR Apache-2.0
//! Slot registry.
//!
//! Owns every slot record and a reverse index from target identity to key.
//! A target is bound to at most one slot at a time. Iteration is always in
//! ascending key order, which the scheduler relies on when posting a run.

use crate::slot::{Slot, SlotKey};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Two-way map between slot keys and bound targets
#[derive(Debug)]
pub struct SlotRegistry<T> {
    slots: BTreeMap<SlotKey, Slot<T>>,
    by_target: HashMap<T, SlotKey>,
}

impl<T: Clone + Eq + Hash> SlotRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            by_target: HashMap::new(),
        }
    }

    /// Store `slot` under `key`.
    ///
    /// The slot currently owning the same target is evicted first, then any
    /// slot already stored at `key`. Every evicted record is returned.
    pub fn put(&mut self, key: SlotKey, slot: Slot<T>) -> Vec<Slot<T>> {
        let mut evicted = Vec::new();

        if let Some(owner) = self.by_target.get(slot.target()).copied() {
            if owner != key {
                evicted.extend(self.remove(owner));
            }
        }
        evicted.extend(self.remove(key));

        self.by_target.insert(slot.target().clone(), key);
        self.slots.insert(key, slot);
        evicted
    }

    /// Slot stored at `key`
    pub fn get(&self, key: SlotKey) -> Option<&Slot<T>> {
        self.slots.get(&key)
    }

    /// Mutable slot stored at `key`
    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut Slot<T>> {
        self.slots.get_mut(&key)
    }

    /// The `ordinal`-th slot in ascending key order
    pub fn get_by_ordinal(&self, ordinal: usize) -> Option<&Slot<T>> {
        self.slots.values().nth(ordinal)
    }

    /// Remove the slot at `key`
    pub fn remove(&mut self, key: SlotKey) -> Option<Slot<T>> {
        let slot = self.slots.remove(&key)?;
        if self.by_target.get(slot.target()) == Some(&key) {
            self.by_target.remove(slot.target());
        }
        Some(slot)
    }

    /// Whether a slot is stored at `key`
    pub fn contains_key(&self, key: SlotKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Key of the slot bound to `target`
    pub fn find_by_target(&self, target: &T) -> Option<SlotKey> {
        self.by_target.get(target).copied()
    }

    /// Whether `target` is bound at exactly `key`
    pub fn is_bound_at(&self, key: SlotKey, target: &T) -> bool {
        self.find_by_target(target) == Some(key)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = SlotKey> + '_ {
        self.slots.keys().copied()
    }

    /// Slots in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = &Slot<T>> {
        self.slots.values()
    }

    /// Mutable slots in ascending key order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot<T>> {
        self.slots.values_mut()
    }
}

impl<T: Clone + Eq + Hash> Default for SlotRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
