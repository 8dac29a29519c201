// SPDX-License-Identifier: MIT OR Apache-2.0
//! Epoch-based suppression of stale signals.
//!
//! Timer fires and transition completions may arrive after the slot that
//! requested them was cancelled or rebound. Rather than chasing every
//! in-flight signal, each request is stamped with the slot's epoch and
//! rejected on arrival if the epoch has moved on.

use crate::slot::SlotKey;
use std::collections::HashMap;
use std::fmt;

/// Per-slot cancellation counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The following epoch
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Tracks the current epoch of every slot key.
///
/// Epochs are kept per key, not per slot record, so a key that is removed
/// and later rebound never reuses an epoch an old signal could carry.
#[derive(Debug, Default)]
pub struct CancellationGuard {
    epochs: HashMap<SlotKey, Epoch>,
}

impl CancellationGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch for a key
    pub fn current(&self, key: SlotKey) -> Epoch {
        self.epochs.get(&key).copied().unwrap_or_default()
    }

    /// Invalidate every signal issued for `key` so far
    pub fn bump(&mut self, key: SlotKey) -> Epoch {
        let epoch = self.epochs.entry(key).or_default();
        *epoch = epoch.next();
        *epoch
    }

    /// Invalidate every outstanding signal for each of `keys`
    pub fn bump_all(&mut self, keys: impl IntoIterator<Item = SlotKey>) {
        for key in keys {
            self.bump(key);
        }
    }

    /// Whether a signal stamped with `epoch` is still current for `key`
    pub fn admits(&self, key: SlotKey, epoch: Epoch) -> bool {
        self.current(key) == epoch
    }
}
