// SPDX-License-Identifier: MIT OR Apache-2.0
//! Slots: the unit of scheduling.
//!
//! A slot binds a caller-chosen key (typically a list position) to one
//! external target and tracks where that target is in the transition
//! sequence.

use crate::runner::RunnerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable slot key assigned by the caller.
///
/// The key's integer value doubles as the stagger ordinal: slot `n` starts
/// `n` stagger intervals after the run's base time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SlotKey(pub usize);

impl SlotKey {
    /// Stagger ordinal for this key
    pub fn ordinal(self) -> usize {
        self.0
    }
}

impl From<usize> for SlotKey {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// No pending work
    #[default]
    Idle,
    /// A timer is posted for the next transition
    Scheduled,
    /// The runner is playing a transition for this slot
    Transitioning,
    /// Removed or rebound; absorbs late signals
    Cancelled,
}

impl SlotState {
    /// Whether the slot has pending or running work
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Scheduled | Self::Transitioning)
    }
}

/// Position of a slot within the transition sequence.
///
/// Timer entries carry a copy of this, so advancing to the next transition
/// never mutates the timing that an earlier entry was posted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotTiming {
    /// Index of the transition to play, `None` before the first run
    pub transition_index: Option<usize>,
    /// Play time already consumed within that transition
    pub elapsed: Duration,
}

impl SlotTiming {
    /// Timing at the very start of a sequence
    pub fn initial() -> Self {
        Self {
            transition_index: Some(0),
            elapsed: Duration::ZERO,
        }
    }

    /// Timing positioned inside a transition
    pub fn at(index: usize, elapsed: Duration) -> Self {
        Self {
            transition_index: Some(index),
            elapsed,
        }
    }

    /// Index of the transition, treating "unset" as the first one
    pub fn index(&self) -> usize {
        self.transition_index.unwrap_or(0)
    }

    /// Timing for the following transition, starting from its beginning
    pub fn next(&self) -> Self {
        Self::at(self.index() + 1, Duration::ZERO)
    }
}

/// How a slot's sequence ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The last transition played to completion
    Completed,
    /// The runner refused to start a transition
    Failed(RunnerError),
}

/// Notification delivered to a slot's completion callback
#[derive(Debug)]
pub struct SlotEvent<'a, T> {
    /// Key of the slot
    pub key: SlotKey,
    /// Target the slot was bound to
    pub target: &'a T,
    /// Result of the sequence
    pub outcome: SlotOutcome,
}

/// Caller-supplied completion callback
pub type SlotCallback<T> = Box<dyn FnMut(SlotEvent<'_, T>)>;

/// A slot record
pub struct Slot<T> {
    key: SlotKey,
    target: T,
    pub(crate) timing: SlotTiming,
    pub(crate) state: SlotState,
    pub(crate) suppress_callback: bool,
    pub(crate) on_complete: Option<SlotCallback<T>>,
}

impl<T> Slot<T> {
    /// Create an idle slot bound to `target`
    pub fn new(key: SlotKey, target: T) -> Self {
        Self {
            key,
            target,
            timing: SlotTiming::default(),
            state: SlotState::Idle,
            suppress_callback: false,
            on_complete: None,
        }
    }

    /// Attach a completion callback
    pub fn with_callback(mut self, callback: SlotCallback<T>) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Slot key
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Bound target
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Current timing
    pub fn timing(&self) -> SlotTiming {
        self.timing
    }

    /// Index of the current transition, if the slot has run
    pub fn transition_index(&self) -> Option<usize> {
        self.timing.transition_index
    }

    /// Play time consumed within the current transition
    pub fn elapsed(&self) -> Duration {
        self.timing.elapsed
    }

    /// Scheduling state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Whether the next completion will be swallowed
    pub fn is_suppressed(&self) -> bool {
        self.suppress_callback
    }

    /// Whether a completion callback is attached
    pub fn has_callback(&self) -> bool {
        self.on_complete.is_some()
    }

    /// Clear per-run progress before a new run
    pub(crate) fn reset_transition_info(&mut self) {
        self.timing = SlotTiming::default();
        self.suppress_callback = false;
    }

    /// Invoke the completion callback, unless suppressed
    pub(crate) fn notify(&mut self, outcome: SlotOutcome) {
        if self.suppress_callback {
            return;
        }
        if let Some(callback) = self.on_complete.as_mut() {
            callback(SlotEvent {
                key: self.key,
                target: &self.target,
                outcome,
            });
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("timing", &self.timing)
            .field("state", &self.state)
            .field("suppress_callback", &self.suppress_callback)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}
