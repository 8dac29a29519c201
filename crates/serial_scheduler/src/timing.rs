// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing math for staggered transition sequences.
//!
//! Everything here is pure and relative to the run's base time: a slot that
//! is bound after a run started can work out which transition it belongs in,
//! and how far into it, from the wall-clock delta alone.
//!
//! Slot `k` becomes active at `stagger × k` after the base time (the initial
//! delay is only applied when posting the first timer) and stays active for
//! the total sequence duration.

use crate::config::ScheduleConfig;
use crate::runner::Transition;
use crate::slot::SlotKey;
use std::time::Duration;

/// Sum of all transition durations
pub fn total_duration<Tr: Transition>(sequence: &[Tr]) -> Duration {
    sequence.iter().map(Transition::duration).sum()
}

/// Where a slot falls relative to its active window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The slot's sequence has not started yet
    Before {
        /// Time left until the slot's first transition is due
        remaining: Duration,
    },
    /// The slot is inside its sequence
    Within {
        /// Transition that should be playing
        index: usize,
        /// Play time into that transition
        play_time: Duration,
    },
    /// The sequence is over, or `elapsed` sits exactly on a window edge
    After,
}

/// Timing model over the durations of one transition sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingModel {
    config: ScheduleConfig,
    durations: Vec<Duration>,
}

impl TimingModel {
    /// Build a model from a config and plain durations
    pub fn new(config: ScheduleConfig, durations: Vec<Duration>) -> Self {
        Self { config, durations }
    }

    /// Build a model from a transition sequence
    pub fn from_sequence<Tr: Transition>(config: ScheduleConfig, sequence: &[Tr]) -> Self {
        Self::new(config, sequence.iter().map(Transition::duration).collect())
    }

    /// Schedule config
    pub fn config(&self) -> ScheduleConfig {
        self.config
    }

    /// Number of transitions
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Whether the sequence has no transitions
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Duration of the transition at `index`
    pub fn duration_of(&self, index: usize) -> Option<Duration> {
        self.durations.get(index).copied()
    }

    /// Whether `index` is the last transition
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.durations.len()
    }

    /// Start offset of a slot from the run's base time.
    ///
    /// Saturates at [`Duration::MAX`] when `stagger × key` overflows.
    pub fn delay_for_initial_transition(&self, key: SlotKey) -> Duration {
        const NANOS_PER_SEC: u128 = 1_000_000_000;

        let ordinal = u128::try_from(key.ordinal()).unwrap_or(u128::MAX);
        let nanos = self.config.stagger_interval().as_nanos().saturating_mul(ordinal);
        match u64::try_from(nanos / NANOS_PER_SEC) {
            Ok(secs) => {
                let subsec = u32::try_from(nanos % NANOS_PER_SEC).unwrap_or_default();
                Duration::new(secs, subsec)
            }
            Err(_) => Duration::MAX,
        }
    }

    /// Duration of the transition preceding `index`; zero for the first
    pub fn previous_transition_duration(&self, index: usize) -> Duration {
        match index.checked_sub(1) {
            Some(previous) => self.duration_of(previous).unwrap_or_default(),
            None => Duration::ZERO,
        }
    }

    /// Delay before the transition at `index` should fire.
    ///
    /// For the first transition this is measured from the run's base time.
    /// Later transitions are chained: the delay is measured from the start
    /// of the previous transition.
    pub fn delay(&self, key: SlotKey, index: usize) -> Duration {
        let mut delay = self.previous_transition_duration(index);
        if index == 0 {
            delay = delay
                .saturating_add(self.config.initial_delay())
                .saturating_add(self.delay_for_initial_transition(key));
        }
        delay
    }

    /// Sum of all durations
    pub fn total_duration(&self) -> Duration {
        self.durations.iter().sum()
    }

    /// Sum of the durations before `index`
    pub fn delay_since_base(&self, index: usize) -> Duration {
        self.durations.iter().take(index).sum()
    }

    /// Whether `elapsed` lies strictly inside the slot's active window
    pub fn is_within_active_window(&self, key: SlotKey, elapsed: Duration) -> bool {
        let start = self.delay_for_initial_transition(key);
        let end = start.saturating_add(self.total_duration());
        elapsed > start && elapsed < end
    }

    /// Whether the slot's active window has not opened yet
    pub fn is_before_active_window(&self, key: SlotKey, elapsed: Duration) -> bool {
        elapsed < self.delay_for_initial_transition(key)
    }

    /// Index of the transition whose window strictly contains `elapsed`.
    ///
    /// Windows are open on both ends, so a time exactly on a boundary
    /// matches nothing and yields 0.
    pub fn transition_index_at(&self, key: SlotKey, elapsed: Duration) -> usize {
        let mut start = self.delay_for_initial_transition(key);
        for (index, duration) in self.durations.iter().enumerate() {
            let end = start.saturating_add(*duration);
            if elapsed > start && elapsed < end {
                return index;
            }
            start = end;
        }
        0
    }

    /// Play time into the transition at `index`
    pub fn play_time_within(&self, key: SlotKey, index: usize, elapsed: Duration) -> Duration {
        elapsed
            .saturating_sub(self.delay_for_initial_transition(key))
            .saturating_sub(self.delay_since_base(index))
    }

    /// Classify a slot against its active window
    pub fn placement(&self, key: SlotKey, elapsed: Duration) -> Placement {
        if self.is_within_active_window(key, elapsed) {
            let index = self.transition_index_at(key, elapsed);
            Placement::Within {
                index,
                play_time: self.play_time_within(key, index, elapsed),
            }
        } else if self.is_before_active_window(key, elapsed) {
            Placement::Before {
                remaining: self.delay(key, 0).saturating_sub(elapsed),
            }
        } else {
            Placement::After
        }
    }
}
