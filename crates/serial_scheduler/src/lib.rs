// SPDX-License-Identifier: MIT OR Apache-2.0
//! Staggered sequential-transition scheduler.
//!
//! Plays a fixed sequence of timed transitions on each of an ordered set of
//! slots, offsetting every slot's start by a stagger interval. Slots can be
//! bound, rebound and removed while a run is in progress, which is what a
//! virtualized list does when it recycles rows.
//!
//! ## Architecture
//!
//! The scheduler is built on:
//! - Pure timing math over the sequence durations
//! - A slot registry keyed by position, with a reverse index by target
//! - A timer queue holding at most one pending transition per slot
//! - Per-slot epochs that invalidate stale timers and completions
//! - A pluggable transition runner that plays the actual transitions
//!
//! Nothing spawns threads. The caller drives the scheduler by calling
//! [`Scheduler::poll`] from its own loop.

pub mod clock;
pub mod config;
pub mod guard;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod slot;
pub mod timer;
pub mod timing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, ScheduleConfig, ScheduleSettings, SequenceSupplier, TransitionPlan,
    TransitionPlanBuilder,
};
pub use guard::{CancellationGuard, Epoch};
pub use registry::SlotRegistry;
pub use runner::{
    ClockedRunner, CompletionSignal, CompletionToken, Playback, PlaybackId, RunnerError,
    SeekPolicy, StartRequest, Ticket, Transition, TransitionRunner,
};
pub use scheduler::{RunId, RunInfo, Scheduler};
pub use slot::{Slot, SlotCallback, SlotEvent, SlotKey, SlotOutcome, SlotState, SlotTiming};
pub use timer::{TimerEntry, TimerQueue};
pub use timing::{total_duration, Placement, TimingModel};
