// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transition backends.
//!
//! The scheduler never plays anything itself. It hands a [`StartRequest`]
//! and a [`CompletionToken`] to a [`TransitionRunner`], and the runner redeems
//! the token once the transition finishes on its own.

use crate::clock::Clock;
use crate::guard::Epoch;
use crate::slot::SlotKey;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

/// A timed unit of work, opaque beyond its duration
pub trait Transition {
    /// Nominal play time
    fn duration(&self) -> Duration;
}

impl Transition for Duration {
    fn duration(&self) -> Duration {
        *self
    }
}

impl<T: Transition + ?Sized> Transition for Box<T> {
    fn duration(&self) -> Duration {
        (**self).duration()
    }
}

impl<T: Transition + ?Sized> Transition for Arc<T> {
    fn duration(&self) -> Duration {
        (**self).duration()
    }
}

/// Error raised by a runner that cannot start a transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// The backend refused the request
    #[error("Transition rejected: {0}")]
    Rejected(String),

    /// The supplied sequence has no transition at the requested index
    #[error("Transition index {index} out of range for sequence of {len}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Sequence length
        len: usize,
    },
}

/// Identifies one started transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

/// Completion notice delivered back to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSignal {
    /// Slot the transition was started for
    pub key: SlotKey,
    /// Epoch the start was issued under
    pub epoch: Epoch,
    /// Index of the finished transition
    pub index: usize,
    /// Ticket of the started transition
    pub ticket: Ticket,
}

/// One-shot completion handle given to a runner with every start.
///
/// Redeeming consumes the token, so a transition can report completion at
/// most once. Tokens are `Send`; runners driven from other threads may
/// redeem them there and the signal is picked up on the scheduler's next
/// poll. Dropping a token without redeeming it reports nothing.
#[derive(Debug)]
pub struct CompletionToken {
    signal: CompletionSignal,
    sender: Sender<CompletionSignal>,
}

impl CompletionToken {
    pub(crate) fn new(signal: CompletionSignal, sender: Sender<CompletionSignal>) -> Self {
        Self { signal, sender }
    }

    /// Report natural completion of the transition
    pub fn complete(self) {
        // The receiver only disappears with the scheduler itself
        let _ = self.sender.send(self.signal);
    }

    /// Slot the transition belongs to
    pub fn key(&self) -> SlotKey {
        self.signal.key
    }

    /// Index of the transition
    pub fn index(&self) -> usize {
        self.signal.index
    }

    /// Ticket of the transition
    pub fn ticket(&self) -> Ticket {
        self.signal.ticket
    }
}

/// Everything a runner needs to start one transition
#[derive(Debug)]
pub struct StartRequest<'a, T, Tr> {
    /// Slot key
    pub key: SlotKey,
    /// Target to animate
    pub target: &'a T,
    /// Index of the transition in the sequence
    pub index: usize,
    /// The transition, as supplied for this target
    pub transition: Tr,
    /// Play time to seek to before starting
    pub from: Duration,
}

/// Backend that plays transitions on targets
pub trait TransitionRunner {
    /// Identity of an animatable target
    type Target: Clone + Eq + Hash + Debug;
    /// Transition descriptor
    type Transition: Transition;
    /// Handle to a started transition
    type Handle;

    /// Start a transition, seeking to `request.from` where supported.
    ///
    /// A started transition must redeem `token` exactly once when it
    /// finishes naturally, and never after it has been stopped.
    fn start(
        &mut self,
        request: StartRequest<'_, Self::Target, Self::Transition>,
        token: CompletionToken,
    ) -> Result<Self::Handle, RunnerError>;

    /// Stop a started transition. Stopping a finished transition is a no-op.
    fn stop(&mut self, handle: Self::Handle);

    /// Return `target` to its pre-sequence appearance after a cancellation
    fn reset(&mut self, _target: &Self::Target, _sequence: &[Self::Transition]) {}

    /// Mark whether `target` carries scheduler-owned transient state
    fn set_transient_state(&mut self, _target: &Self::Target, _active: bool) {}

    /// Advance the backend to `now`, redeeming tokens of finished transitions
    fn poll(&mut self, _now: Duration) {}
}

/// Whether a runner honours the requested start offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekPolicy {
    /// Start at `from`, finishing after the remaining play time
    #[default]
    Seek,
    /// Ignore `from` and always play the whole transition
    Restart,
}

/// Handle to a playback started by [`ClockedRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackId(pub u64);

/// A transition being played by [`ClockedRunner`]
#[derive(Debug)]
pub struct Playback<T> {
    /// Animated target
    pub target: T,
    /// Transition index
    pub index: usize,
    /// Clock time the playback began
    pub started_at: Duration,
    /// Clock time the playback finishes
    pub ends_at: Duration,
    token: CompletionToken,
}

/// Runner that plays transitions against a [`Clock`].
///
/// Playbacks finish when the clock passes their end time and the runner is
/// polled. Useful as a headless backend and for simulating list recycling.
pub struct ClockedRunner<T, Tr> {
    clock: Arc<dyn Clock>,
    policy: SeekPolicy,
    playing: BTreeMap<PlaybackId, Playback<T>>,
    next_id: u64,
    started: usize,
    stopped: usize,
    _transition: PhantomData<fn() -> Tr>,
}

impl<T, Tr> ClockedRunner<T, Tr> {
    /// Create a runner reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>, policy: SeekPolicy) -> Self {
        Self {
            clock,
            policy,
            playing: BTreeMap::new(),
            next_id: 0,
            started: 0,
            stopped: 0,
            _transition: PhantomData,
        }
    }

    /// Seek policy in use
    pub fn policy(&self) -> SeekPolicy {
        self.policy
    }

    /// Playbacks still running
    pub fn playing(&self) -> impl Iterator<Item = (PlaybackId, &Playback<T>)> {
        self.playing.iter().map(|(id, p)| (*id, p))
    }

    /// Number of playbacks still running
    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    /// Total transitions started
    pub fn started_count(&self) -> usize {
        self.started
    }

    /// Total transitions stopped before finishing
    pub fn stopped_count(&self) -> usize {
        self.stopped
    }
}

impl<T: PartialEq, Tr> ClockedRunner<T, Tr> {
    /// Whether `target` has a running playback
    pub fn is_playing(&self, target: &T) -> bool {
        self.playing.values().any(|p| &p.target == target)
    }
}

impl<T, Tr> TransitionRunner for ClockedRunner<T, Tr>
where
    T: Clone + Eq + Hash + Debug,
    Tr: Transition,
{
    type Target = T;
    type Transition = Tr;
    type Handle = PlaybackId;

    fn start(
        &mut self,
        request: StartRequest<'_, T, Tr>,
        token: CompletionToken,
    ) -> Result<PlaybackId, RunnerError> {
        let duration = request.transition.duration();
        let offset = match self.policy {
            SeekPolicy::Seek => request.from.min(duration),
            SeekPolicy::Restart => Duration::ZERO,
        };
        let now = self.clock.now();

        let id = PlaybackId(self.next_id);
        self.next_id += 1;
        self.started += 1;
        self.playing.insert(
            id,
            Playback {
                target: request.target.clone(),
                index: request.index,
                started_at: now,
                ends_at: now + (duration - offset),
                token,
            },
        );

        tracing::trace!(
            "Playback {:?} started for {:?} at index {} ({:?} in)",
            id,
            request.target,
            request.index,
            offset
        );
        Ok(id)
    }

    fn stop(&mut self, handle: PlaybackId) {
        if self.playing.remove(&handle).is_some() {
            self.stopped += 1;
        }
    }

    fn poll(&mut self, now: Duration) {
        let mut finished: Vec<_> = self
            .playing
            .iter()
            .filter(|(_, p)| p.ends_at <= now)
            .map(|(id, p)| (p.ends_at, *id))
            .collect();
        finished.sort_unstable();

        for (_, id) in finished {
            if let Some(playback) = self.playing.remove(&id) {
                playback.token.complete();
            }
        }
    }
}
