// SPDX-License-Identifier: MIT OR Apache-2.0
//! The staggered sequential-transition scheduler.
//!
//! ## Lifecycle of a slot
//!
//! - `Idle` until a run starts or the slot joins one in progress
//! - `Scheduled` while a timer is posted for its next transition
//! - `Transitioning` while the runner plays a transition; the timer for the
//!   following transition is posted at the same moment, chained to the
//!   current transition's nominal duration
//! - back to `Idle` when the last transition completes
//! - `Cancelled` once removed or rebound
//!
//! Everything runs on the thread that calls [`Scheduler::poll`]. Runners may
//! redeem completion tokens from anywhere; the signals are picked up on the
//! next poll.

use crate::clock::Clock;
use crate::config::{ConfigError, TransitionPlan};
use crate::guard::{CancellationGuard, Epoch};
use crate::registry::SlotRegistry;
use crate::runner::{
    CompletionSignal, CompletionToken, RunnerError, StartRequest, Ticket, TransitionRunner,
};
use crate::slot::{Slot, SlotCallback, SlotKey, SlotOutcome, SlotState, SlotTiming};
use crate::timer::{TimerEntry, TimerQueue};
use crate::timing::{Placement, TimingModel};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A run in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    /// Run identifier
    pub id: RunId,
    /// Clock time the run started
    pub base: Duration,
}

/// Timer payload: a snapshot of the slot taken when the timer was posted
#[derive(Debug, Clone)]
struct PendingTransition<T> {
    target: T,
    timing: SlotTiming,
    epoch: Epoch,
}

/// A transition the runner is currently playing
#[derive(Debug)]
struct ActiveTransition<T, H> {
    target: T,
    handle: H,
    ticket: Ticket,
}

/// Drives slots through a staggered sequence of transitions
pub struct Scheduler<R: TransitionRunner> {
    runner: R,
    clock: Arc<dyn Clock>,
    plan: Option<TransitionPlan<R::Target, R::Transition>>,
    timing: Option<Rc<TimingModel>>,
    registry: SlotRegistry<R::Target>,
    timers: TimerQueue<PendingTransition<R::Target>>,
    guard: CancellationGuard,
    active: HashMap<SlotKey, ActiveTransition<R::Target, R::Handle>>,
    transient: HashSet<R::Target>,
    run: Option<RunInfo>,
    completion_tx: Sender<CompletionSignal>,
    completion_rx: Receiver<CompletionSignal>,
    next_ticket: u64,
}

impl<R: TransitionRunner> Scheduler<R> {
    /// Create an unconfigured scheduler
    pub fn new(runner: R, clock: Arc<dyn Clock>) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel();
        Self {
            runner,
            clock,
            plan: None,
            timing: None,
            registry: SlotRegistry::new(),
            timers: TimerQueue::new(),
            guard: CancellationGuard::new(),
            active: HashMap::new(),
            transient: HashSet::new(),
            run: None,
            completion_tx,
            completion_rx,
            next_ticket: 0,
        }
    }

    /// Create a scheduler with a plan already configured
    pub fn with_plan(
        runner: R,
        clock: Arc<dyn Clock>,
        plan: TransitionPlan<R::Target, R::Transition>,
    ) -> Self {
        let mut scheduler = Self::new(runner, clock);
        scheduler.configure(plan);
        scheduler
    }

    /// Install a transition plan.
    ///
    /// Any run in progress is torn down first, since its timing was derived
    /// from the previous plan.
    pub fn configure(&mut self, plan: TransitionPlan<R::Target, R::Transition>) {
        if self.run.is_some() {
            self.cancel_and_reset();
        }
        let timing = plan.timing();
        tracing::debug!(
            "Configured {} transitions, total {:?}, {:?}",
            timing.len(),
            timing.total_duration(),
            plan.config()
        );
        self.timing = Some(Rc::new(timing));
        self.plan = Some(plan);
    }

    /// Build and install a plan from a supplier and signed millisecond delays
    pub fn configure_with(
        &mut self,
        supplier: impl Fn(Option<&R::Target>) -> Vec<R::Transition> + 'static,
        initial_delay_ms: i64,
        stagger_interval_ms: i64,
    ) -> Result<(), ConfigError> {
        let plan = TransitionPlan::builder()
            .delays_ms(initial_delay_ms, stagger_interval_ms)
            .supplier(supplier)
            .build()?;
        self.configure(plan);
        Ok(())
    }

    /// Whether a run can start: at least one slot and a non-empty sequence
    pub fn is_ready(&self) -> bool {
        !self.registry.is_empty() && self.timing.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Start, or restart, a full staggered run over every slot.
    ///
    /// Returns `false` without touching anything if the scheduler is not ready.
    pub fn animate(&mut self) -> bool {
        if !self.is_ready() {
            tracing::debug!("Animate requested before slots and plan were ready");
            return false;
        }
        let Some(timing) = self.timing.clone() else {
            return false;
        };

        self.cancel_all();
        self.guard.bump_all(self.registry.keys().collect::<Vec<_>>());

        let run = RunInfo {
            id: RunId::new(),
            base: self.clock.now(),
        };
        self.run = Some(run);

        for slot in self.registry.iter_mut() {
            slot.reset_transition_info();
            slot.state = SlotState::Idle;
        }

        let keys: Vec<_> = self.registry.keys().collect();
        for &key in &keys {
            let fire_at = run.base.saturating_add(timing.delay(key, 0));
            self.post_transition(key, fire_at, SlotTiming::initial());
        }

        tracing::info!("Run {} started with {} slots", run.id, keys.len());
        true
    }

    /// Bind `target` to `key`, joining a run in progress if there is one.
    ///
    /// - A slot elsewhere bound to `target` is cancelled and evicted first.
    /// - Rebinding `key` to the target it already holds only replaces the
    ///   callback when one is given.
    /// - Rebinding `key` to a different target cancels the old binding.
    ///
    /// When a run is in progress the new slot starts immediately at the right
    /// transition and offset if its window is open, gets a future timer if
    /// its window has not opened yet, and stays idle if it has closed.
    pub fn bind_slot(
        &mut self,
        key: SlotKey,
        target: R::Target,
        on_complete: Option<SlotCallback<R::Target>>,
    ) {
        if let Some(owner) = self.registry.find_by_target(&target) {
            if owner != key {
                tracing::debug!("Target {:?} moves from slot {} to {}", target, owner, key);
                self.remove_slot(owner);
            }
        }

        let same_target = self.registry.get(key).map(|slot| slot.target() == &target);
        match same_target {
            Some(true) => {
                if let (Some(callback), Some(slot)) = (on_complete, self.registry.get_mut(key)) {
                    slot.on_complete = Some(callback);
                }
                return;
            }
            Some(false) => {
                self.remove_slot(key);
            }
            None => {}
        }

        let mut slot = Slot::new(key, target);
        slot.on_complete = on_complete;
        self.registry.put(key, slot);

        self.transit_on_fly(key);
    }

    /// Bind stand-in targets to every key in `0..count` that is still free.
    ///
    /// `make_target` must produce distinct targets, otherwise later
    /// placeholders evict earlier ones.
    pub fn bind_placeholders(
        &mut self,
        count: usize,
        mut make_target: impl FnMut(SlotKey) -> R::Target,
    ) {
        for key in (0..count).map(SlotKey) {
            if !self.registry.contains_key(key) {
                let target = make_target(key);
                self.bind_slot(key, target, None);
            }
        }
    }

    /// Remove the slot at `key`.
    ///
    /// Its pending timer is cancelled, its active transition stopped and any
    /// completion still in flight is swallowed. Returns the cancelled record.
    pub fn remove_slot(&mut self, key: SlotKey) -> Option<Slot<R::Target>> {
        self.timers.cancel(key);
        self.guard.bump(key);
        self.stop_active(key);

        let mut slot = self.registry.remove(key)?;
        if slot.transition_index().is_some() {
            self.reset_target(slot.target());
        }
        slot.suppress_callback = true;
        slot.state = SlotState::Cancelled;
        self.refresh_transient(slot.target());

        tracing::debug!("Removed slot {} ({:?})", key, slot.target());
        Some(slot)
    }

    /// Cancel every timer and stop every transition, keeping the run's base
    /// time so later bindings still join at the right offset.
    pub fn cancel_all(&mut self) {
        self.timers.cancel_all();

        let keys: Vec<_> = self.active.keys().copied().collect();
        for key in keys {
            self.stop_active(key);
        }
        let touched: Vec<_> = self
            .registry
            .iter()
            .filter(|slot| slot.transition_index().is_some())
            .map(|slot| slot.target().clone())
            .collect();
        for target in &touched {
            self.reset_target(target);
        }

        for slot in self.registry.iter_mut() {
            if slot.state.is_busy() {
                slot.state = SlotState::Idle;
            }
        }
        for target in std::mem::take(&mut self.transient) {
            self.runner.set_transient_state(&target, false);
        }
    }

    /// Tear everything down: cancel all work, invalidate every in-flight
    /// signal, forget the run and clear every slot's progress. A following
    /// [`animate`](Self::animate) behaves like a freshly configured scheduler.
    pub fn cancel_and_reset(&mut self) {
        self.cancel_all();
        self.guard.bump_all(self.registry.keys().collect::<Vec<_>>());
        for slot in self.registry.iter_mut() {
            slot.timing = SlotTiming::default();
            slot.suppress_callback = true;
        }
        if let Some(run) = self.run.take() {
            tracing::info!("Run {} cancelled and reset", run.id);
        }
    }

    /// Process everything that is due: completion signals and timers.
    ///
    /// Returns the number of signals and timers handled.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        let mut handled = 0;

        loop {
            self.runner.poll(now);

            let mut progressed = false;
            while let Ok(signal) = self.completion_rx.try_recv() {
                self.handle_completion(signal);
                handled += 1;
                progressed = true;
            }

            if let Some(entry) = self.timers.pop_due(now) {
                self.fire(entry, now);
                handled += 1;
                progressed = true;
            }

            if !progressed {
                return handled;
            }
        }
    }

    /// Handle a due timer
    fn fire(&mut self, entry: TimerEntry<PendingTransition<R::Target>>, now: Duration) {
        let key = entry.key;
        let pending = entry.payload;

        if !self.registry.is_bound_at(key, &pending.target) || !self.guard.admits(key, pending.epoch)
        {
            tracing::trace!("Dropping stale timer for slot {} ({:?})", key, pending.target);
            self.refresh_transient(&pending.target);
            return;
        }

        let lateness = now.saturating_sub(entry.fire_at);
        self.transit_and_request_next(key, pending.timing, lateness, entry.fire_at);
    }

    /// Start the transition described by `timing` and chain the next one.
    ///
    /// `anchor` is the nominal start time the chained delay is measured from;
    /// `lateness` is how far past it the start actually happens.
    fn transit_and_request_next(
        &mut self,
        key: SlotKey,
        timing: SlotTiming,
        lateness: Duration,
        anchor: Duration,
    ) {
        let Some(model) = self.timing.clone() else {
            return;
        };
        let Some(target) = self.registry.get(key).map(|slot| slot.target().clone()) else {
            return;
        };
        let Some(transitions) = self.plan.as_ref().map(|plan| plan.transitions(&target)) else {
            return;
        };

        // Whatever is still playing here belongs to an earlier transition
        self.stop_active(key);

        let index = timing.index();
        let len = transitions.len();
        let Some(transition) = transitions.into_iter().nth(index) else {
            self.fail_slot(key, RunnerError::IndexOutOfRange { index, len });
            return;
        };

        let epoch = self.guard.current(key);
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        let token = CompletionToken::new(
            CompletionSignal {
                key,
                epoch,
                index,
                ticket,
            },
            self.completion_tx.clone(),
        );
        let request = StartRequest {
            key,
            target: &target,
            index,
            transition,
            from: timing.elapsed + lateness,
        };

        match self.runner.start(request, token) {
            Ok(handle) => {
                self.active.insert(
                    key,
                    ActiveTransition {
                        target: target.clone(),
                        handle,
                        ticket,
                    },
                );
                if let Some(slot) = self.registry.get_mut(key) {
                    slot.timing = timing;
                    slot.state = SlotState::Transitioning;
                }
                tracing::debug!(
                    "Slot {} started transition {} from {:?}",
                    key,
                    index,
                    timing.elapsed + lateness
                );

                if !model.is_last(index) {
                    let next = timing.next();
                    let delay = model.delay(key, next.index()).saturating_sub(timing.elapsed);
                    self.post_transition(key, anchor.saturating_add(delay), next);
                }
            }
            Err(err) => {
                tracing::warn!("Slot {} failed to start transition {}: {}", key, index, err);
                self.fail_slot(key, err);
            }
        }

        self.refresh_transient(&target);
    }

    /// Post the timer for `timing` on `key`, replacing any pending one
    fn post_transition(&mut self, key: SlotKey, fire_at: Duration, timing: SlotTiming) {
        let Some(slot) = self.registry.get_mut(key) else {
            return;
        };
        let target = slot.target().clone();
        if slot.state != SlotState::Transitioning {
            slot.state = SlotState::Scheduled;
        }

        let pending = PendingTransition {
            target: target.clone(),
            timing,
            epoch: self.guard.current(key),
        };
        self.timers.post(key, fire_at, pending);
        self.refresh_transient(&target);
    }

    /// Join the run in progress, if any, at the slot's current position
    fn transit_on_fly(&mut self, key: SlotKey) {
        let (Some(run), Some(timing)) = (self.run, self.timing.clone()) else {
            return;
        };
        let now = self.clock.now();
        let elapsed = now.saturating_sub(run.base);

        match timing.placement(key, elapsed) {
            Placement::Within { index, play_time } => {
                tracing::debug!(
                    "Slot {} joins run {} mid-flight at transition {} (+{:?})",
                    key,
                    run.id,
                    index,
                    play_time
                );
                self.transit_and_request_next(
                    key,
                    SlotTiming::at(index, play_time),
                    Duration::ZERO,
                    now,
                );
            }
            Placement::Before { .. } => {
                let fire_at = run.base.saturating_add(timing.delay(key, 0));
                self.post_transition(key, fire_at, SlotTiming::initial());
            }
            Placement::After => {
                tracing::debug!("Slot {} bound after its window in run {}", key, run.id);
            }
        }
    }

    /// Handle a completion signal from the runner
    fn handle_completion(&mut self, signal: CompletionSignal) {
        let key = signal.key;
        let current = self
            .active
            .get(&key)
            .is_some_and(|active| active.ticket == signal.ticket);
        if !current {
            tracing::trace!("Ignoring completion of stopped transition on slot {}", key);
            return;
        }
        if let Some(active) = self.active.remove(&key) {
            self.refresh_transient(&active.target);
        }

        if !self.guard.admits(key, signal.epoch) {
            tracing::trace!("Ignoring stale completion on slot {} ({})", key, signal.epoch);
            return;
        }
        let is_last = self.timing.as_ref().is_some_and(|t| t.is_last(signal.index));
        let has_pending = self.timers.contains(key);

        let Some(slot) = self.registry.get_mut(key) else {
            tracing::debug!("Completion for unknown slot {}", key);
            return;
        };
        if is_last {
            slot.state = SlotState::Idle;
            tracing::debug!("Slot {} finished its sequence", key);
            slot.notify(SlotOutcome::Completed);
        } else {
            slot.state = if has_pending {
                SlotState::Scheduled
            } else {
                SlotState::Idle
            };
        }
    }

    /// Leave a slot idle after the runner refused to start it
    fn fail_slot(&mut self, key: SlotKey, err: RunnerError) {
        self.timers.cancel(key);
        let Some(slot) = self.registry.get_mut(key) else {
            return;
        };
        slot.state = SlotState::Idle;
        slot.notify(SlotOutcome::Failed(err));
        let target = slot.target().clone();
        self.refresh_transient(&target);
    }

    /// Stop the transition playing at `key`, if any
    fn stop_active(&mut self, key: SlotKey) {
        if let Some(active) = self.active.remove(&key) {
            self.runner.stop(active.handle);
            self.refresh_transient(&active.target);
        }
    }

    /// Ask the runner to restore a target's pre-sequence appearance
    fn reset_target(&mut self, target: &R::Target) {
        if let Some(plan) = self.plan.as_ref() {
            let sequence = plan.transitions(target);
            self.runner.reset(target, &sequence);
        }
    }

    /// Sync a target's transient flag with whether its slot has work left
    fn refresh_transient(&mut self, target: &R::Target) {
        let busy = self
            .registry
            .find_by_target(target)
            .is_some_and(|key| self.timers.contains(key) || self.active.contains_key(&key));

        if busy {
            if self.transient.insert(target.clone()) {
                self.runner.set_transient_state(target, true);
            }
        } else if self.transient.remove(target) {
            self.runner.set_transient_state(target, false);
        }
    }

    /// Slot at `key`
    pub fn slot(&self, key: SlotKey) -> Option<&Slot<R::Target>> {
        self.registry.get(key)
    }

    /// State of the slot at `key`
    pub fn slot_state(&self, key: SlotKey) -> Option<SlotState> {
        self.registry.get(key).map(Slot::state)
    }

    /// Key of the slot bound to `target`
    pub fn key_of(&self, target: &R::Target) -> Option<SlotKey> {
        self.registry.find_by_target(target)
    }

    /// Slots in ascending key order
    pub fn slots(&self) -> impl Iterator<Item = &Slot<R::Target>> {
        self.registry.iter()
    }

    /// Number of bound slots
    pub fn slot_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of pending timers
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Fire time of the timer pending for `key`
    pub fn pending_fire_time(&self, key: SlotKey) -> Option<Duration> {
        self.timers.get(key).map(|entry| entry.fire_at)
    }

    /// Transition index the timer pending for `key` will start
    pub fn pending_transition_index(&self, key: SlotKey) -> Option<usize> {
        self.timers.get(key).map(|entry| entry.payload.timing.index())
    }

    /// Earliest pending fire time
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Whether `target` carries scheduler-owned transient state
    pub fn has_transient_state(&self, target: &R::Target) -> bool {
        self.transient.contains(target)
    }

    /// Whether any slot has pending or running work
    pub fn is_running(&self) -> bool {
        !self.timers.is_empty() || !self.active.is_empty()
    }

    /// The run in progress
    pub fn run(&self) -> Option<RunInfo> {
        self.run
    }

    /// Identifier of the run in progress
    pub fn run_id(&self) -> Option<RunId> {
        self.run.map(|run| run.id)
    }

    /// Timing model of the configured plan
    pub fn timing(&self) -> Option<&TimingModel> {
        self.timing.as_deref()
    }

    /// The configured plan
    pub fn plan(&self) -> Option<&TransitionPlan<R::Target, R::Transition>> {
        self.plan.as_ref()
    }

    /// The transition backend
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Mutable transition backend
    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    /// The scheduler's clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::runner::{ClockedRunner, SeekPolicy};
    use crate::slot::SlotEvent;
    use std::cell::RefCell;

    type Target = &'static str;
    type Events = Rc<RefCell<Vec<(SlotKey, Target, SlotOutcome)>>>;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Start {
            key: SlotKey,
            target: Target,
            index: usize,
            from: Duration,
        },
        Stop(u64),
        Reset(Target),
    }

    /// Runner that records calls and completes only when told to
    #[derive(Default)]
    struct RecordingRunner {
        calls: Vec<Call>,
        live: HashMap<u64, (Target, CompletionToken)>,
        stopped: HashMap<u64, CompletionToken>,
        transient: HashMap<Target, bool>,
        fail_index: Option<usize>,
        next_handle: u64,
    }

    impl RecordingRunner {
        fn starts(&self) -> Vec<(SlotKey, Target, usize, Duration)> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Start {
                        key,
                        target,
                        index,
                        from,
                    } => Some((*key, *target, *index, *from)),
                    _ => None,
                })
                .collect()
        }

        /// Finish the transition playing on `target`
        fn finish(&mut self, target: Target) {
            let handle = self
                .live
                .iter()
                .find(|(_, entry)| entry.0 == target)
                .map(|(h, _)| *h);
            if let Some((_, token)) = handle.and_then(|h| self.live.remove(&h)) {
                token.complete();
            }
        }

        /// Misbehave: redeem a token after its transition was stopped
        fn finish_stopped(&mut self) {
            for (_, token) in self.stopped.drain() {
                token.complete();
            }
        }
    }

    impl TransitionRunner for RecordingRunner {
        type Target = Target;
        type Transition = Duration;
        type Handle = u64;

        fn start(
            &mut self,
            request: StartRequest<'_, Target, Duration>,
            token: CompletionToken,
        ) -> Result<u64, RunnerError> {
            if self.fail_index == Some(request.index) {
                return Err(RunnerError::Rejected("no surface".to_string()));
            }
            let handle = self.next_handle;
            self.next_handle += 1;
            self.calls.push(Call::Start {
                key: request.key,
                target: *request.target,
                index: request.index,
                from: request.from,
            });
            self.live.insert(handle, (*request.target, token));
            Ok(handle)
        }

        fn stop(&mut self, handle: u64) {
            self.calls.push(Call::Stop(handle));
            if let Some((_, token)) = self.live.remove(&handle) {
                self.stopped.insert(handle, token);
            }
        }

        fn reset(&mut self, target: &Target, _sequence: &[Duration]) {
            self.calls.push(Call::Reset(*target));
        }

        fn set_transient_state(&mut self, target: &Target, active: bool) {
            self.transient.insert(*target, active);
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn plan(initial: i64, stagger: i64, durations: &[u64]) -> TransitionPlan<Target, Duration> {
        let durations: Vec<Duration> = durations.iter().copied().map(ms).collect();
        TransitionPlan::builder()
            .delays_ms(initial, stagger)
            .supplier(move |_| durations.clone())
            .build()
            .unwrap()
    }

    fn recording(
        initial: i64,
        stagger: i64,
        durations: &[u64],
    ) -> (Scheduler<RecordingRunner>, ManualClock) {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_plan(
            RecordingRunner::default(),
            Arc::new(clock.clone()),
            plan(initial, stagger, durations),
        );
        (scheduler, clock)
    }

    fn recorder() -> Events {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn callback(events: &Events) -> Option<SlotCallback<Target>> {
        let events = Rc::clone(events);
        Some(Box::new(move |event: SlotEvent<'_, Target>| {
            events
                .borrow_mut()
                .push((event.key, *event.target, event.outcome));
        }))
    }

    #[test]
    fn test_animate_requires_slots_and_plan() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(RecordingRunner::default(), Arc::new(clock));
        scheduler.bind_slot(SlotKey(0), "a", None);
        assert!(!scheduler.animate());

        scheduler.configure(plan(0, 0, &[]));
        assert!(!scheduler.animate());

        scheduler.configure(plan(0, 0, &[100]));
        assert!(scheduler.animate());
        assert!(scheduler.run().is_some());
    }

    #[test]
    fn test_configure_rejects_negative_delays() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(RecordingRunner::default(), Arc::new(clock));
        for _ in 0..2 {
            assert!(matches!(
                scheduler.configure_with(|_| vec![ms(10)], -1, 10),
                Err(ConfigError::NegativeInitialDelay(-1))
            ));
            assert!(matches!(
                scheduler.configure_with(|_| vec![ms(10)], 10, -1),
                Err(ConfigError::NegativeStaggerInterval(-1))
            ));
        }
        assert!(scheduler.plan().is_none());
    }

    #[test]
    fn test_initial_timers_are_staggered() {
        let (mut scheduler, _clock) = recording(20, 50, &[100, 200]);
        for (key, target) in [(0, "a"), (1, "b"), (2, "c")] {
            scheduler.bind_slot(SlotKey(key), target, None);
        }
        assert!(scheduler.animate());

        assert_eq!(scheduler.pending_fire_time(SlotKey(0)), Some(ms(20)));
        assert_eq!(scheduler.pending_fire_time(SlotKey(1)), Some(ms(70)));
        assert_eq!(scheduler.pending_fire_time(SlotKey(2)), Some(ms(120)));
        assert_eq!(scheduler.slot_state(SlotKey(1)), Some(SlotState::Scheduled));
    }

    #[test]
    fn test_at_most_one_timer_per_key() {
        let (mut scheduler, clock) = recording(0, 50, &[100, 200, 150]);
        for (key, target) in [(0, "a"), (1, "b"), (2, "c")] {
            scheduler.bind_slot(SlotKey(key), target, None);
        }
        scheduler.animate();
        scheduler.animate();
        assert_eq!(scheduler.pending_timers(), 3);

        // Starting a transition replaces the slot's timer with the chained one
        scheduler.poll();
        assert_eq!(scheduler.pending_timers(), 3);
        assert_eq!(scheduler.pending_transition_index(SlotKey(0)), Some(1));

        clock.advance_ms(60);
        scheduler.bind_slot(SlotKey(2), "c", None);
        scheduler.poll();
        assert_eq!(scheduler.pending_timers(), 3);
    }

    #[test]
    fn test_transitions_chain_on_nominal_durations() {
        let (mut scheduler, clock) = recording(0, 0, &[100, 200, 150]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();

        scheduler.poll();
        assert_eq!(scheduler.pending_fire_time(SlotKey(0)), Some(ms(100)));

        clock.set(ms(100));
        scheduler.poll();
        assert_eq!(scheduler.pending_fire_time(SlotKey(0)), Some(ms(300)));

        clock.set(ms(300));
        scheduler.poll();
        assert_eq!(scheduler.pending_timers(), 0);

        let indices: Vec<_> = scheduler.runner().starts().iter().map(|s| s.2).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_non_last_completion_never_notifies() {
        let events = recorder();
        let (mut scheduler, _clock) = recording(0, 0, &[100, 200]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();

        scheduler.runner_mut().finish("a");
        scheduler.poll();

        assert!(events.borrow().is_empty());
        assert_eq!(scheduler.slot_state(SlotKey(0)), Some(SlotState::Scheduled));
    }

    #[test]
    fn test_last_completion_notifies_once_and_idles() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 0, &[100, 200]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(100));
        scheduler.poll();
        assert_eq!(
            scheduler.slot_state(SlotKey(0)),
            Some(SlotState::Transitioning)
        );

        clock.set(ms(300));
        scheduler.runner_mut().finish("a");
        scheduler.poll();
        scheduler.poll();

        assert_eq!(
            *events.borrow(),
            vec![(SlotKey(0), "a", SlotOutcome::Completed)]
        );
        assert_eq!(scheduler.slot_state(SlotKey(0)), Some(SlotState::Idle));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_single_transition_is_always_terminal() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 30, &[80]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.bind_slot(SlotKey(1), "b", callback(&events));
        scheduler.animate();

        clock.set(ms(30));
        scheduler.poll();
        assert_eq!(scheduler.pending_timers(), 0);

        scheduler.runner_mut().finish("a");
        scheduler.runner_mut().finish("b");
        scheduler.poll();

        let keys: Vec<_> = events.borrow().iter().map(|e| e.0).collect();
        assert_eq!(keys, vec![SlotKey(0), SlotKey(1)]);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_mid_flight_join_starts_at_offset() {
        let (mut scheduler, clock) = recording(0, 50, &[100, 200, 150]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(210));
        scheduler.bind_slot(SlotKey(1), "b", None);

        let starts = scheduler.runner().starts();
        assert_eq!(starts.last(), Some(&(SlotKey(1), "b", 1, ms(60))));
        assert_eq!(
            scheduler.slot_state(SlotKey(1)),
            Some(SlotState::Transitioning)
        );
        // Transition 1 has 140 ms left
        assert_eq!(scheduler.pending_fire_time(SlotKey(1)), Some(ms(350)));
        assert_eq!(scheduler.pending_transition_index(SlotKey(1)), Some(2));
    }

    #[test]
    fn test_join_before_window_posts_future_timer() {
        let (mut scheduler, clock) = recording(0, 50, &[100]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();

        clock.set(ms(120));
        scheduler.bind_slot(SlotKey(4), "e", None);
        assert_eq!(scheduler.pending_fire_time(SlotKey(4)), Some(ms(200)));
        assert_eq!(scheduler.pending_transition_index(SlotKey(4)), Some(0));
    }

    #[test]
    fn test_join_after_window_stays_idle() {
        let (mut scheduler, clock) = recording(0, 10, &[100]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();

        clock.set(ms(500));
        scheduler.bind_slot(SlotKey(1), "b", None);
        assert_eq!(scheduler.slot_state(SlotKey(1)), Some(SlotState::Idle));
        assert!(scheduler.pending_fire_time(SlotKey(1)).is_none());
        assert!(!scheduler.has_transient_state(&"b"));
    }

    #[test]
    fn test_rebinding_target_evicts_previous_slot() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 50, &[100, 200]);
        scheduler.bind_slot(SlotKey(0), "view", callback(&events));
        scheduler.bind_slot(SlotKey(1), "other", None);
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(60));
        scheduler.bind_slot(SlotKey(3), "view", None);

        assert!(scheduler.slot(SlotKey(0)).is_none());
        assert!(scheduler.pending_fire_time(SlotKey(0)).is_none());
        assert_eq!(scheduler.key_of(&"view"), Some(SlotKey(3)));
        assert!(scheduler.runner().calls.contains(&Call::Stop(0)));

        // A backend that completes a stopped transition anyway is ignored
        scheduler.runner_mut().finish_stopped();
        clock.set(ms(1000));
        scheduler.poll();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_rebinding_key_to_new_target() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 0, &[100, 100]);
        scheduler.bind_slot(SlotKey(0), "old", callback(&events));
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(150));
        scheduler.bind_slot(SlotKey(0), "new", None);

        assert_eq!(scheduler.key_of(&"old"), None);
        assert!(scheduler.runner().calls.contains(&Call::Reset("old")));
        let starts = scheduler.runner().starts();
        assert_eq!(starts.last(), Some(&(SlotKey(0), "new", 1, ms(50))));

        scheduler.runner_mut().finish_stopped();
        scheduler.poll();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_bind_same_target_is_noop() {
        let (mut scheduler, clock) = recording(0, 0, &[100, 100]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(50));
        scheduler.bind_slot(SlotKey(0), "a", None);
        assert_eq!(scheduler.runner().starts().len(), 1);
        assert!(!scheduler
            .runner()
            .calls
            .iter()
            .any(|c| matches!(c, Call::Stop(_))));
    }

    #[test]
    fn test_remove_then_late_completion_is_absorbed() {
        let events = recorder();
        let (mut scheduler, _clock) = recording(0, 0, &[100]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();

        let removed = scheduler.remove_slot(SlotKey(0)).unwrap();
        assert_eq!(removed.state(), SlotState::Cancelled);
        assert!(removed.is_suppressed());

        scheduler.runner_mut().finish_stopped();
        scheduler.poll();
        assert!(events.borrow().is_empty());
        assert!(scheduler.remove_slot(SlotKey(0)).is_none());
    }

    #[test]
    fn test_runner_failure_leaves_slot_idle() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 0, &[100, 100]);
        scheduler.runner_mut().fail_index = Some(1);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();

        clock.set(ms(100));
        scheduler.poll();

        assert_eq!(
            *events.borrow(),
            vec![(
                SlotKey(0),
                "a",
                SlotOutcome::Failed(RunnerError::Rejected("no surface".to_string()))
            )]
        );
        assert_eq!(scheduler.slot_state(SlotKey(0)), Some(SlotState::Idle));
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_transient_state_follows_pending_work() {
        let (mut scheduler, clock) = recording(0, 0, &[100]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        assert!(!scheduler.has_transient_state(&"a"));

        scheduler.animate();
        assert!(scheduler.has_transient_state(&"a"));

        scheduler.poll();
        clock.set(ms(100));
        scheduler.runner_mut().finish("a");
        scheduler.poll();

        assert!(!scheduler.has_transient_state(&"a"));
        assert_eq!(scheduler.runner().transient.get("a"), Some(&false));
    }

    #[test]
    fn test_cancel_all_keeps_run_base() {
        let (mut scheduler, clock) = recording(0, 50, &[100, 200]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();
        scheduler.poll();

        scheduler.cancel_all();
        assert_eq!(scheduler.pending_timers(), 0);
        assert!(scheduler.run().is_some());
        assert_eq!(scheduler.slot_state(SlotKey(0)), Some(SlotState::Idle));

        clock.set(ms(80));
        scheduler.bind_slot(SlotKey(1), "b", None);
        assert_eq!(scheduler.runner().starts().last().map(|s| s.3), Some(ms(30)));
    }

    #[test]
    fn test_restart_absorbs_late_completion() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 0, &[100, 200]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();
        let first_run = scheduler.run_id();

        clock.set(ms(50));
        assert!(scheduler.animate());
        assert_ne!(scheduler.run_id(), first_run);
        assert!(scheduler.runner().calls.contains(&Call::Stop(0)));

        // The first run's transition reports in after the restart
        scheduler.runner_mut().finish_stopped();
        scheduler.poll();

        assert!(events.borrow().is_empty());
        assert_eq!(
            scheduler.slot_state(SlotKey(0)),
            Some(SlotState::Transitioning)
        );
        let starts = scheduler.runner().starts();
        assert_eq!(starts.last(), Some(&(SlotKey(0), "a", 0, Duration::ZERO)));
    }

    #[test]
    fn test_cancel_and_reset_absorbs_late_completion() {
        let events = recorder();
        let (mut scheduler, clock) = recording(0, 0, &[100]);
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.animate();
        scheduler.poll();

        scheduler.cancel_and_reset();
        assert!(scheduler.runner().calls.contains(&Call::Reset("a")));

        clock.set(ms(100));
        scheduler.runner_mut().finish_stopped();
        scheduler.poll();

        assert!(events.borrow().is_empty());
        assert_eq!(scheduler.slot_state(SlotKey(0)), Some(SlotState::Idle));
        assert!(!scheduler.has_transient_state(&"a"));
    }

    #[test]
    fn test_late_poll_seeks_and_keeps_anchor() {
        let (mut scheduler, clock) = recording(0, 0, &[100, 200, 150]);
        scheduler.bind_slot(SlotKey(0), "a", None);
        scheduler.animate();
        scheduler.poll();
        assert_eq!(scheduler.pending_fire_time(SlotKey(0)), Some(ms(100)));

        // Transition 1 was due at 100 ms
        clock.set(ms(130));
        scheduler.poll();

        let starts = scheduler.runner().starts();
        assert_eq!(starts.last(), Some(&(SlotKey(0), "a", 1, ms(30))));
        assert_eq!(scheduler.pending_fire_time(SlotKey(0)), Some(ms(300)));
        assert_eq!(scheduler.pending_transition_index(SlotKey(0)), Some(2));
    }

    #[test]
    fn test_cancel_and_reset_then_animate_matches_fresh_schedule() {
        let setup = |scheduler: &mut Scheduler<RecordingRunner>| {
            for (key, target) in [(0, "a"), (2, "c"), (5, "f")] {
                scheduler.bind_slot(SlotKey(key), target, None);
            }
        };
        let schedule = |scheduler: &Scheduler<RecordingRunner>| -> Vec<(SlotKey, Duration)> {
            let base = scheduler.run().map(|r| r.base).unwrap_or_default();
            scheduler
                .slots()
                .filter_map(|s| Some((s.key(), scheduler.pending_fire_time(s.key())? - base)))
                .collect()
        };

        let (mut fresh, _fresh_clock) = recording(40, 25, &[100, 60]);
        setup(&mut fresh);
        fresh.animate();

        let (mut reused, clock) = recording(40, 25, &[100, 60]);
        setup(&mut reused);
        reused.animate();
        clock.set(ms(130));
        reused.poll();
        reused.cancel_and_reset();
        assert!(reused.run().is_none());
        assert!(reused.slots().all(|s| s.transition_index().is_none()));

        reused.animate();
        assert_eq!(schedule(&reused), schedule(&fresh));
        assert!(reused.slots().all(|s| !s.is_suppressed()));
    }

    #[test]
    fn test_bind_placeholders_fills_free_keys() {
        let (mut scheduler, _clock) = recording(0, 10, &[100]);
        scheduler.bind_slot(SlotKey(1), "real", None);
        let names = ["p0", "p1", "p2"];
        scheduler.bind_placeholders(3, |key| names[key.ordinal()]);

        assert_eq!(scheduler.slot_count(), 3);
        assert_eq!(*scheduler.slot(SlotKey(1)).unwrap().target(), "real");
        assert_eq!(*scheduler.slot(SlotKey(2)).unwrap().target(), "p2");
    }

    #[test]
    fn test_end_to_end_with_clocked_runner() {
        let events = recorder();
        let clock = ManualClock::new();
        let runner: ClockedRunner<Target, Duration> =
            ClockedRunner::new(Arc::new(clock.clone()), SeekPolicy::Seek);
        let mut scheduler =
            Scheduler::with_plan(runner, Arc::new(clock.clone()), plan(0, 50, &[100, 200, 150]));
        scheduler.bind_slot(SlotKey(0), "a", callback(&events));
        scheduler.bind_slot(SlotKey(1), "b", callback(&events));
        scheduler.animate();

        while clock.now() <= ms(1000) {
            scheduler.poll();
            clock.advance_ms(10);
        }

        let finished: Vec<_> = events.borrow().iter().map(|e| (e.0, e.2.clone())).collect();
        assert_eq!(
            finished,
            vec![
                (SlotKey(0), SlotOutcome::Completed),
                (SlotKey(1), SlotOutcome::Completed)
            ]
        );
        assert_eq!(scheduler.runner().started_count(), 6);
        assert!(!scheduler.is_running());
        assert!(scheduler.slots().all(|s| s.state() == SlotState::Idle));
    }
}
