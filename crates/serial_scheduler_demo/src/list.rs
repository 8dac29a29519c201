// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless virtualized list.
//!
//! A fixed pool of row views is bound to positions in a longer data set.
//! Scrolling recycles the view that leaves the top of the viewport to the
//! position entering at the bottom, which rebinds it while the staggered
//! run is still in progress.
//!
//! Before real views exist every visible position holds a stand-in, so a
//! run can be primed early; attaching the real views rebinds those
//! positions.

use crate::settings::DemoSettings;
use serial_scheduler::{
    ClockedRunner, ConfigError, ManualClock, Scheduler, SeekPolicy, SlotCallback, SlotEvent,
    SlotKey, SlotOutcome, TransitionPlan,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// A row view bound to a list position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowView {
    /// Stand-in holding a position until real views are attached
    Placeholder(usize),
    /// Recyclable view from the pool
    View(usize),
}

impl fmt::Display for RowView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder(n) => write!(f, "stand-in{n}"),
            Self::View(n) => write!(f, "view{n}"),
        }
    }
}

/// Finished rows, in completion order
type FinishLog = Rc<RefCell<Vec<(SlotKey, RowView)>>>;

/// Simulated list driven by a manual clock
pub struct VirtualList {
    scheduler: Scheduler<ClockedRunner<RowView, Duration>>,
    clock: ManualClock,
    rows: usize,
    visible: usize,
    first_visible: usize,
    finished: FinishLog,
    failed: Rc<RefCell<usize>>,
}

impl VirtualList {
    /// Build the list with a stand-in at every visible position
    pub fn new(settings: &DemoSettings) -> Result<Self, ConfigError> {
        let transitions = settings.transitions();
        let plan = TransitionPlan::builder()
            .settings(settings.schedule)
            .supplier(move |_| transitions.clone())
            .build()?;

        let clock = ManualClock::new();
        let runner = ClockedRunner::new(Arc::new(clock.clone()), SeekPolicy::Seek);
        let scheduler = Scheduler::with_plan(runner, Arc::new(clock.clone()), plan);

        let visible = settings.visible_rows.min(settings.rows);
        let mut list = Self {
            scheduler,
            clock,
            rows: settings.rows,
            visible,
            first_visible: 0,
            finished: Rc::new(RefCell::new(Vec::new())),
            failed: Rc::new(RefCell::new(0)),
        };

        list.scheduler
            .bind_placeholders(visible, |key| RowView::Placeholder(key.ordinal()));
        Ok(list)
    }

    /// Replace the stand-ins with the view pool.
    ///
    /// Returns the number of positions rebound.
    pub fn attach_views(&mut self) -> usize {
        let mut attached = 0;
        for ordinal in self.first_visible..self.first_visible + self.visible {
            let key = SlotKey(ordinal);
            let holds_placeholder = self
                .scheduler
                .slot(key)
                .is_some_and(|slot| matches!(slot.target(), RowView::Placeholder(_)));
            if holds_placeholder {
                let callback = self.callback();
                self.scheduler
                    .bind_slot(key, RowView::View(ordinal - self.first_visible), Some(callback));
                attached += 1;
            }
        }
        tracing::debug!("Attached {} row views", attached);
        attached
    }

    fn callback(&self) -> SlotCallback<RowView> {
        let finished = Rc::clone(&self.finished);
        let failed = Rc::clone(&self.failed);
        Box::new(move |event: SlotEvent<'_, RowView>| match event.outcome {
            SlotOutcome::Completed => {
                tracing::info!("Row {} ({}) finished", event.key, event.target);
                finished.borrow_mut().push((event.key, *event.target));
            }
            SlotOutcome::Failed(err) => {
                tracing::warn!("Row {} ({}) failed: {}", event.key, event.target, err);
                *failed.borrow_mut() += 1;
            }
        })
    }

    /// Start the staggered run
    pub fn start(&mut self) -> bool {
        self.scheduler.animate()
    }

    /// Scroll down by `rows`, recycling views off the top to the bottom.
    ///
    /// Returns the number of views recycled.
    pub fn scroll_by(&mut self, rows: usize) -> usize {
        let max_first = self.rows.saturating_sub(self.visible);
        let target_first = (self.first_visible + rows).min(max_first);
        let mut recycled = 0;

        while self.first_visible < target_first {
            let old_key = SlotKey(self.first_visible);
            let new_key = SlotKey(self.first_visible + self.visible);
            if let Some(view) = self.scheduler.slot(old_key).map(|slot| *slot.target()) {
                tracing::debug!("Recycling {} from row {} to row {}", view, old_key, new_key);
                let callback = self.callback();
                self.scheduler.bind_slot(new_key, view, Some(callback));
                recycled += 1;
            }
            self.first_visible += 1;
        }
        recycled
    }

    /// Advance the clock and process whatever became due
    pub fn tick(&mut self, millis: u64) -> usize {
        self.clock.advance_ms(millis);
        self.scheduler.poll()
    }

    /// Run the whole simulation described by `settings`
    pub fn run(&mut self, settings: &DemoSettings) {
        let tick = settings.tick_ms.max(1);
        let mut since_scroll = 0;

        self.attach_views();
        self.start();
        self.scheduler.poll();

        let mut elapsed = 0;
        while elapsed < settings.duration_ms {
            self.tick(tick);
            elapsed += tick;
            since_scroll += tick;

            if settings.scroll_every_ms > 0 && since_scroll >= settings.scroll_every_ms {
                since_scroll = 0;
                self.scroll_by(1);
            }
        }
    }

    /// Rows that finished their sequence
    pub fn finished(&self) -> Vec<(SlotKey, RowView)> {
        self.finished.borrow().clone()
    }

    /// Number of rows whose transition failed to start
    pub fn failed_count(&self) -> usize {
        *self.failed.borrow()
    }

    /// First visible data row
    pub fn first_visible(&self) -> usize {
        self.first_visible
    }

    /// The underlying scheduler
    pub fn scheduler(&self) -> &Scheduler<ClockedRunner<RowView, Duration>> {
        &self.scheduler
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        use serial_scheduler::Clock;
        self.clock.now()
    }
}
