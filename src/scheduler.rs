//! Injectable timer scheduling.
//!
//! The engines never poll and never block; the only timing they need is
//! "run this callback every T until canceled", supplied by the embedder as
//! a [`Scheduler`] capability. Binding to a concrete event loop happens in
//! the embedding; [`ManualScheduler`] is the in-crate implementation, a
//! virtual clock advanced explicitly, which is both the test vehicle and a
//! reference for writing adapters.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// A cancelable handle to a scheduled periodic timer.
pub trait Timer {
    /// Stop the timer. Idempotent; ticks never fire after this returns.
    fn cancel(&self);
}

/// Capability for arming periodic timers.
///
/// Implementations must invoke `tick` every `interval` until the returned
/// handle is canceled. Callbacks run to completion on the engine's own
/// execution context (single-threaded cooperative model).
pub trait Scheduler {
    /// Arm a periodic timer.
    fn schedule_periodic(&self, interval: Duration, tick: Box<dyn FnMut()>) -> Box<dyn Timer>;
}

struct Entry {
    interval: Duration,
    due: Duration,
    tick: Rc<RefCell<Box<dyn FnMut()>>>,
    canceled: Rc<Cell<bool>>,
}

struct Inner {
    now: Duration,
    timers: Vec<Entry>,
}

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Clones share the same clock and timer table, so an engine can hold one
/// clone as its `Rc<dyn Scheduler>` while the embedder advances another.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stompwire::scheduler::{ManualScheduler, Scheduler};
///
/// let scheduler = ManualScheduler::new();
/// let fired = std::rc::Rc::new(std::cell::Cell::new(0));
/// let counter = fired.clone();
/// let timer = scheduler.schedule_periodic(
///     Duration::from_millis(100),
///     Box::new(move || counter.set(counter.get() + 1)),
/// );
///
/// scheduler.advance(Duration::from_millis(250));
/// assert_eq!(fired.get(), 2);
/// timer.cancel();
/// ```
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Rc<RefCell<Inner>>,
}

impl ManualScheduler {
    /// Create a scheduler with the clock at zero.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: Duration::ZERO,
                timers: Vec::new(),
            })),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Advance the virtual clock, firing every due tick in due-time order.
    /// A timer due several times within the window fires once per period.
    pub fn advance(&self, delta: Duration) {
        let target = self.inner.borrow().now + delta;

        loop {
            // Pick the next due timer while holding the borrow, then fire
            // the callback without it: ticks are free to cancel timers.
            let fire = {
                let mut inner = self.inner.borrow_mut();
                inner.timers.retain(|e| !e.canceled.get());

                let next = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| e.due)
                    .map(|(i, _)| i);

                match next {
                    None => {
                        inner.now = target;
                        None
                    }
                    Some(i) => {
                        let due = inner.timers[i].due;
                        inner.now = due;
                        inner.timers[i].due = due + inner.timers[i].interval;
                        Some((
                            inner.timers[i].tick.clone(),
                            inner.timers[i].canceled.clone(),
                        ))
                    }
                }
            };

            match fire {
                None => break,
                Some((tick, canceled)) => {
                    if !canceled.get() {
                        (tick.borrow_mut())();
                    }
                }
            }
        }
    }

    /// Number of armed (not canceled) timers.
    pub fn active_timers(&self) -> usize {
        self.inner
            .borrow()
            .timers
            .iter()
            .filter(|e| !e.canceled.get())
            .count()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

struct ManualTimer {
    canceled: Rc<Cell<bool>>,
}

impl Timer for ManualTimer {
    fn cancel(&self) {
        self.canceled.set(true);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_periodic(&self, interval: Duration, tick: Box<dyn FnMut()>) -> Box<dyn Timer> {
        let canceled = Rc::new(Cell::new(false));
        let mut inner = self.inner.borrow_mut();
        let due = inner.now + interval;
        inner.timers.push(Entry {
            interval,
            due,
            tick: Rc::new(RefCell::new(tick)),
            canceled: canceled.clone(),
        });
        Box::new(ManualTimer { canceled })
    }
}
