//! Timer lifecycle tracking
//!
//! A [`TimerQueue`] stands in for the host event loop's native timer
//! facility: it owns every scheduled callback and a virtual clock. The
//! [`TimerTracker`] wraps `setTimeout`/`setInterval` for one run, recording
//! each handle it hands out so the whole run can be cancelled in bulk before
//! the next run starts or when the sandbox is torn down.

use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Persistent, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// Smallest period an interval may have
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Largest delay accepted (2^31 - 1 ms, as in browsers)
pub const MAX_DELAY_MS: f64 = 2_147_483_647.0;

/// Opaque timer id returned to user code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    Timeout,
    Interval,
}

/// A timer recorded for bulk cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTimer {
    pub handle: TimerHandle,
    pub kind: TimerKind,
}

#[derive(Debug)]
struct Scheduled<C> {
    due: Duration,
    period: Option<Duration>,
    callback: C,
}

/// A timer whose due time has been reached
#[derive(Debug)]
pub struct Fired<C> {
    pub handle: TimerHandle,
    pub kind: TimerKind,
    pub callback: C,
}

/// Native timer facility with a virtual clock
#[derive(Debug)]
pub struct TimerQueue<C> {
    now: Duration,
    next_handle: u32,
    entries: BTreeMap<TimerHandle, Scheduled<C>>,
}

impl<C: Clone> TimerQueue<C> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_handle: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock forward (never backwards)
    pub fn set_now(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Schedule a callback; `period` makes it repeat
    pub fn schedule(
        &mut self,
        delay: Duration,
        period: Option<Duration>,
        callback: C,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);

        let period = period.map(|p| p.max(MIN_INTERVAL));
        let delay = match period {
            Some(p) if delay < p => p,
            _ => delay,
        };

        self.entries.insert(
            handle,
            Scheduled {
                due: self.now + delay,
                period,
                callback,
            },
        );
        handle
    }

    /// Cancel a timer; cancelling an unknown or fired handle is a no-op
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Due time of the earliest scheduled timer
    pub fn next_due(&self) -> Option<Duration> {
        self.entries.values().map(|s| s.due).min()
    }

    /// Pop the earliest timer due at or before `until`, advancing the clock
    /// to its due time. Intervals are rescheduled, timeouts removed.
    pub fn pop_due(&mut self, until: Duration) -> Option<Fired<C>> {
        let (&handle, _) = self
            .entries
            .iter()
            .filter(|(_, s)| s.due <= until)
            .min_by_key(|(handle, s)| (s.due, **handle))?;

        let due = self.entries.get(&handle)?.due;
        self.set_now(due);

        let entry = self.entries.get_mut(&handle)?;
        match entry.period {
            Some(period) => {
                entry.due = due + period;
                Some(Fired {
                    handle,
                    kind: TimerKind::Interval,
                    callback: entry.callback.clone(),
                })
            }
            None => {
                let entry = self.entries.remove(&handle)?;
                Some(Fired {
                    handle,
                    kind: TimerKind::Timeout,
                    callback: entry.callback,
                })
            }
        }
    }

    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every timer
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

impl<C: Clone> Default for TimerQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-scoped record of the timers user code created
#[derive(Debug, Default)]
pub struct TimerTracker {
    timeouts: Vec<TimerHandle>,
    intervals: Vec<TimerHandle>,
}

impl TimerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timeout<C: Clone>(
        &mut self,
        queue: &mut TimerQueue<C>,
        delay: Duration,
        callback: C,
    ) -> TimerHandle {
        let handle = queue.schedule(delay, None, callback);
        self.timeouts.push(handle);
        handle
    }

    pub fn set_interval<C: Clone>(
        &mut self,
        queue: &mut TimerQueue<C>,
        period: Duration,
        callback: C,
    ) -> TimerHandle {
        let handle = queue.schedule(period, Some(period), callback);
        self.intervals.push(handle);
        handle
    }

    /// `clearTimeout`/`clearInterval`; both accept either kind of handle
    pub fn clear<C: Clone>(&mut self, queue: &mut TimerQueue<C>, handle: TimerHandle) -> bool {
        self.timeouts.retain(|h| *h != handle);
        self.intervals.retain(|h| *h != handle);
        queue.cancel(handle)
    }

    /// Forget a timeout that has already fired
    pub fn retire(&mut self, handle: TimerHandle) {
        self.timeouts.retain(|h| *h != handle);
    }

    /// Cancel every recorded timer and empty both lists.
    /// Returns how many were still scheduled.
    pub fn cancel_all<C: Clone>(&mut self, queue: &mut TimerQueue<C>) -> usize {
        let mut cancelled = 0;
        for handle in self.timeouts.drain(..).chain(self.intervals.drain(..)) {
            if queue.cancel(handle) {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn tracked(&self) -> Vec<TrackedTimer> {
        let timeouts = self.timeouts.iter().map(|&handle| TrackedTimer {
            handle,
            kind: TimerKind::Timeout,
        });
        let intervals = self.intervals.iter().map(|&handle| TrackedTimer {
            handle,
            kind: TimerKind::Interval,
        });
        timeouts.chain(intervals).collect()
    }

    pub fn len(&self) -> usize {
        self.timeouts.len() + self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A JavaScript callback kept alive across `Context::with` scopes
#[derive(Clone)]
pub struct JsCallback {
    pub function: Persistent<Function<'static>>,
    pub args: Vec<Persistent<Value<'static>>>,
}

impl JsCallback {
    /// Call the saved function with its saved arguments
    pub fn invoke<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<()> {
        let function = self.function.clone().restore(ctx)?;
        let args = self
            .args
            .iter()
            .map(|arg| arg.clone().restore(ctx))
            .collect::<rquickjs::Result<Vec<_>>>()?;
        function.call::<_, ()>((Rest(args),))
    }
}

/// Timer queue plus tracker for JavaScript callbacks
#[derive(Default)]
pub struct JsTimers {
    pub queue: TimerQueue<JsCallback>,
    pub tracker: TimerTracker,
}

pub type SharedTimers = Rc<RefCell<JsTimers>>;

impl JsTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTimers {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn set_timeout(&mut self, delay: Duration, callback: JsCallback) -> TimerHandle {
        self.tracker.set_timeout(&mut self.queue, delay, callback)
    }

    pub fn set_interval(&mut self, period: Duration, callback: JsCallback) -> TimerHandle {
        self.tracker.set_interval(&mut self.queue, period, callback)
    }

    pub fn clear(&mut self, handle: TimerHandle) -> bool {
        self.tracker.clear(&mut self.queue, handle)
    }

    pub fn pop_due(&mut self, until: Duration) -> Option<Fired<JsCallback>> {
        let fired = self.queue.pop_due(until)?;
        if fired.kind == TimerKind::Timeout {
            self.tracker.retire(fired.handle);
        }
        Some(fired)
    }

    /// Cancel this run's timers. Anything left in the queue afterwards was not
    /// created through the tracker and is dropped as well, so no JavaScript
    /// value outlives the run.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.tracker.cancel_all(&mut self.queue);
        cancelled + self.queue.clear()
    }

    pub fn live(&self) -> usize {
        self.queue.len()
    }
}

/// Convert a JavaScript delay argument to a duration
pub fn delay_from_ms(ms: Option<f64>) -> Duration {
    match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => {
            Duration::from_secs_f64(ms.min(MAX_DELAY_MS) / 1000.0)
        }
        _ => Duration::ZERO,
    }
}
