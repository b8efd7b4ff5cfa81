use crate::handle::{Kind, impl_handle};
use crate::reactor::{self, EventLoop, Shared, TimerEntry};
use crate::utils::Key;

use std::time::{Duration, Instant};

pub(crate) struct TimerState {
    pub(crate) cb: Option<Box<dyn FnMut()>>,
    pub(crate) armed: bool,
    pub(crate) repeat_ms: u64,

    /// Bumped on every start/stop/close; heap entries and an
    /// in-flight callback carrying an older generation are stale.
    pub(crate) generation: u64,
}

/// A one-shot or repeating timer scheduled by the loop's clock.
///
/// Granularity and drift follow the poller's timeout semantics; this
/// layer adds no smoothing.
#[derive(Clone)]
pub struct Timer {
    pub(crate) inner: Shared,
    pub(crate) key: Key,
}

impl Timer {
    pub fn new(lp: &EventLoop) -> Timer {
        let key = reactor::insert_handle(
            &lp.inner,
            Kind::Timer(TimerState {
                cb: None,
                armed: false,
                repeat_ms: 0,
                generation: 0,
            }),
        );

        Timer {
            inner: lp.inner.clone(),
            key,
        }
    }

    /// Arms the timer: `cb` fires after `timeout_ms`, then every
    /// `repeat_ms` if that is non-zero.
    ///
    /// Calling `start` on an armed timer replaces the previous
    /// schedule atomically: exactly one callback per logical schedule,
    /// at the most recently requested deadline, never the stale one.
    ///
    /// # Panics
    ///
    /// Panics if the timer is closing or closed.
    pub fn start(&self, cb: impl FnMut() + 'static, timeout_ms: u64, repeat_ms: u64) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("timer used after close");
        assert!(!slot.closing, "timer started while closing");

        let Kind::Timer(t) = &mut slot.kind else {
            unreachable!();
        };

        t.generation += 1;
        t.armed = true;
        t.repeat_ms = repeat_ms;
        t.cb = Some(Box::new(cb));

        inner.timers.push(TimerEntry {
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            key: self.key,
            generation: t.generation,
        });
    }

    /// Disarms the timer. No callback fires after `stop` returns.
    pub fn stop(&self) {
        let mut guard = self.inner.borrow_mut();

        let Some(slot) = guard.handles.get_mut(self.key) else {
            return;
        };
        let Kind::Timer(t) = &mut slot.kind else {
            unreachable!();
        };

        t.generation += 1;
        t.armed = false;
        t.cb = None;
    }
}

impl_handle!(Timer);
