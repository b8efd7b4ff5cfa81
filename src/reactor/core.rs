use super::event::Event;
use super::poller::Poller;
use super::poller::platform::sys_close;
use super::timer::TimerEntry;
use crate::handle::{Kind, Slot};
use crate::net::tcp;
use crate::utils::{Key, Slab};

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// How [`EventLoop::run`] should drive the loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunMode {
    /// Run until no refed handle keeps the loop alive, or until
    /// [`EventLoop::stop`] is requested.
    Default,

    /// Perform a single non-blocking iteration: poll for whatever is
    /// ready right now, dispatch it, and return.
    Poll,
}

pub(crate) type Shared = Rc<RefCell<Inner>>;

pub(crate) struct Inner {
    pub(crate) poller: Poller,
    events: Vec<Event>,

    pub(crate) handles: Slab<Slot>,
    pub(crate) timers: BinaryHeap<TimerEntry>,

    /// Handles whose close callback is due at the end of the current
    /// iteration.
    pending_closes: Vec<Key>,

    stop: bool,
    running: bool,
}

impl Inner {
    /// Time until the earliest live timer deadline, popping stale
    /// entries (stopped, rearmed, or closed timers) along the way.
    fn next_timeout(&mut self) -> Option<Duration> {
        while let Some(entry) = self.timers.peek() {
            let (key, generation, deadline) = (entry.key, entry.generation, entry.deadline);

            if !self.timer_live(key, generation) {
                self.timers.pop();
                continue;
            }

            return Some(deadline.saturating_duration_since(Instant::now()));
        }

        None
    }

    fn timer_live(&self, key: Key, generation: u64) -> bool {
        match self.handles.get(key) {
            Some(slot) if !slot.closing => match &slot.kind {
                Kind::Timer(t) => t.armed && t.generation == generation,
                _ => false,
            },
            _ => false,
        }
    }

    fn alive(&self) -> bool {
        self.handles.values().any(Slot::keeps_loop_alive)
    }
}

impl Drop for Inner {
    /// Destroying a loop with handle slots still occupied is a
    /// lifetime bug; surface it instead of leaking silently.
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.handles.is_empty(),
                "event loop dropped with open handles"
            );
        }
    }
}

/// A single-threaded, callback-driven event loop.
///
/// The loop owns the readiness poller, the handle registry, and the
/// timer queue. All handles (timers, polls, streams) are created
/// against a loop and must be closed before the last reference to the
/// loop is dropped.
///
/// Cloning an `EventLoop` clones a reference to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Shared,
}

impl EventLoop {
    /// Creates an event loop with default capacities.
    pub fn new() -> EventLoop {
        crate::LoopBuilder::new().build()
    }

    /// Drives the loop.
    ///
    /// In [`RunMode::Default`], blocks until no refed handle is active
    /// or closing, or until [`stop`](Self::stop) is called from a
    /// callback. In [`RunMode::Poll`], performs one non-blocking
    /// iteration.
    ///
    /// Returns whether handles remain that keep the loop alive.
    ///
    /// # Panics
    ///
    /// Panics on a nested `run` call; the loop is not reentrant.
    pub fn run(&self, mode: RunMode) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.running, "nested run on the same event loop");
            inner.running = true;
            inner.stop = false;
        }

        loop {
            self.turn(mode);

            let mut inner = self.inner.borrow_mut();
            let alive = inner.alive();

            if inner.stop || !alive || mode == RunMode::Poll {
                inner.running = false;
                return alive;
            }
        }
    }

    /// Requests that the current `run` return after this iteration.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop = true;
    }

    /// Returns whether any handle currently keeps the loop alive.
    pub fn alive(&self) -> bool {
        self.inner.borrow().alive()
    }

    /// Number of open handle slots (active or not).
    pub fn handle_count(&self) -> usize {
        self.inner.borrow().handles.len()
    }

    /// One loop iteration: poll, dispatch readiness, fire due timers,
    /// deliver pending close callbacks.
    fn turn(&self, mode: RunMode) {
        let mut events = {
            let mut inner = self.inner.borrow_mut();

            // Never block when nothing keeps the loop alive; `run`
            // will notice and return right after this turn.
            let timeout = if mode == RunMode::Poll || !inner.alive() {
                Some(Duration::ZERO)
            } else {
                inner.next_timeout()
            };

            let mut events = mem::take(&mut inner.events);

            if let Err(e) = inner.poller.poll(&mut events, timeout) {
                log::debug!("poll failed: {e}");
            }

            events
        };

        for event in events.drain(..) {
            self.dispatch_io(event);
        }

        // Hand the scratch buffer back for the next iteration.
        self.inner.borrow_mut().events = events;

        self.fire_timers();

        deliver_pending_closes(&self.inner);
    }

    /// Routes one readiness event to its handle, if the handle is
    /// still live. Stale tokens (closed or recycled slots) and handles
    /// stopped earlier in the same batch are dropped here.
    fn dispatch_io(&self, event: Event) {
        let key = token_key(event.token);

        enum Dispatch {
            PollCb(Box<dyn FnMut(i32, super::event::Ready)>, super::event::Ready, u64),
            Tcp,
            None,
        }

        let dispatch = {
            let mut inner = self.inner.borrow_mut();
            match inner.handles.get_mut(key) {
                Some(slot) if !slot.closing => match &mut slot.kind {
                    Kind::Poll(p) if p.watching => {
                        let ready = super::event::Ready {
                            readable: event.readable,
                            writable: event.writable,
                        };
                        match p.cb.take() {
                            Some(cb) if !ready.is_empty() => {
                                Dispatch::PollCb(cb, ready, p.generation)
                            }
                            Some(cb) => {
                                p.cb = Some(cb);
                                Dispatch::None
                            }
                            None => Dispatch::None,
                        }
                    }
                    Kind::Tcp(_) => Dispatch::Tcp,
                    _ => Dispatch::None,
                },
                _ => Dispatch::None,
            }
        };

        match dispatch {
            Dispatch::PollCb(mut cb, ready, generation) => {
                cb(0, ready);

                // Put the callback back unless the watch was stopped,
                // restarted, or closed while it was out.
                let mut inner = self.inner.borrow_mut();
                if let Some(slot) = inner.handles.get_mut(key) {
                    if let Kind::Poll(p) = &mut slot.kind {
                        if p.watching && p.generation == generation && p.cb.is_none() {
                            p.cb = Some(cb);
                        }
                    }
                }
            }
            Dispatch::Tcp => tcp::handle_io(&self.inner, key, event.readable, event.writable),
            Dispatch::None => {}
        }
    }

    /// Pops and fires every due timer. Stale heap entries are skipped;
    /// repeating timers are rescheduled before their callback runs so
    /// a rearm inside the callback wins over the automatic repeat.
    fn fire_timers(&self) {
        loop {
            let fire = {
                let mut guard = self.inner.borrow_mut();
                let inner = &mut *guard;
                let now = Instant::now();
                let mut fire = None;

                while let Some(entry) = inner.timers.peek() {
                    let (key, generation, deadline) = (entry.key, entry.generation, entry.deadline);

                    if !inner.timer_live(key, generation) {
                        inner.timers.pop();
                        continue;
                    }

                    if deadline > now {
                        break;
                    }

                    inner.timers.pop();

                    let slot = inner.handles.get_mut(key).expect("live timer lost its slot");
                    let Kind::Timer(t) = &mut slot.kind else {
                        unreachable!("timer entry points at a non-timer slot");
                    };

                    let cb = t.cb.take();

                    if t.repeat_ms > 0 {
                        inner.timers.push(TimerEntry {
                            deadline: now + Duration::from_millis(t.repeat_ms),
                            key,
                            generation,
                        });
                    } else {
                        t.armed = false;
                    }

                    fire = Some((key, generation, cb));
                    break;
                }

                fire
            };

            let Some((key, generation, cb)) = fire else {
                break;
            };
            let Some(mut cb) = cb else {
                continue;
            };

            cb();

            let mut inner = self.inner.borrow_mut();
            if let Some(slot) = inner.handles.get_mut(key) {
                if let Kind::Timer(t) = &mut slot.kind {
                    if t.generation == generation && t.cb.is_none() {
                        t.cb = Some(cb);
                    }
                }
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Constructs the loop state. Called by [`crate::LoopBuilder`].
pub(crate) fn new_loop(event_capacity: usize, handle_capacity: usize) -> EventLoop {
    EventLoop {
        inner: Rc::new(RefCell::new(Inner {
            poller: Poller::new(event_capacity),
            events: Vec::new(),
            handles: Slab::with_capacity(handle_capacity),
            timers: BinaryHeap::new(),
            pending_closes: Vec::new(),
            stop: false,
            running: false,
        })),
    }
}

/// Packs a slot key into a poller token.
pub(crate) fn key_token(key: Key) -> u64 {
    ((key.generation as u64) << 32) | key.index as u64
}

fn token_key(token: u64) -> Key {
    Key {
        index: token as u32,
        generation: (token >> 32) as u32,
    }
}

/// Opens a handle slot on the loop.
pub(crate) fn insert_handle(inner: &Shared, kind: Kind) -> Key {
    inner.borrow_mut().handles.insert(Slot::new(kind))
}

pub(crate) fn handle_is_active(inner: &Shared, key: Key) -> bool {
    inner
        .borrow()
        .handles
        .get(key)
        .is_some_and(Slot::is_active)
}

pub(crate) fn handle_is_closing(inner: &Shared, key: Key) -> bool {
    inner.borrow().handles.get(key).is_some_and(|s| s.closing)
}

pub(crate) fn handle_has_ref(inner: &Shared, key: Key) -> bool {
    inner.borrow().handles.get(key).is_some_and(|s| s.refed)
}

pub(crate) fn handle_set_ref(inner: &Shared, key: Key, refed: bool) {
    if let Some(slot) = inner.borrow_mut().handles.get_mut(key) {
        slot.refed = refed;
    }
}

pub(crate) fn loop_of(inner: &Shared) -> EventLoop {
    EventLoop {
        inner: inner.clone(),
    }
}

/// Schedules a handle's teardown.
///
/// Suppresses every pending low-level callback for the resource
/// (deregisters it, disarms it, clears stored callbacks), cancels
/// in-flight stream requests with [`crate::status::ECANCELED`], and
/// queues the close callback. While the loop is running the callback
/// is delivered at the end of the current iteration; on an idle loop
/// it is delivered before this function returns.
///
/// # Panics
///
/// Panics if a close is already pending, or if the handle is already
/// fully closed.
pub(crate) fn close_handle(inner: &Shared, key: Key, cb: Box<dyn FnOnce()>) {
    let mut canceled: Vec<(Box<dyn FnOnce(i32)>, i32)> = Vec::new();
    let running;

    {
        let mut guard = inner.borrow_mut();
        let inner_ref = &mut *guard;

        let slot = inner_ref
            .handles
            .get_mut(key)
            .expect("close on a handle that is already closed");
        assert!(!slot.closing, "close already pending for this handle");

        slot.closing = true;
        slot.close_cb = Some(cb);

        match &mut slot.kind {
            Kind::Timer(t) => {
                t.armed = false;
                t.generation += 1;
                t.cb = None;
            }
            Kind::Poll(p) => {
                if p.watching {
                    inner_ref.poller.deregister(p.fd);
                    p.watching = false;
                }
                p.generation += 1;
                p.cb = None;
            }
            Kind::Tcp(s) => {
                if s.registered {
                    inner_ref.poller.deregister(s.fd);
                    s.registered = false;
                }

                while let Some(mut req) = s.write_queue.pop_front() {
                    if let Some(cb) = req.cb.take() {
                        canceled.push((cb, crate::status::ECANCELED));
                    }
                    s.write_pool.release(req);
                }

                if let Some(mut req) = s.shutdown_req.take() {
                    if let Some(cb) = req.cb.take() {
                        canceled.push((cb, crate::status::ECANCELED));
                    }
                    s.shutdown_pool.release(req);
                }

                if let Some(cb) = s.connect_cb.take() {
                    canceled.push((cb, crate::status::ECANCELED));
                }

                s.connecting = false;
                s.reading = false;
                s.read_cb = None;
                s.listening = false;
                s.connection_cb = None;

                for fd in s.accept_backlog.drain(..) {
                    sys_close(fd);
                }

                if s.fd >= 0 {
                    sys_close(s.fd);
                    s.fd = -1;
                }
            }
        }

        running = inner_ref.running;
        inner_ref.pending_closes.push(key);
    }

    for (cb, status) in canceled {
        cb(status);
    }

    if !running {
        deliver_pending_closes(inner);
    }
}

/// Removes each pending-close slot and fires its close callback.
///
/// The slot is removed before the callback runs, so a callback that
/// opens or closes other handles sees consistent state.
pub(crate) fn deliver_pending_closes(inner: &Shared) {
    loop {
        let key = inner.borrow_mut().pending_closes.pop();
        let Some(key) = key else {
            break;
        };

        let cb = inner
            .borrow_mut()
            .handles
            .remove(key)
            .and_then(|mut slot| slot.close_cb.take());

        if let Some(cb) = cb {
            cb();
        }
    }
}
