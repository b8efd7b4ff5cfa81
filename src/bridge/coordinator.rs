use super::engine::{
    CompletionResult, SocketAction, SocketHook, TimerHook, TransferEngine, TransferTag,
};
use super::transfer::Transfer;
use crate::poll::Poll;
use crate::reactor::{EventLoop, Interest, Ready};
use crate::timer::Timer;

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

/// Bridge state reachable from the engine's hooks.
///
/// Hooks run while the engine itself is mutably borrowed, so this
/// lives in its own cell: a hook may touch the bridge state freely
/// but must never touch the engine. The one engine notification a
/// hook needs to trigger (`release_socket` after an unwatch) is
/// queued in `pending_releases` and flushed once the driving engine
/// call has returned.
struct BridgeState {
    /// The engine's scheduling clock.
    timer: Timer,

    /// Registered transfers by tag. Entries are removed before the
    /// done callback runs, so re-registration from inside the
    /// callback sees a consistent registry.
    transfers: HashMap<TransferTag, Transfer>,

    /// Which transfer owns the watch on each socket. Kept separately
    /// from `transfers` because the engine unwatches a completed
    /// transfer's socket after the bridge has already dropped it from
    /// the registry.
    socket_owners: HashMap<RawFd, Transfer>,

    pending_releases: Vec<RawFd>,

    next_tag: TransferTag,
}

struct Shared<E> {
    lp: EventLoop,
    engine: RefCell<E>,
    state: RefCell<BridgeState>,
}

/// The bridge between a [`TransferEngine`] and the event loop.
///
/// The coordinator owns the engine and one [`Timer`]. At construction
/// it registers the engine's two hooks; from then on every state
/// change flows through them, and the bridge never spontaneously
/// starts or stops watching anything. After every driving step (a
/// socket readiness delivery or a timeout) the engine's completion
/// queue is drained synchronously, on the same call stack.
///
/// The coordinator does not own the registered [`Transfer`] handles;
/// they stay with the application. It is, however, the only party
/// that detaches a finished transfer from the engine.
pub struct Coordinator<E: TransferEngine + 'static> {
    shared: Rc<Shared<E>>,
}

impl<E: TransferEngine + 'static> Coordinator<E> {
    /// Wraps `engine` and binds it to `lp`.
    pub fn new(lp: &EventLoop, mut engine: E) -> Coordinator<E> {
        let shared = Rc::new_cyclic(|weak: &Weak<Shared<E>>| {
            engine.set_socket_hook(socket_hook(weak.clone(), lp.clone()));
            engine.set_timer_hook(timer_hook(weak.clone()));

            Shared {
                lp: lp.clone(),
                engine: RefCell::new(engine),
                state: RefCell::new(BridgeState {
                    timer: Timer::new(lp),
                    transfers: HashMap::new(),
                    socket_owners: HashMap::new(),
                    pending_releases: Vec::new(),
                    next_tag: 1,
                }),
            }
        });

        Coordinator { shared }
    }

    /// Attaches a transfer to the engine.
    ///
    /// Returns the engine's status: `0` on success, negative on
    /// failure (in which case the registration is rolled back and the
    /// done callback will not fire).
    ///
    /// # Panics
    ///
    /// Panics if the transfer is already registered; reuse is only
    /// allowed after the previous done callback has fired.
    pub fn register(&self, transfer: &Transfer) -> i32 {
        let (tag, config) = {
            let mut state = self.shared.state.borrow_mut();
            let mut t = transfer.inner.borrow_mut();
            assert!(
                !t.registered,
                "transfer is already registered with a coordinator"
            );
            t.registered = true;

            let tag = state.next_tag;
            state.next_tag += 1;
            state.transfers.insert(tag, transfer.clone());

            (tag, t.config.clone())
        };

        let rc = self.shared.engine.borrow_mut().add_transfer(&config, tag);

        if rc != 0 {
            log::warn!("engine rejected transfer (status {rc})");
            self.shared.state.borrow_mut().transfers.remove(&tag);
            transfer.inner.borrow_mut().registered = false;
        }

        flush_releases(&self.shared);
        rc
    }

    /// The loop this coordinator is bound to.
    pub fn event_loop(&self) -> EventLoop {
        self.shared.lp.clone()
    }
}

impl<E: TransferEngine + 'static> Drop for Coordinator<E> {
    /// Tears down the coordinator's reactor-side handles: the timer
    /// and any polls still watching sockets. Registered transfers are
    /// released without their done callback firing.
    fn drop(&mut self) {
        let (timer_closing, polls) = {
            let mut state = self.shared.state.borrow_mut();
            state.timer.stop();

            let polls: Vec<Poll> = state
                .socket_owners
                .drain()
                .filter_map(|(_, transfer)| {
                    let mut t = transfer.inner.borrow_mut();
                    t.socket = None;
                    t.poll.take()
                })
                .collect();

            for (_, transfer) in state.transfers.drain() {
                transfer.inner.borrow_mut().registered = false;
            }

            (state.timer.clone(), polls)
        };

        for poll in polls {
            poll.stop();
            poll.close(|| {});
        }
        timer_closing.close(|| {});
    }
}

/// Builds the socket-watch hook closure handed to the engine.
fn socket_hook<E: TransferEngine + 'static>(
    weak: Weak<Shared<E>>,
    lp: EventLoop,
) -> SocketHook {
    Box::new(move |tag, socket, action| {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        match action {
            SocketAction::Unwatch => {
                let owner = shared.state.borrow_mut().socket_owners.remove(&socket);
                let Some(transfer) = owner else {
                    // Repeated unwatch for the same socket: no-op.
                    return;
                };

                let poll = {
                    let mut t = transfer.inner.borrow_mut();
                    t.socket = None;
                    t.poll.take()
                };

                if let Some(poll) = poll {
                    poll.stop();
                    poll.close(|| {});
                }

                shared.state.borrow_mut().pending_releases.push(socket);
            }

            watch => {
                let interest = Interest {
                    read: watch != SocketAction::WatchWritable,
                    write: watch != SocketAction::WatchReadable,
                };

                let transfer = {
                    let state = shared.state.borrow();
                    state
                        .socket_owners
                        .get(&socket)
                        .cloned()
                        .or_else(|| state.transfers.get(&tag).cloned())
                };
                let Some(transfer) = transfer else {
                    panic!("socket watch for unknown transfer tag {tag}");
                };

                {
                    let mut t = transfer.inner.borrow_mut();

                    // A transfer that moved to a new socket first gets
                    // its old watch torn down.
                    if t.socket.is_some_and(|old| old != socket) {
                        if let Some(old_poll) = t.poll.take() {
                            old_poll.stop();
                            old_poll.close(|| {});
                        }
                        let old = t.socket.take().expect("socket checked above");
                        let mut state = shared.state.borrow_mut();
                        state.socket_owners.remove(&old);
                        state.pending_releases.push(old);
                    }

                    if t.poll.is_none() {
                        t.poll = Some(Poll::new(&lp, socket));
                        t.socket = Some(socket);
                    }

                    let cb = ready_callback(weak.clone(), socket);
                    t.poll.as_ref().expect("poll just created").start(interest, cb);
                }

                shared
                    .state
                    .borrow_mut()
                    .socket_owners
                    .insert(socket, transfer);
            }
        }
    })
}

/// Builds the timer hook closure handed to the engine.
fn timer_hook<E: TransferEngine + 'static>(weak: Weak<Shared<E>>) -> TimerHook {
    Box::new(move |timeout_ms| {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        if timeout_ms < 0 {
            shared.state.borrow().timer.stop();
            return;
        }

        // Zero means "as soon as possible": a minimal positive delay
        // still yields to the loop once instead of busy-looping.
        let timeout_ms = (timeout_ms as u64).max(1);

        let weak = weak.clone();
        shared.state.borrow().timer.start(
            move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };

                let rc = shared.engine.borrow_mut().drive_timeout();
                if rc != 0 {
                    log::warn!("engine timeout step failed (status {rc})");
                }

                finish_step(&shared);
            },
            timeout_ms,
            0,
        );
    })
}

/// The readiness callback installed on each transfer's poll.
fn ready_callback<E: TransferEngine + 'static>(
    weak: Weak<Shared<E>>,
    socket: RawFd,
) -> impl FnMut(i32, Ready) + 'static {
    move |status, ready| {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        if status < 0 {
            log::debug!("poll error on socket {socket}: status {status}");
        }

        let rc = shared.engine.borrow_mut().drive_socket(socket, ready);
        if rc != 0 {
            log::warn!("engine socket step failed (status {rc})");
        }

        finish_step(&shared);
    }
}

/// Post-step bookkeeping: flush queued socket releases, then drain
/// the completion queue until it reports empty.
fn finish_step<E: TransferEngine + 'static>(shared: &Rc<Shared<E>>) {
    flush_releases(shared);

    loop {
        let completion = shared.engine.borrow_mut().next_completion();
        let Some(completion) = completion else {
            break;
        };

        match completion.result {
            CompletionResult::Done { status } => {
                let transfer = shared
                    .state
                    .borrow_mut()
                    .transfers
                    .remove(&completion.tag);
                let Some(transfer) = transfer else {
                    panic!("completion for unknown transfer tag {}", completion.tag);
                };

                // Clear the callback as part of delivery, so the
                // callback can re-register this or another transfer.
                let cb = {
                    let mut t = transfer.inner.borrow_mut();
                    t.registered = false;
                    t.done_cb.take()
                };

                if let Some(cb) = cb {
                    cb(status);
                }

                shared.engine.borrow_mut().remove_transfer(completion.tag);
                flush_releases(shared);
            }

            CompletionResult::Other(kind) => {
                log::warn!("ignoring unhandled completion message (kind {kind})");
            }
        }
    }
}

fn flush_releases<E: TransferEngine + 'static>(shared: &Rc<Shared<E>>) {
    loop {
        let sockets = std::mem::take(&mut shared.state.borrow_mut().pending_releases);
        if sockets.is_empty() {
            break;
        }

        for socket in sockets {
            shared.engine.borrow_mut().release_socket(socket);
        }
    }
}
