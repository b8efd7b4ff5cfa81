use crate::handle::{Kind, impl_handle};
use crate::reactor::{self, EventLoop, Interest, Ready, Shared};
use crate::utils::Key;

use std::os::fd::RawFd;

pub(crate) struct PollState {
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    pub(crate) watching: bool,
    pub(crate) cb: Option<Box<dyn FnMut(i32, Ready)>>,

    /// Bumped on every start/stop/close; an in-flight callback
    /// carrying an older generation is not put back.
    pub(crate) generation: u64,
}

/// Watches an externally owned socket descriptor for readiness.
///
/// A `Poll` only receives readability/writability notifications; it
/// never reads, writes, opens, or closes the descriptor. The wrapped
/// descriptor's lifecycle is entirely the caller's business.
#[derive(Clone)]
pub struct Poll {
    pub(crate) inner: Shared,
    pub(crate) key: Key,
}

impl Poll {
    pub fn new(lp: &EventLoop, fd: RawFd) -> Poll {
        let key = reactor::insert_handle(
            &lp.inner,
            Kind::Poll(PollState {
                fd,
                interest: Interest::default(),
                watching: false,
                cb: None,
                generation: 0,
            }),
        );

        Poll {
            inner: lp.inner.clone(),
            key,
        }
    }

    /// Begins (or re-arms) watching for the given interest.
    ///
    /// `cb(status, ready)` fires once per readiness notification;
    /// readability and writability reported together arrive coalesced
    /// in a single invocation. Calling `start` on a watching poll
    /// replaces both the interest and the callback.
    ///
    /// # Panics
    ///
    /// Panics if the poll is closing or closed.
    pub fn start(&self, interest: Interest, cb: impl FnMut(i32, Ready) + 'static) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("poll used after close");
        assert!(!slot.closing, "poll started while closing");

        let Kind::Poll(p) = &mut slot.kind else {
            unreachable!();
        };

        p.generation += 1;
        p.cb = Some(Box::new(cb));

        let token = reactor::key_token(self.key);
        if p.watching {
            inner.poller.reregister(p.fd, token, interest);
        } else {
            inner.poller.register(p.fd, token, interest);
            p.watching = true;
        }
        p.interest = interest;
    }

    /// Ends watching. No callback fires after `stop` returns, even for
    /// an event already sitting in the current poll batch.
    pub fn stop(&self) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let Some(slot) = inner.handles.get_mut(self.key) else {
            return;
        };
        let Kind::Poll(p) = &mut slot.kind else {
            unreachable!();
        };

        if p.watching {
            inner.poller.deregister(p.fd);
            p.watching = false;
        }
        p.generation += 1;
        p.cb = None;
    }

    /// The watched descriptor.
    pub fn fd(&self) -> RawFd {
        let guard = self.inner.borrow();
        match guard.handles.get(self.key).map(|slot| &slot.kind) {
            Some(Kind::Poll(p)) => p.fd,
            _ => -1,
        }
    }
}

impl_handle!(Poll);
