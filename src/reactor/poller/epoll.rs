//! Linux `epoll`-based poller implementation.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness
//! - Support timer-driven wakeups via poll timeouts
//!
//! This backend is selected automatically on Linux targets.

use super::common::Interest;
use super::platform::sys_close;
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Linux `epoll` poller.
///
/// Owns an `epoll` instance and a reusable event buffer. Tokens are
/// opaque to the poller; the event loop packs a slot key into them and
/// validates it on dispatch.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Creates a new `EpollPoller`.
    pub(crate) fn new(event_capacity: usize) -> Self {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        assert!(epoll >= 0, "epoll_create1 failed");

        Self {
            epoll,
            events: Vec::with_capacity(event_capacity),
        }
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        debug_assert_eq!(rc, 0);
    }

    /// Updates interest flags for an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        debug_assert_eq!(rc, 0);
    }

    /// Removes a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Polls for I/O readiness events.
    ///
    /// Blocks until at least one descriptor becomes ready or the
    /// optional timeout expires. Readiness for the same token is
    /// coalesced into a single [`Event`].
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timeout_ms = timeout.map(timeout_millis).unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                unsafe {
                    self.events.set_len(0);
                }
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            let token = ev.u64;

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

/// Rounds a timeout up to whole milliseconds so a short positive wait
/// never degrades into a busy spin.
fn timeout_millis(timeout: Duration) -> i32 {
    let ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    if ms == 0 && !timeout.is_zero() { 1 } else { ms }
}
