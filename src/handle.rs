use crate::net::tcp::TcpState;
use crate::poll::PollState;
use crate::timer::TimerState;

/// One open resource owned by the loop.
///
/// The slot holds the kind-specific state plus the lifecycle fields
/// shared by every handle: whether it counts toward loop liveness,
/// whether a close is pending, and the one-shot close callback.
pub(crate) struct Slot {
    pub(crate) kind: Kind,

    /// Whether the handle counts toward keeping the loop alive.
    pub(crate) refed: bool,

    /// Set by `close`; suppresses all further low-level callbacks.
    pub(crate) closing: bool,

    /// Fires exactly once, after teardown is safe.
    pub(crate) close_cb: Option<Box<dyn FnOnce()>>,
}

pub(crate) enum Kind {
    Timer(TimerState),
    Poll(PollState),
    Tcp(TcpState),
}

impl Slot {
    pub(crate) fn new(kind: Kind) -> Self {
        Self {
            kind,
            refed: true,
            closing: false,
            close_cb: None,
        }
    }

    /// Whether the handle is doing work (armed, watching, or with
    /// operations in flight). Idle open handles are not active.
    pub(crate) fn is_active(&self) -> bool {
        match &self.kind {
            Kind::Timer(t) => t.armed,
            Kind::Poll(p) => p.watching,
            Kind::Tcp(s) => {
                s.reading
                    || s.listening
                    || s.connecting
                    || !s.write_queue.is_empty()
                    || s.shutdown_req.is_some()
            }
        }
    }

    pub(crate) fn keeps_loop_alive(&self) -> bool {
        self.refed && (self.is_active() || self.closing)
    }
}

/// Generates the lifecycle methods every handle wrapper shares.
macro_rules! impl_handle {
    ($ty:ident) => {
        impl $ty {
            /// Returns `true` while the handle is doing work that
            /// keeps the loop alive.
            pub fn is_active(&self) -> bool {
                crate::reactor::handle_is_active(&self.inner, self.key)
            }

            /// Returns `true` from the `close` request until the close
            /// callback has fired.
            pub fn is_closing(&self) -> bool {
                crate::reactor::handle_is_closing(&self.inner, self.key)
            }

            /// Whether the handle counts toward loop liveness.
            pub fn has_ref(&self) -> bool {
                crate::reactor::handle_has_ref(&self.inner, self.key)
            }

            /// Makes the handle count toward loop liveness (the
            /// default).
            pub fn ref_(&self) {
                crate::reactor::handle_set_ref(&self.inner, self.key, true)
            }

            /// Stops the handle from keeping the loop alive.
            pub fn unref(&self) {
                crate::reactor::handle_set_ref(&self.inner, self.key, false)
            }

            /// Returns the loop this handle belongs to.
            pub fn event_loop(&self) -> crate::EventLoop {
                crate::reactor::loop_of(&self.inner)
            }

            /// Schedules the handle's teardown.
            ///
            /// `cb` fires exactly once, after every pending low-level
            /// callback for the resource has been suppressed: at the
            /// end of the current loop iteration while running, or
            /// before `close` returns on an idle loop. In-flight
            /// requests are canceled with
            /// [`status::ECANCELED`](crate::status::ECANCELED).
            ///
            /// # Panics
            ///
            /// Panics if a close is already pending.
            pub fn close(&self, cb: impl FnOnce() + 'static) {
                crate::reactor::close_handle(&self.inner, self.key, Box::new(cb))
            }
        }
    };
}

pub(crate) use impl_handle;
