use super::engine::TransferConfig;
use crate::poll::Poll;

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

pub(crate) struct TransferInner {
    pub(crate) config: TransferConfig,

    /// Created the first time the engine asks to watch a socket for
    /// this transfer; destroyed when it asks to stop watching.
    pub(crate) poll: Option<Poll>,
    pub(crate) socket: Option<RawFd>,

    /// Consumed exactly once per registration, when the engine
    /// reports the transfer done.
    pub(crate) done_cb: Option<Box<dyn FnOnce(i32)>>,

    pub(crate) registered: bool,
}

/// One transfer request.
///
/// A `Transfer` holds engine-specific configuration and a single
/// completion callback. Register it with a
/// [`Coordinator`](crate::bridge::Coordinator) to start it; once the
/// done callback has fired the handle may be reconfigured and
/// registered again, behaving exactly like a fresh handle. Registering
/// the next transfer from inside the done callback is the intended way
/// to chain transfers.
///
/// Cloning a `Transfer` clones a reference to the same transfer.
#[derive(Clone)]
pub struct Transfer {
    pub(crate) inner: Rc<RefCell<TransferInner>>,
}

impl Transfer {
    pub fn new() -> Transfer {
        Transfer {
            inner: Rc::new(RefCell::new(TransferInner {
                config: TransferConfig::default(),
                poll: None,
                socket: None,
                done_cb: None,
                registered: false,
            })),
        }
    }

    /// Sets the target endpoint. Takes effect the next time the
    /// engine starts processing the transfer.
    pub fn set_url(&self, url: &str) {
        self.inner.borrow_mut().config.url = Some(url.to_owned());
    }

    /// Sets the completion callback. Replaces any previous one; the
    /// callback is cleared as part of delivery.
    pub fn on_done(&self, cb: impl FnOnce(i32) + 'static) {
        self.inner.borrow_mut().done_cb = Some(Box::new(cb));
    }

    /// Whether the transfer is currently registered with a
    /// coordinator (from registration until its done callback fires).
    pub fn is_registered(&self) -> bool {
        self.inner.borrow().registered
    }

    /// The socket the engine is currently having watched for this
    /// transfer, if any.
    pub fn watched_socket(&self) -> Option<RawFd> {
        self.inner.borrow().socket
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}
