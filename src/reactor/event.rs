/// An I/O event reported by the poller.
///
/// The token carries the slot key of the registered handle; the event
/// loop validates it (index + generation) before dispatching, so an
/// event for a since-closed handle is dropped rather than misdirected.
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    pub(crate) token: u64,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}

/// Readiness delivered to a poll callback.
///
/// Both flags may be set at once when readability and writability are
/// reported together; such notifications are coalesced into a single
/// callback invocation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}
