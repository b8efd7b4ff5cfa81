use crate::reactor::{self, EventLoop};

/// Builder for configuring and creating an event loop.
///
/// `LoopBuilder` allows customizing loop parameters before
/// construction: the readiness-event buffer size and the initial
/// handle-arena capacity.
///
/// # Examples
///
/// ```rust,ignore
/// let lp = LoopBuilder::new()
///     .event_capacity(256)
///     .build();
/// ```
pub struct LoopBuilder {
    /// Capacity of the poller's event buffer.
    event_capacity: usize,

    /// Initial capacity of the handle arena.
    handle_capacity: usize,
}

impl LoopBuilder {
    /// Creates a new `LoopBuilder` with default capacities.
    pub fn new() -> Self {
        Self {
            event_capacity: 64,
            handle_capacity: 64,
        }
    }

    /// Sets how many readiness events one poll may deliver.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.event_capacity = n;
        self
    }

    /// Sets the initial handle-arena capacity.
    pub fn handle_capacity(mut self, n: usize) -> Self {
        self.handle_capacity = n;
        self
    }

    /// Builds the event loop with the configured options.
    pub fn build(self) -> EventLoop {
        reactor::new_loop(self.event_capacity, self.handle_capacity)
    }
}

impl Default for LoopBuilder {
    /// Creates a default `LoopBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
