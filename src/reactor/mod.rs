//! Event-loop core and readiness handling.
//!
//! This module implements the loop component of the crate. The loop
//! is responsible for:
//! - driving I/O readiness,
//! - managing timers,
//! - dispatching completions into handle callbacks.
//!
//! Everything runs on the caller's thread; [`EventLoop::run`] is the
//! only blocking point the application sees. Handles (timers, polls,
//! streams) are thin wrappers over slots owned by the loop.

mod core;
mod event;
mod timer;

pub(crate) mod poller;

pub use core::{EventLoop, RunMode};
pub use event::Ready;
pub use poller::common::Interest;

pub(crate) use core::{
    Shared, close_handle, handle_has_ref, handle_is_active, handle_is_closing, handle_set_ref,
    insert_handle, key_token, loop_of, new_loop,
};
pub(crate) use timer::TimerEntry;
