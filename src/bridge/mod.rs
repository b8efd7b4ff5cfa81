//! The transfer-engine bridge.
//!
//! A transfer engine manages many concurrent network transfers but
//! has no event loop of its own: it asks its host to watch sockets
//! and to call it back after a deadline, and reports finished
//! transfers through a pollable completion queue.
//!
//! This module translates between such an engine and the loop:
//! [`Coordinator`] maps the engine's socket-watch and timer requests
//! onto [`Poll`](crate::Poll) and [`Timer`](crate::Timer) handles,
//! feeds readiness and timeouts back into the engine's step
//! functions, and surfaces completions through each [`Transfer`]'s
//! done callback.

mod coordinator;
mod engine;
mod transfer;

pub use coordinator::Coordinator;
pub use engine::{
    Completion, CompletionResult, SocketAction, SocketHook, TimerHook, TransferConfig,
    TransferEngine, TransferTag,
};
pub use transfer::Transfer;
