use crate::reactor::Ready;

use std::os::fd::RawFd;

/// Opaque per-transfer back-reference.
///
/// The coordinator assigns a tag when a transfer is registered and
/// the engine carries it in every hook invocation and completion
/// entry, so the bridge can find the owning [`Transfer`] wrapper
/// without the engine knowing anything about it.
///
/// [`Transfer`]: crate::bridge::Transfer
pub type TransferTag = u64;

/// Socket interest change requested by the engine's watch hook.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SocketAction {
    WatchReadable,
    WatchWritable,
    WatchBoth,
    /// Stop watching; the reactor-side handle for this socket is
    /// destroyed and the engine is told it no longer exists.
    Unwatch,
}

/// One entry read from the engine's completion queue.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Completion {
    pub tag: TransferTag,
    pub result: CompletionResult,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompletionResult {
    /// The transfer finished; `status` is `0` or a negative
    /// engine-specific code.
    Done { status: i32 },

    /// Any other queue entry kind. The bridge logs and ignores these.
    Other(u32),
}

/// Per-transfer configuration handed to the engine at registration.
#[derive(Clone, Default, Debug)]
pub struct TransferConfig {
    pub url: Option<String>,
}

/// The engine's socket-watch hook: `(tag, socket, action)`.
pub type SocketHook = Box<dyn FnMut(TransferTag, RawFd, SocketAction)>;

/// The engine's timer hook: the next deadline in milliseconds, with
/// negative meaning "disarm" and `0` meaning "as soon as possible".
pub type TimerHook = Box<dyn FnMut(i64)>;

/// The transfer engine collaborator.
///
/// The engine is driven by explicit step calls and produces
/// completions via a pollable queue; it never blocks and never runs a
/// loop of its own. The coordinator registers both hooks once, at
/// construction, and they stay registered for the coordinator's
/// entire lifetime.
///
/// Hooks are invoked from inside `add_transfer` and the `drive_*`
/// steps, while the engine itself is borrowed: a hook must never call
/// back into the engine.
pub trait TransferEngine {
    /// Stores the socket-watch hook for the engine's lifetime.
    fn set_socket_hook(&mut self, hook: SocketHook);

    /// Stores the timer hook for the engine's lifetime.
    fn set_timer_hook(&mut self, hook: TimerHook);

    /// Attaches a transfer. Returns `0` on success or a negative
    /// status; on failure the transfer is not attached.
    fn add_transfer(&mut self, config: &TransferConfig, tag: TransferTag) -> i32;

    /// Detaches a transfer; it must not be stepped again.
    fn remove_transfer(&mut self, tag: TransferTag);

    /// Tells the engine that no reactor-side handle remains for
    /// `socket`, so it may release its own bookkeeping for it.
    fn release_socket(&mut self, socket: RawFd);

    /// Drives every transfer interested in `socket` with the given
    /// readiness flags. Returns `0` or a negative status.
    fn drive_socket(&mut self, socket: RawFd, ready: Ready) -> i32;

    /// Drives the engine after its requested deadline elapsed (the
    /// timeout pseudo-socket). Returns `0` or a negative status.
    fn drive_timeout(&mut self) -> i32;

    /// Pops the next completion-queue entry, or `None` when the queue
    /// is empty.
    fn next_completion(&mut self) -> Option<Completion>;
}
