//! # Pontis
//!
//! **Pontis** is a single-threaded, callback-driven event loop with a
//! bridge that lets socket-driven transfer engines (components that
//! manage many concurrent transfers but have no loop of their own)
//! run cooperatively on top of it.
//!
//! The crate has two layers:
//!
//! - **Loop primitives**: [`EventLoop`], [`Timer`], [`Poll`], and
//!   [`TcpStream`](net::TcpStream). Every operation completes through
//!   a callback delivered by the loop; handles are closed explicitly
//!   and a close callback fires exactly once when teardown is safe.
//! - **The bridge**: [`bridge::Coordinator`] binds a
//!   [`bridge::TransferEngine`] to the loop, translating the engine's
//!   socket-watch and timer requests into reactor handles and its
//!   completions into per-[`bridge::Transfer`] callbacks.
//!
//! Everything is strictly single-threaded: [`EventLoop::run`] is the
//! only blocking point, callbacks may freely call back into the API,
//! and nothing here is `Send` or `Sync`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pontis::{EventLoop, RunMode, Timer};
//!
//! fn main() {
//!     let lp = EventLoop::new();
//!
//!     let timer = Timer::new(&lp);
//!     let t = timer.clone();
//!     timer.start(
//!         move || {
//!             println!("tick");
//!             t.close(|| {});
//!         },
//!         100,
//!         0,
//!     );
//!
//!     lp.run(RunMode::Default);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`bridge`] — Transfer-engine bridge (coordinator, transfers)
//! - [`net`] — Callback-driven TCP streams
//! - [`status`] — Callback status codes

mod builder;
mod handle;
mod poll;
mod reactor;
mod timer;
mod utils;

pub mod bridge;
pub mod net;
pub mod status;

pub use builder::LoopBuilder;
pub use poll::Poll;
pub use reactor::{EventLoop, Interest, Ready, RunMode};
pub use timer::Timer;
pub use utils::pool::{ObjectPool, Reusable};
