//! Status codes delivered to completion callbacks.
//!
//! Operational errors travel on the same channel as success: every
//! completion callback receives an `i32` status, `0` for success and a
//! negative value otherwise. Values that map to an OS error are the
//! negated errno; the sentinels below cover conditions with no errno.

use std::io;

/// End of stream.
pub const EOF: i32 = -4095;

/// An error that does not map to an OS error code.
pub const UNKNOWN: i32 = -4094;

/// The operation was canceled because its handle was closed.
pub const ECANCELED: i32 = -libc::ECANCELED;

/// Converts an I/O error into a callback status.
pub(crate) fn from_io_error(err: &io::Error) -> i32 {
    match err.raw_os_error() {
        Some(code) if code > 0 => -code,
        _ => UNKNOWN,
    }
}
