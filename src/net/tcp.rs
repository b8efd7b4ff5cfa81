use crate::handle::{Kind, impl_handle};
use crate::reactor::poller::Poller;
use crate::reactor::poller::platform::{
    sockaddr_storage_to_socketaddr, sys_accept, sys_bind, sys_connect, sys_ipv6_is_necessary,
    sys_listen, sys_parse_sockaddr, sys_read, sys_set_nodelay, sys_set_nonblocking,
    sys_set_reuseaddr, sys_shutdown, sys_socket, sys_socket_error, sys_sockname, sys_write,
};
use crate::reactor::{self, EventLoop, Interest, Shared};
use crate::status;
use crate::utils::Key;
use crate::utils::pool::{ObjectPool, Reusable};

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;

/// Read chunk size; the scratch buffer grows to this once reads begin.
const READ_CHUNK: usize = 64 * 1024;

/// An in-flight write operation.
///
/// The request owns a flattened copy of the caller's buffers and the
/// completion callback. Records cycle through the stream's
/// [`ObjectPool`], so a busy stream stops allocating per write once
/// warm.
#[derive(Default)]
pub(crate) struct WriteRequest {
    pub(crate) data: Vec<u8>,
    pub(crate) written: usize,
    pub(crate) cb: Option<Box<dyn FnOnce(i32)>>,
}

impl Reusable for WriteRequest {
    fn reset(&mut self) {
        self.data.clear();
        self.written = 0;
        self.cb = None;
    }
}

/// An in-flight shutdown operation. At most one may be pending.
#[derive(Default)]
pub(crate) struct ShutdownRequest {
    pub(crate) cb: Option<Box<dyn FnOnce(i32)>>,
}

impl Reusable for ShutdownRequest {
    fn reset(&mut self) {
        self.cb = None;
    }
}

pub(crate) struct TcpState {
    /// Owned socket descriptor; `-1` until bind/connect/adopt.
    pub(crate) fd: RawFd,
    pub(crate) registered: bool,

    pub(crate) reading: bool,
    pub(crate) read_cb: Option<Box<dyn FnMut(isize, &[u8])>>,
    /// Single growable scratch buffer, reused across read callbacks.
    pub(crate) read_buf: Vec<u8>,

    pub(crate) listening: bool,
    pub(crate) connection_cb: Option<Box<dyn FnMut(i32)>>,
    pub(crate) accept_backlog: VecDeque<RawFd>,

    pub(crate) connecting: bool,
    pub(crate) connect_cb: Option<Box<dyn FnOnce(i32)>>,

    pub(crate) write_queue: VecDeque<WriteRequest>,
    pub(crate) write_pool: ObjectPool<WriteRequest>,

    pub(crate) shutdown_req: Option<ShutdownRequest>,
    pub(crate) shutdown_pool: ObjectPool<ShutdownRequest>,
}

impl TcpState {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            registered: false,
            reading: false,
            read_cb: None,
            read_buf: Vec::new(),
            listening: false,
            connection_cb: None,
            accept_backlog: VecDeque::new(),
            connecting: false,
            connect_cb: None,
            write_queue: VecDeque::new(),
            write_pool: ObjectPool::new(),
            shutdown_req: None,
            shutdown_pool: ObjectPool::new(),
        }
    }
}

/// A callback-driven TCP connection (or listener).
///
/// All operations complete through callbacks delivered by the loop.
/// Negative statuses are soft failures reported to the caller; none of
/// them implicitly closes the stream. The stream owns its descriptor
/// and closes it during handle teardown.
#[derive(Clone)]
pub struct TcpStream {
    pub(crate) inner: Shared,
    pub(crate) key: Key,
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").field("key", &self.key).finish()
    }
}

impl TcpStream {
    /// Creates a stream with no socket yet; bind or connect opens one.
    pub fn new(lp: &EventLoop) -> TcpStream {
        Self::adopt(&lp.inner, -1)
    }

    /// Wraps an existing stream socket, taking ownership of `fd`.
    ///
    /// The descriptor is switched to non-blocking mode.
    pub fn open(lp: &EventLoop, fd: RawFd) -> io::Result<TcpStream> {
        sys_set_nonblocking(fd)?;
        Ok(Self::adopt(&lp.inner, fd))
    }

    fn adopt(inner: &Shared, fd: RawFd) -> TcpStream {
        let key = reactor::insert_handle(inner, Kind::Tcp(TcpState::new(fd)));

        TcpStream {
            inner: inner.clone(),
            key,
        }
    }

    /// Binds to `address` (e.g. `"127.0.0.1:0"`), creating the socket
    /// if none exists yet.
    pub fn bind(&self, address: &str) -> io::Result<()> {
        let (storage, len) = sys_parse_sockaddr(address)?;

        let mut guard = self.inner.borrow_mut();
        let slot = guard
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };

        if s.fd < 0 {
            let domain = storage.ss_family as i32;
            let fd = sys_socket(domain)?;
            sys_set_reuseaddr(fd)?;
            sys_ipv6_is_necessary(fd, domain)?;
            s.fd = fd;
        }

        sys_bind(s.fd, &storage, len)
    }

    /// Begins a non-blocking connect; `cb(status)` fires exactly once.
    ///
    /// Errors detected before the connect is issued are returned
    /// directly and the callback never fires.
    ///
    /// # Panics
    ///
    /// Panics if a connect is already in progress.
    pub fn connect(&self, address: &str, cb: impl FnOnce(i32) + 'static) -> io::Result<()> {
        let (storage, _) = sys_parse_sockaddr(address)?;
        let addr = sockaddr_storage_to_socketaddr(&storage)?;

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        assert!(!slot.closing, "connect on a closing stream");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };
        assert!(!s.connecting, "connect already in progress");

        if s.fd < 0 {
            let domain = storage.ss_family as i32;
            let fd = sys_socket(domain)?;
            sys_set_reuseaddr(fd)?;
            sys_ipv6_is_necessary(fd, domain)?;
            s.fd = fd;
        }

        match sys_connect(s.fd, &addr) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e),
        }

        s.connecting = true;
        s.connect_cb = Some(Box::new(cb));
        update_registration(&mut inner.poller, self.key, s);

        Ok(())
    }

    /// Marks the stream passive; `cb(status)` fires once per incoming
    /// connection (or with a negative status on an accept-layer
    /// error, which does not close the stream). Call
    /// [`accept`](Self::accept) from the callback.
    pub fn listen(&self, backlog: i32, cb: impl FnMut(i32) + 'static) -> io::Result<()> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        assert!(!slot.closing, "listen on a closing stream");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };
        assert!(s.fd >= 0, "listen on an unbound stream");

        sys_listen(s.fd, backlog)?;

        s.listening = true;
        s.connection_cb = Some(Box::new(cb));
        update_registration(&mut inner.poller, self.key, s);

        Ok(())
    }

    /// Takes the next pending connection as a new stream on the same
    /// loop. Returns `WouldBlock` when none is queued.
    pub fn accept(&self) -> io::Result<TcpStream> {
        let fd = {
            let mut guard = self.inner.borrow_mut();
            let slot = guard
                .handles
                .get_mut(self.key)
                .expect("stream used after close");
            let Kind::Tcp(s) = &mut slot.kind else {
                unreachable!();
            };
            s.accept_backlog.pop_front()
        };

        match fd {
            Some(fd) => Ok(Self::adopt(&self.inner, fd)),
            None => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no pending connection",
            )),
        }
    }

    /// Begins a continuous read loop; `cb(nread, buf)` fires per
    /// chunk. A negative `nread` is end-of-stream
    /// ([`status::EOF`](crate::status::EOF)) or an error; stop reading
    /// on non-positive values. The buffer is the stream's reused
    /// scratch and must not be retained past the callback.
    ///
    /// # Panics
    ///
    /// Panics if the stream is already reading.
    pub fn read_start(&self, cb: impl FnMut(isize, &[u8]) + 'static) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        assert!(!slot.closing, "read_start on a closing stream");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };
        assert!(!s.reading, "stream is already reading");
        assert!(s.fd >= 0, "read_start on an unconnected stream");

        s.reading = true;
        s.read_cb = Some(Box::new(cb));
        update_registration(&mut inner.poller, self.key, s);
    }

    /// Ends the read loop. No read callback fires after this returns.
    pub fn read_stop(&self) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let Some(slot) = inner.handles.get_mut(self.key) else {
            return;
        };
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };

        s.reading = false;
        s.read_cb = None;
        update_registration(&mut inner.poller, self.key, s);
    }

    /// Enqueues a vectorized write; `cb(status)` fires exactly once on
    /// completion. Multiple writes may be outstanding; completions
    /// arrive in issue order.
    pub fn write(&self, bufs: &[&[u8]], cb: impl FnOnce(i32) + 'static) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        assert!(!slot.closing, "write on a closing stream");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };
        assert!(s.fd >= 0, "write on an unconnected stream");

        let mut req = s.write_pool.acquire();
        for buf in bufs {
            req.data.extend_from_slice(buf);
        }
        req.cb = Some(Box::new(cb));

        s.write_queue.push_back(req);
        update_registration(&mut inner.poller, self.key, s);
    }

    /// Half-closes the writable side once queued writes have flushed;
    /// `cb(status)` fires once.
    ///
    /// # Panics
    ///
    /// Panics if a shutdown is already pending.
    pub fn shutdown(&self, cb: impl FnOnce(i32) + 'static) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let slot = inner
            .handles
            .get_mut(self.key)
            .expect("stream used after close");
        assert!(!slot.closing, "shutdown on a closing stream");
        let Kind::Tcp(s) = &mut slot.kind else {
            unreachable!();
        };
        assert!(s.shutdown_req.is_none(), "shutdown already pending");
        assert!(s.fd >= 0, "shutdown on an unconnected stream");

        let mut req = s.shutdown_pool.acquire();
        req.cb = Some(Box::new(cb));
        s.shutdown_req = Some(req);
        update_registration(&mut inner.poller, self.key, s);
    }

    /// Local address of the bound or connected socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.require_fd()?)
    }

    /// Sets the `TCP_NODELAY` socket option.
    pub fn set_nodelay(&self, enabled: bool) -> io::Result<()> {
        sys_set_nodelay(self.require_fd()?, enabled)
    }

    /// The underlying descriptor, or `-1` when no socket is open.
    pub fn fd(&self) -> RawFd {
        let guard = self.inner.borrow();
        match guard.handles.get(self.key).map(|slot| &slot.kind) {
            Some(Kind::Tcp(s)) => s.fd,
            _ => -1,
        }
    }

    fn require_fd(&self) -> io::Result<RawFd> {
        let fd = self.fd();
        if fd < 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no socket"));
        }
        Ok(fd)
    }
}

impl_handle!(TcpStream);

/// Recomputes what the stream needs from the poller and registers,
/// reregisters, or deregisters accordingly.
fn update_registration(poller: &mut Poller, key: Key, s: &mut TcpState) {
    if s.fd < 0 {
        s.registered = false;
        return;
    }

    let interest = Interest {
        read: s.reading || s.listening,
        write: s.connecting || !s.write_queue.is_empty() || s.shutdown_req.is_some(),
    };

    let token = reactor::key_token(key);

    if interest.is_empty() {
        if s.registered {
            poller.deregister(s.fd);
            s.registered = false;
        }
    } else if s.registered {
        poller.reregister(s.fd, token, interest);
    } else {
        poller.register(s.fd, token, interest);
        s.registered = true;
    }
}

/// Entry point for readiness events on a stream slot, called by the
/// loop's dispatcher.
pub(crate) fn handle_io(inner: &Shared, key: Key, readable: bool, writable: bool) {
    if readable {
        handle_readable(inner, key);
    }
    if writable {
        handle_writable(inner, key);
    }

    let mut guard = inner.borrow_mut();
    let inner_ref = &mut *guard;
    if let Some(slot) = inner_ref.handles.get_mut(key) {
        if !slot.closing {
            if let Kind::Tcp(s) = &mut slot.kind {
                update_registration(&mut inner_ref.poller, key, s);
            }
        }
    }
}

enum ReadOutcome {
    Data(usize),
    Eof,
    Failed(i32),
    Spurious,
}

fn handle_readable(inner: &Shared, key: Key) {
    // Accept loop for listeners: one connection callback per accepted
    // (or failed) connection, re-checking state every iteration since
    // the callback may stop listening or close the stream.
    loop {
        let step = {
            let mut guard = inner.borrow_mut();
            let Some(slot) = guard.handles.get_mut(key) else {
                return;
            };
            if slot.closing {
                return;
            }
            let Kind::Tcp(s) = &mut slot.kind else {
                return;
            };
            if !s.listening || s.fd < 0 {
                None
            } else {
                match sys_accept(s.fd) {
                    Ok((fd, _addr)) => {
                        s.accept_backlog.push_back(fd);
                        Some((s.connection_cb.take(), 0))
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => Some((s.connection_cb.take(), status::from_io_error(&e))),
                }
            }
        };

        let Some((cb, st)) = step else {
            break;
        };
        let Some(mut cb) = cb else {
            break;
        };

        cb(st);

        {
            let mut guard = inner.borrow_mut();
            if let Some(slot) = guard.handles.get_mut(key) {
                if let Kind::Tcp(s) = &mut slot.kind {
                    if s.listening && s.connection_cb.is_none() {
                        s.connection_cb = Some(cb);
                    }
                }
            }
        }

        if st < 0 {
            break;
        }
    }

    // Read loop: drain until WouldBlock, EOF, or error, delivering one
    // callback per chunk. The scratch buffer is moved out around each
    // callback so the borrow on the loop state is released.
    loop {
        let step = {
            let mut guard = inner.borrow_mut();
            let Some(slot) = guard.handles.get_mut(key) else {
                return;
            };
            if slot.closing {
                return;
            }
            let Kind::Tcp(s) = &mut slot.kind else {
                return;
            };
            if !s.reading || s.fd < 0 {
                None
            } else {
                let mut buf = mem::take(&mut s.read_buf);
                if buf.len() < READ_CHUNK {
                    buf.resize(READ_CHUNK, 0);
                }

                let n = sys_read(s.fd, &mut buf);
                let outcome = if n > 0 {
                    ReadOutcome::Data(n as usize)
                } else if n == 0 {
                    ReadOutcome::Eof
                } else {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::WouldBlock {
                        ReadOutcome::Spurious
                    } else {
                        ReadOutcome::Failed(status::from_io_error(&err))
                    }
                };

                Some((buf, outcome, s.read_cb.take()))
            }
        };

        let Some((buf, outcome, cb)) = step else {
            break;
        };
        let Some(mut cb) = cb else {
            restore_read_buf(inner, key, buf);
            break;
        };

        let done = match outcome {
            ReadOutcome::Data(n) => {
                cb(n as isize, &buf[..n]);
                false
            }
            ReadOutcome::Eof => {
                cb(status::EOF as isize, &[]);
                true
            }
            ReadOutcome::Failed(st) => {
                cb(st as isize, &[]);
                true
            }
            ReadOutcome::Spurious => true,
        };

        {
            let mut guard = inner.borrow_mut();
            if let Some(slot) = guard.handles.get_mut(key) {
                if let Kind::Tcp(s) = &mut slot.kind {
                    if s.read_buf.is_empty() {
                        s.read_buf = buf;
                    }
                    if s.reading && s.read_cb.is_none() {
                        s.read_cb = Some(cb);
                    }
                }
            }
        }

        if done {
            break;
        }
    }
}

fn restore_read_buf(inner: &Shared, key: Key, buf: Vec<u8>) {
    let mut guard = inner.borrow_mut();
    if let Some(slot) = guard.handles.get_mut(key) {
        if let Kind::Tcp(s) = &mut slot.kind {
            if s.read_buf.is_empty() {
                s.read_buf = buf;
            }
        }
    }
}

enum WriteStep {
    /// One request finished (successfully or not); fire its callback
    /// and keep flushing.
    Completed(Box<dyn FnOnce(i32)>, i32),
    /// The pending shutdown was performed; fire and stop.
    Shutdown(Option<Box<dyn FnOnce(i32)>>, i32),
    /// Partial write or WouldBlock; wait for the next writable event.
    Blocked,
    Idle,
}

fn handle_writable(inner: &Shared, key: Key) {
    // Connect completion first: the pending error tells us whether the
    // connect succeeded.
    let connect = {
        let mut guard = inner.borrow_mut();
        let Some(slot) = guard.handles.get_mut(key) else {
            return;
        };
        if slot.closing {
            return;
        }
        let Kind::Tcp(s) = &mut slot.kind else {
            return;
        };
        if s.connecting {
            s.connecting = false;
            let st = match sys_socket_error(s.fd) {
                Ok(0) => 0,
                Ok(errno) => -errno,
                Err(e) => status::from_io_error(&e),
            };
            s.connect_cb.take().map(|cb| (cb, st))
        } else {
            None
        }
    };

    if let Some((cb, st)) = connect {
        cb(st);
    }

    // Flush the write queue head-first. Every completed request is
    // removed from the queue and released to the pool before its
    // callback runs.
    loop {
        let step = {
            let mut guard = inner.borrow_mut();
            let Some(slot) = guard.handles.get_mut(key) else {
                return;
            };
            if slot.closing {
                return;
            }
            let Kind::Tcp(s) = &mut slot.kind else {
                return;
            };

            if s.fd < 0 {
                WriteStep::Idle
            } else if let Some(front) = s.write_queue.front_mut() {
                let n = sys_write(s.fd, &front.data[front.written..]);

                if n >= 0 {
                    front.written += n as usize;

                    if front.written == front.data.len() {
                        let mut req = s.write_queue.pop_front().unwrap();
                        let cb = req.cb.take().expect("write request lost its callback");
                        s.write_pool.release(req);
                        WriteStep::Completed(cb, 0)
                    } else {
                        WriteStep::Blocked
                    }
                } else {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::WouldBlock {
                        WriteStep::Blocked
                    } else {
                        let mut req = s.write_queue.pop_front().unwrap();
                        let cb = req.cb.take().expect("write request lost its callback");
                        s.write_pool.release(req);
                        WriteStep::Completed(cb, status::from_io_error(&err))
                    }
                }
            } else if let Some(mut req) = s.shutdown_req.take() {
                let st = match sys_shutdown(s.fd, Shutdown::Write) {
                    Ok(()) => 0,
                    Err(e) => status::from_io_error(&e),
                };
                let cb = req.cb.take();
                s.shutdown_pool.release(req);
                WriteStep::Shutdown(cb, st)
            } else {
                WriteStep::Idle
            }
        };

        match step {
            WriteStep::Completed(cb, st) => cb(st),
            WriteStep::Shutdown(cb, st) => {
                if let Some(cb) = cb {
                    cb(st);
                }
                break;
            }
            WriteStep::Blocked | WriteStep::Idle => break,
        }
    }
}
