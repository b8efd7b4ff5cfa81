use pontis::net::TcpStream;
use pontis::{EventLoop, RunMode, status};

use std::cell::{Cell, RefCell};
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

/// A connected pair of loop-managed streams over a socketpair.
fn stream_pair(lp: &EventLoop) -> (TcpStream, TcpStream) {
    let (a, b) = UnixStream::pair().expect("socketpair");
    let sa = TcpStream::open(lp, a.into_raw_fd()).unwrap();
    let sb = TcpStream::open(lp, b.into_raw_fd()).unwrap();
    (sa, sb)
}

#[test]
fn writes_complete_exactly_once_in_issue_order() {
    let lp = EventLoop::new();
    let (sa, sb) = stream_pair(&lp);

    let order = Rc::new(RefCell::new(Vec::new()));
    let received = Rc::new(RefCell::new(Vec::new()));

    let chunks = [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()];
    for (i, chunk) in chunks.into_iter().enumerate() {
        let order = order.clone();
        sa.write(&[chunk], move |st| {
            assert_eq!(st, 0);
            order.borrow_mut().push(i);
        });
    }

    {
        let received = received.clone();
        let sa = sa.clone();
        let sb2 = sb.clone();
        sb.read_start(move |nread, buf| {
            assert!(nread > 0, "unexpected read status {nread}");
            received.borrow_mut().extend_from_slice(&buf[..nread as usize]);

            if received.borrow().len() == b"onetwothree".len() {
                sb2.read_stop();
                sb2.close(|| {});
                sa.close(|| {});
            }
        });
    }

    lp.run(RunMode::Default);

    assert_eq!(*order.borrow(), vec![0, 1, 2]);
    assert_eq!(&*received.borrow(), b"onetwothree");
}

#[test]
fn shutdown_flushes_queued_writes_first() {
    let lp = EventLoop::new();
    let (sa, sb) = stream_pair(&lp);

    let shutdown_done = Rc::new(Cell::new(false));
    let got_eof = Rc::new(Cell::new(false));
    let received = Rc::new(RefCell::new(Vec::new()));

    sa.write(&[b"payload".as_slice()], |st| assert_eq!(st, 0));
    {
        let done = shutdown_done.clone();
        sa.shutdown(move |st| {
            assert_eq!(st, 0);
            done.set(true);
        });
    }

    {
        let received = received.clone();
        let got_eof = got_eof.clone();
        let sa = sa.clone();
        let sb2 = sb.clone();
        sb.read_start(move |nread, buf| {
            if nread > 0 {
                received.borrow_mut().extend_from_slice(&buf[..nread as usize]);
            } else {
                assert_eq!(nread, status::EOF as isize);
                got_eof.set(true);
                sb2.read_stop();
                sb2.close(|| {});
                sa.close(|| {});
            }
        });
    }

    lp.run(RunMode::Default);

    assert!(shutdown_done.get());
    assert!(got_eof.get());
    assert_eq!(&*received.borrow(), b"payload");
}

#[test]
fn close_cancels_inflight_requests() {
    let lp = EventLoop::new();
    let (sa, sb) = stream_pair(&lp);

    let statuses = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..2 {
        let statuses = statuses.clone();
        sa.write(&[b"never flushed".as_slice()], move |st| {
            statuses.borrow_mut().push(st);
        });
    }
    {
        let statuses = statuses.clone();
        sa.shutdown(move |st| statuses.borrow_mut().push(st));
    }

    // Closing before the loop runs: every queued request still gets
    // its one completion, with the canceled status.
    sa.close(|| {});
    sb.close(|| {});

    assert_eq!(
        *statuses.borrow(),
        vec![status::ECANCELED, status::ECANCELED, status::ECANCELED]
    );
    assert_eq!(lp.handle_count(), 0);
}

#[test]
#[should_panic(expected = "shutdown already pending")]
fn double_shutdown_panics() {
    let lp = EventLoop::new();
    let (sa, _sb) = stream_pair(&lp);

    sa.shutdown(|_| {});
    sa.shutdown(|_| {});
}

#[test]
fn listen_accept_echo_round_trip() {
    let lp = EventLoop::new();

    let server = TcpStream::new(&lp);
    server.bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let echoed = Rc::new(RefCell::new(Vec::new()));
    let conns: Rc<RefCell<Vec<TcpStream>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let server2 = server.clone();
        let conns = conns.clone();
        server
            .listen(16, move |status| {
                assert_eq!(status, 0);
                let conn = server2.accept().expect("pending connection");

                let c = conn.clone();
                let server3 = server2.clone();
                conn.read_start(move |nread, buf| {
                    if nread > 0 {
                        // Echo the chunk back.
                        c.write(&[&buf[..nread as usize]], |st| assert_eq!(st, 0));
                    } else {
                        assert_eq!(nread, status::EOF as isize);
                        c.read_stop();
                        c.close(|| {});
                        server3.close(|| {});
                    }
                });

                conns.borrow_mut().push(conn);
            })
            .unwrap();
    }

    let client = TcpStream::new(&lp);
    {
        let client2 = client.clone();
        let echoed = echoed.clone();
        client
            .connect(&addr, move |status| {
                assert_eq!(status, 0);
                client2.write(&[b"ping".as_slice()], |st| assert_eq!(st, 0));

                let client3 = client2.clone();
                let echoed = echoed.clone();
                client2.read_start(move |nread, buf| {
                    assert!(nread > 0, "unexpected read status {nread}");
                    echoed.borrow_mut().extend_from_slice(&buf[..nread as usize]);

                    if echoed.borrow().len() == 4 {
                        // Closing the client half-closes the server
                        // side, which tears the rest down.
                        client3.read_stop();
                        client3.close(|| {});
                    }
                });
            })
            .unwrap();
    }

    lp.run(RunMode::Default);

    assert_eq!(&*echoed.borrow(), b"ping");
    assert_eq!(lp.handle_count(), 0);
}

#[test]
fn accept_without_pending_connection_would_block() {
    let lp = EventLoop::new();

    let server = TcpStream::new(&lp);
    server.bind("127.0.0.1:0").unwrap();
    server.listen(4, |_| {}).unwrap();

    let err = server.accept().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);

    server.close(|| {});
}

#[test]
fn nodelay_and_local_addr() {
    let lp = EventLoop::new();

    let server = TcpStream::new(&lp);
    server.bind("127.0.0.1:0").unwrap();

    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(server.set_nodelay(true).is_ok());

    server.close(|| {});
}
