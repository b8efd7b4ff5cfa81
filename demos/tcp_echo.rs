//! Echo round trip on a single loop: a listener, one client, one
//! echoed message, then teardown.

use pontis::net::TcpStream;
use pontis::{EventLoop, RunMode, status};

use std::cell::RefCell;
use std::rc::Rc;

fn main() {
    env_logger::init();

    let lp = EventLoop::new();

    let server = TcpStream::new(&lp);
    server.bind("127.0.0.1:0").expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();
    println!("listening on {addr}");

    let conns: Rc<RefCell<Vec<TcpStream>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let server2 = server.clone();
        let conns = conns.clone();
        server
            .listen(16, move |st| {
                if st < 0 {
                    log::warn!("accept error: status {st}");
                    return;
                }

                let conn = server2.accept().expect("pending connection");
                println!("server: connection accepted");

                let c = conn.clone();
                let server3 = server2.clone();
                conn.read_start(move |nread, buf| {
                    if nread > 0 {
                        c.write(&[&buf[..nread as usize]], |st| {
                            if st < 0 {
                                log::warn!("echo write failed: status {st}");
                            }
                        });
                    } else {
                        if nread != status::EOF as isize {
                            log::warn!("read failed: status {nread}");
                        }
                        c.read_stop();
                        c.close(|| println!("server: connection closed"));
                        server3.close(|| println!("server: listener closed"));
                    }
                });

                conns.borrow_mut().push(conn);
            })
            .expect("listen");
    }

    let client = TcpStream::new(&lp);
    {
        let client2 = client.clone();
        client
            .connect(&addr, move |st| {
                if st < 0 {
                    log::warn!("connect failed: status {st}");
                    client2.close(|| {});
                    return;
                }

                client2.write(&[b"hello over the loop".as_slice()], |st| {
                    if st < 0 {
                        log::warn!("write failed: status {st}");
                    }
                });

                let client3 = client2.clone();
                let echoed = Rc::new(RefCell::new(Vec::new()));
                client2.read_start(move |nread, buf| {
                    if nread <= 0 {
                        client3.read_stop();
                        client3.close(|| {});
                        return;
                    }

                    echoed.borrow_mut().extend_from_slice(&buf[..nread as usize]);
                    if echoed.borrow().len() == b"hello over the loop".len() {
                        println!(
                            "client: echoed back: {}",
                            String::from_utf8_lossy(&echoed.borrow())
                        );
                        client3.read_stop();
                        client3.close(|| println!("client: closed"));
                    }
                });
            })
            .expect("connect");
    }

    lp.run(RunMode::Default);
    println!("loop drained");
}
