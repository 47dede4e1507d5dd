//! Single-threaded echo server built directly on the reactor core:
//! one poller, one acceptor, one channel and buffer pair per
//! connection.
//!
//! ```text
//! cargo run --example echo
//! # elsewhere:
//! nc 127.0.0.1 7000
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use log::{info, warn};
use mio::net::TcpStream;
use weir_io::prelude::*;

struct Connection {
    // holds the descriptor open for the connection's lifetime
    #[allow(dead_code)]
    stream: TcpStream,
    channel: ChannelRef,
    peer: SocketAddr,
    input: Buffer,
    output: Buffer,
}

fn main() -> weir_io::Result<()> {
    env_logger::init();

    let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
    let mut poller = Poller::new()?;
    let mut acceptor = Acceptor::new(addr, false)?;

    // accepted sockets are parked here and wired into the loop after
    // dispatch, so the callback never touches the poller mid-poll
    let pending: Rc<RefCell<Vec<(TcpStream, SocketAddr)>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let pending = pending.clone();
        acceptor.set_new_connection_callback(move |stream, peer| {
            pending.borrow_mut().push((stream, peer));
        });
    }
    acceptor.listen(&mut poller);
    info!("echo server on {}", addr);

    let mut connections: HashMap<RawFd, Connection> = HashMap::new();

    loop {
        let (_at, active) = poller.poll(10_000);

        let mut closed: Vec<RawFd> = Vec::new();
        for channel in &active {
            if Rc::ptr_eq(channel, acceptor.channel()) {
                acceptor.handle_read();
                continue;
            }

            let fd = channel.borrow().fd();
            let ready = channel.borrow().ready();
            let Some(conn) = connections.get_mut(&fd) else {
                continue;
            };

            if ready.contains(EventSet::READABLE) || ready.contains(EventSet::CLOSED) {
                match conn.input.read_fd(fd) {
                    Ok(0) => {
                        info!("{} disconnected", conn.peer);
                        closed.push(fd);
                        continue;
                    }
                    Ok(n) => {
                        info!("{} sent {} bytes", conn.peer, n);
                        let line = conn.input.retrieve_all_as_string();
                        conn.output.append(line.as_bytes());
                    }
                    Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {}
                    Err(e) => {
                        warn!("{} read error: {}", conn.peer, e);
                        closed.push(fd);
                        continue;
                    }
                }
            }

            if conn.output.readable_bytes() > 0 {
                match conn.output.write_fd(fd) {
                    Ok(n) => conn.output.retrieve(n),
                    Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {}
                    Err(e) => {
                        warn!("{} write error: {}", conn.peer, e);
                        closed.push(fd);
                        continue;
                    }
                }
            }

            // leftover output waits for writability; otherwise reads only
            let mut ch = channel.borrow_mut();
            if conn.output.readable_bytes() > 0 {
                ch.enable_writing();
            } else {
                ch.disable_writing();
            }
            drop(ch);
            poller.update_channel(channel);
        }

        for fd in closed {
            if let Some(conn) = connections.remove(&fd) {
                conn.channel.borrow_mut().disable_all();
                poller.remove_channel(&conn.channel);
                // conn.stream drops here and closes the descriptor
            }
        }

        for (stream, peer) in pending.borrow_mut().drain(..) {
            let fd = stream.as_raw_fd();
            let channel = Channel::new(fd).into_ref();
            channel.borrow_mut().enable_reading();
            poller.update_channel(&channel);
            connections.insert(
                fd,
                Connection {
                    stream,
                    channel,
                    peer,
                    input: Buffer::new(),
                    output: Buffer::new(),
                },
            );
            info!("{} connected", peer);
        }
    }
}
