use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

use log::{error, info, trace, warn};
use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use crate::channel::{Channel, ChannelRef};
use crate::error::{Error, Result};
use crate::poller::Poller;

/// Invoked once per accepted connection with the connected socket and
/// the peer's address. Ownership of the socket transfers to the
/// callback; dropping it closes the descriptor.
pub type NewConnectionCallback = Box<dyn FnMut(TcpStream, SocketAddr)>;

/// Owns a listening socket and its channel, and turns readiness on the
/// listener into accepted connections.
///
/// Lifecycle is one-way: constructed not-listening, and
/// [`listen`](Acceptor::listen) makes it listening for the rest of
/// its life.
/// The owning loop calls [`handle_read`](Acceptor::handle_read) when
/// the acceptor's channel reports readable, and must
/// [`remove_channel`](Poller::remove_channel) before dropping the
/// acceptor.
///
/// The new-connection callback is a single slot meant to be assigned
/// once, before `listen`; it is not meant to be swapped while the
/// loop is dispatching.
///
/// ## Example
///
/// ```rust,no_run
/// use weir_io::{Acceptor, Poller};
///
/// let mut poller = Poller::new()?;
/// let mut acceptor = Acceptor::new("127.0.0.1:9000".parse().unwrap(), false)?;
/// acceptor.set_new_connection_callback(|stream, peer| {
///     println!("new connection from {}", peer);
///     // hand the stream to a connection object
/// });
/// acceptor.listen(&mut poller);
/// # Ok::<(), weir_io::Error>(())
/// ```
pub struct Acceptor {
    listener: TcpListener,
    channel: ChannelRef,
    new_connection_cb: Option<NewConnectionCallback>,
    listening: bool,
    // reserved slot for draining accepts under descriptor exhaustion
    idle_fd: Option<OwnedFd>,
}

impl Acceptor {
    /// Binds a non-blocking listening socket on `listen_addr`.
    /// `reuse_port` additionally sets `SO_REUSEPORT` so several
    /// acceptors (typically in different processes) can share the
    /// port; `SO_REUSEADDR` is always set.
    pub fn new(listen_addr: SocketAddr, reuse_port: bool) -> Result<Acceptor> {
        let socket = Socket::new(
            Domain::for_address(listen_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(Error::Listen)?;
        socket.set_nonblocking(true).map_err(Error::Listen)?;
        socket.set_reuse_address(true).map_err(Error::Listen)?;
        if reuse_port {
            socket.set_reuse_port(true).map_err(Error::Listen)?;
        }
        socket.bind(&listen_addr.into()).map_err(Error::Listen)?;
        socket.listen(1024).map_err(Error::Listen)?;

        let listener = TcpListener::from_std(socket.into());
        let channel = Channel::new(listener.as_raw_fd()).into_ref();
        let idle_fd = open_idle_fd()
            .map_err(|e| {
                warn!("could not reserve idle fd: {}", e);
                e
            })
            .ok();

        Ok(Acceptor {
            listener,
            channel,
            new_connection_cb: None,
            listening: false,
            idle_fd,
        })
    }

    /// Single-assignment slot; set it before [`listen`](Acceptor::listen).
    pub fn set_new_connection_callback(
        &mut self,
        cb: impl FnMut(TcpStream, SocketAddr) + 'static,
    ) {
        self.new_connection_cb = Some(Box::new(cb));
    }

    pub fn listening(&self) -> bool {
        self.listening
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The listening socket's channel, for the owning loop to match
    /// active channels against.
    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    /// Marks the acceptor listening and registers read interest on the
    /// listening socket. Readiness there means a pending connection.
    pub fn listen(&mut self, poller: &mut Poller) {
        self.listening = true;
        self.channel.borrow_mut().enable_reading();
        poller.update_channel(&self.channel);
        info!("listening on {:?}", self.listener.local_addr().ok());
    }

    /// Accepts every pending connection, looping until the backlog
    /// reports `WouldBlock`. Called by the owning loop when the
    /// acceptor's channel reports readable. Notifications are edge
    /// shaped: a burst of N connections may arrive as one event, so
    /// stopping early would strand the rest of the burst until some
    /// future connection produces a new edge.
    ///
    /// With no callback installed each accepted socket is dropped on
    /// the spot so the descriptor cannot leak. Accept failures are
    /// logged and the acceptor keeps listening. Descriptor-table
    /// exhaustion triggers the reserved-fd drain, which closes the
    /// pending connection the process cannot service; the loop then
    /// continues so the whole backlog is cleared within this one
    /// notification.
    pub fn handle_read(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    trace!("accepted connection from {}", peer);
                    match &mut self.new_connection_cb {
                        Some(cb) => cb(stream, peer),
                        None => drop(stream),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {}", e);
                    if matches!(
                        e.raw_os_error(),
                        Some(libc::EMFILE) | Some(libc::ENFILE)
                    ) {
                        if self.drain_one_with_idle_fd() {
                            continue;
                        }
                    }
                    break;
                }
            }
        }
    }

    /// The descriptor table is full: give back the reserved fd, accept
    /// the pending connection into the freed slot, close it right
    /// away, then re-reserve. Returns whether a slot was available to
    /// drain with, so the accept loop knows to keep going.
    fn drain_one_with_idle_fd(&mut self) -> bool {
        if self.idle_fd.take().is_none() {
            warn!("descriptor table exhausted and no idle fd reserved");
            return false;
        }
        let fd = unsafe {
            libc::accept(self.listener.as_raw_fd(), ptr::null_mut(), ptr::null_mut())
        };
        if fd >= 0 {
            unsafe { libc::close(fd) };
            warn!("descriptor table exhausted; dropped one pending connection");
        }
        match open_idle_fd() {
            Ok(idle) => self.idle_fd = Some(idle),
            Err(e) => warn!("could not re-reserve idle fd: {}", e),
        }
        true
    }
}

fn open_idle_fd() -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::open(
            b"/dev/null\0".as_ptr() as *const libc::c_char,
            libc::O_RDONLY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
