//! # Weir-IO
//! The non-blocking I/O core of a reactor-style network server: an
//! epoll-driven readiness multiplexer, per-descriptor channels, a
//! growable network buffer, a connection acceptor, and a thread
//! primitive whose OS id is observable the moment it starts.
//!
//! This crate is the bottom layer. Connection objects, timers and
//! request routing live above it and consume these primitives; Weir-IO
//! itself defines no wire protocol, no framing and no CLI.
//!
//! ## Architecture Overview
//! ```text
//! ┌────────────────┐   poll    ┌─────────────┐
//! │  owning loop   │──────────▶│   Poller    │ fd → Weak<Channel>
//! └────────────────┘           └─────────────┘
//!        │ dispatch                   │ readiness
//!        ▼                           ▼
//! ┌────────────────┐           ┌─────────────┐
//! │   Acceptor     │           │   Channel   │──▶ callbacks
//! └────────────────┘           └─────────────┘
//!        │ accept                     │ read/write
//!        ▼                           ▼
//!   new connections              ┌─────────────┐
//!                                │   Buffer    │
//!                                └─────────────┘
//! ```
//!
//! One [`Poller`] is owned and driven by exactly one thread: it blocks
//! in [`Poller::poll`], fills the list of channels with events, and
//! the owning loop dispatches each one. The poller never owns channel
//! lifetime: it keeps a non-owning fd-keyed side table and the
//! channel's owner removes it before dropping it. There are no locks
//! anywhere on this path; cross-thread work handoff belongs to the
//! layers above.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weir_io::{Acceptor, Channel, Poller};
//!
//! fn main() -> weir_io::Result<()> {
//!     let mut poller = Poller::new()?;
//!     let mut acceptor = Acceptor::new("127.0.0.1:8080".parse().unwrap(), false)?;
//!     acceptor.set_new_connection_callback(|stream, peer| {
//!         println!("connection from {}", peer);
//!         // wrap `stream` in a connection object, register its channel
//!     });
//!     acceptor.listen(&mut poller);
//!
//!     loop {
//!         let (at, active) = poller.poll(10_000);
//!         for channel in &active {
//!             if std::rc::Rc::ptr_eq(channel, acceptor.channel()) {
//!                 acceptor.handle_read();
//!             } else {
//!                 Channel::handle_event(channel, at);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! - [`Poller`]: readiness multiplexing and the channel registration
//!   state machine
//! - [`Channel`]: one descriptor's interest set, readiness and handler
//!   slots
//! - [`Buffer`]: prepend/read/write-indexed byte buffer all socket I/O
//!   flows through
//! - [`Acceptor`]: listening socket plus accept-and-hand-off
//! - [`Thread`]: OS thread with a synchronized start handshake
//! - [`current_thread::tid`]: cached OS id of the calling thread

pub mod acceptor;
pub mod buffer;
pub mod channel;
pub mod current_thread;
pub mod error;
pub mod event;
pub mod poller;
pub mod thread;

pub use acceptor::Acceptor;
pub use buffer::Buffer;
pub use channel::{Channel, ChannelRef, ChannelState};
pub use error::{Error, Result};
pub use event::EventSet;
pub use poller::Poller;
pub use thread::Thread;

/// Re-exports of the types nearly every consumer touches.
///
/// ```rust
/// use weir_io::prelude::*;
/// ```
pub mod prelude {
    pub use crate::acceptor::Acceptor;
    pub use crate::buffer::Buffer;
    pub use crate::channel::{Channel, ChannelRef, ChannelState};
    pub use crate::current_thread;
    pub use crate::error::{Error, Result};
    pub use crate::event::EventSet;
    pub use crate::poller::Poller;
    pub use crate::thread::Thread;
}
