use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::channel::{Channel, ChannelRef, ChannelState};
use crate::error::Result;
use crate::event::EventSet;

/// Initial capacity of the OS event buffer; doubled whenever a poll
/// fills it completely.
const INIT_EVENT_LIST_SIZE: usize = 16;

type WeakChannel = Weak<std::cell::RefCell<Channel>>;

/// Readiness multiplexer over the OS polling facility.
///
/// One `Poller` is owned and driven by exactly one thread. It carries
/// no locking; every call below must come from that thread, and
/// cross-thread scheduling (waking one loop from another) is the
/// owning loop's concern, not this type's.
///
/// The poller never owns channel lifetime. It keeps an fd-keyed side
/// table of `Weak` references: the token handed to the OS is just the
/// fd, and dispatch looks the channel back up here. The channel's
/// owner must call [`remove_channel`](Poller::remove_channel) before
/// dropping it; a stale entry discovered during dispatch is logged and
/// skipped.
///
/// ## Example
///
/// ```rust,no_run
/// use weir_io::{Channel, Poller};
/// use std::time::Instant;
///
/// let mut poller = Poller::new()?;
/// // ... register channels ...
/// loop {
///     let (at, active) = poller.poll(10_000);
///     for channel in &active {
///         Channel::handle_event(channel, at);
///     }
/// }
/// # Ok::<(), weir_io::Error>(())
/// ```
pub struct Poller {
    poll: Poll,
    events: Events,
    events_capacity: usize,
    channels: HashMap<RawFd, WeakChannel>,
}

impl Poller {
    /// Creates the OS polling context. Failure here is unrecoverable
    /// for the would-be loop, so the caller typically unwraps.
    pub fn new() -> Result<Poller> {
        let poll = Poll::new()?;
        Ok(Poller {
            poll,
            events: Events::with_capacity(INIT_EVENT_LIST_SIZE),
            events_capacity: INIT_EVENT_LIST_SIZE,
            channels: HashMap::new(),
        })
    }

    /// Blocks until at least one registered descriptor reports an
    /// event or `timeout_ms` elapses (negative blocks indefinitely).
    /// Returns the time the call came back and the channels with
    /// events, readiness already recorded on each.
    ///
    /// A signal-interrupted wait returns an empty list; the owning
    /// loop just polls again. Zero events is likewise an empty list,
    /// not an error. Any other poll failure means the loop cannot make
    /// progress and panics.
    pub fn poll(&mut self, timeout_ms: i32) -> (Instant, Vec<ChannelRef>) {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                debug!("poll interrupted by signal, retrying next iteration");
                return (Instant::now(), Vec::new());
            }
            error!("poll failed: {}", e);
            panic!("Poller: event wait failed: {}", e);
        }
        let now = Instant::now();

        let mut active = Vec::new();
        let mut stale = Vec::new();
        let mut filled = 0usize;
        for event in self.events.iter() {
            filled += 1;
            let fd = event.token().0 as RawFd;
            let Some(weak) = self.channels.get(&fd) else {
                warn!("event for fd {} with no channel association", fd);
                continue;
            };
            let Some(channel) = weak.upgrade() else {
                // owner dropped the channel without removing it first
                warn!("channel for fd {} dropped while still registered", fd);
                stale.push(fd);
                continue;
            };
            let ready = EventSet::from_mio(event);
            trace!("fd {} ready: {}", fd, ready);
            channel.borrow_mut().set_ready(ready);
            active.push(channel);
        }
        for fd in stale {
            self.channels.remove(&fd);
        }

        trace!("{} events happened", filled);
        if filled == self.events_capacity {
            // a full buffer may have left events behind; grow before
            // the next wait so no channel is starved
            self.events_capacity *= 2;
            self.events = Events::with_capacity(self.events_capacity);
            debug!("event buffer grown to {}", self.events_capacity);
        }

        (now, active)
    }

    /// Syncs a channel's interest set with the OS registration,
    /// driving the New/Added/Deleted state machine:
    ///
    /// - New or Deleted with interest → ADD, mark Added (New also
    ///   inserts the fd association; Deleted reuses the retained one).
    /// - Added with empty interest → DEL, mark Deleted, association
    ///   retained for a cheap re-add.
    /// - Added with changed interest → MOD in place.
    pub fn update_channel(&mut self, channel: &ChannelRef) {
        let (fd, state, interest) = {
            let ch = channel.borrow();
            (ch.fd(), ch.state(), ch.interest())
        };
        trace!("update channel fd={} interest={} state={:?}", fd, interest, state);

        match state {
            ChannelState::New | ChannelState::Deleted => {
                let Some(interest) = interest.to_interest() else {
                    // nothing to register yet; the association (if any)
                    // stays as-is
                    return;
                };
                if state == ChannelState::New {
                    self.channels.insert(fd, Rc::downgrade(channel));
                }
                self.ctl_add(fd, interest);
                channel.borrow_mut().set_state(ChannelState::Added);
            }
            ChannelState::Added => match interest.to_interest() {
                Some(interest) => self.ctl_mod(fd, interest),
                None => {
                    self.ctl_del(fd);
                    channel.borrow_mut().set_state(ChannelState::Deleted);
                }
            },
        }
    }

    /// Erases the channel's fd association, unregistering first if it
    /// is currently Added, and resets it to New. Must run before the
    /// owner drops the channel.
    pub fn remove_channel(&mut self, channel: &ChannelRef) {
        let (fd, state) = {
            let ch = channel.borrow();
            (ch.fd(), ch.state())
        };
        trace!("remove channel fd={}", fd);

        self.channels.remove(&fd);
        if state == ChannelState::Added {
            self.ctl_del(fd);
        }
        channel.borrow_mut().set_state(ChannelState::New);
    }

    /// Whether this poller holds an association for the channel's fd.
    pub fn has_channel(&self, channel: &ChannelRef) -> bool {
        let fd = channel.borrow().fd();
        match self.channels.get(&fd) {
            Some(weak) => weak
                .upgrade()
                .is_some_and(|held| Rc::ptr_eq(&held, channel)),
            None => false,
        }
    }

    fn ctl_add(&self, fd: RawFd, interest: Interest) {
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), interest)
        {
            error!("event registration (add) failed for fd {}: {}", fd, e);
            panic!("Poller: cannot add fd {}: {}", fd, e);
        }
    }

    fn ctl_mod(&self, fd: RawFd, interest: Interest) {
        if let Err(e) = self
            .poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
        {
            error!("event registration (mod) failed for fd {}: {}", fd, e);
            panic!("Poller: cannot modify fd {}: {}", fd, e);
        }
    }

    fn ctl_del(&self, fd: RawFd) {
        // tolerated: the fd may already be half closed
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            warn!("event deregistration failed for fd {}: {}", fd, e);
        }
    }
}
