use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Instant;

use log::trace;

use crate::event::EventSet;

/// Shared handle to a channel. The owner (acceptor, connection object,
/// the loop itself) keeps the strong reference; the poller only ever
/// holds a `Weak` into the same allocation.
pub type ChannelRef = Rc<RefCell<Channel>>;

/// Registration state of a channel as seen by the poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Never registered with the OS facility.
    New,
    /// Currently registered.
    Added,
    /// Was registered, removed because its interest set emptied; the
    /// poller keeps the fd association for a cheap re-add.
    Deleted,
}

/// One file descriptor's interest set, last-observed readiness, and
/// handler slots.
///
/// A `Channel` never owns its descriptor; whoever created the fd owns
/// both it and the channel, and must call
/// [`Poller::remove_channel`](crate::poller::Poller::remove_channel)
/// before dropping either. Interest mutators only change the mask.
/// The owner re-syncs the OS registration with
/// [`Poller::update_channel`](crate::poller::Poller::update_channel).
///
/// ## Example
///
/// ```rust,no_run
/// use weir_io::{Channel, Poller};
///
/// let mut poller = Poller::new()?;
/// let channel = Channel::new(0).into_ref();
/// channel.borrow_mut().enable_reading();
/// poller.update_channel(&channel);
/// # Ok::<(), weir_io::Error>(())
/// ```
pub struct Channel {
    fd: RawFd,
    interest: EventSet,
    ready: EventSet,
    state: ChannelState,
    read_cb: Option<Box<dyn FnMut(Instant)>>,
    write_cb: Option<Box<dyn FnMut()>>,
    close_cb: Option<Box<dyn FnMut()>>,
    error_cb: Option<Box<dyn FnMut()>>,
}

impl Channel {
    pub fn new(fd: RawFd) -> Channel {
        Channel {
            fd,
            interest: EventSet::NONE,
            ready: EventSet::NONE,
            state: ChannelState::New,
            read_cb: None,
            write_cb: None,
            close_cb: None,
            error_cb: None,
        }
    }

    pub fn into_ref(self) -> ChannelRef {
        Rc::new(RefCell::new(self))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> EventSet {
        self.interest
    }

    /// Readiness recorded by the last poll that reported this channel.
    pub fn ready(&self) -> EventSet {
        self.ready
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub(crate) fn set_ready(&mut self, ready: EventSet) {
        self.ready = ready;
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    pub fn enable_reading(&mut self) {
        self.interest.insert(EventSet::READABLE);
    }

    pub fn disable_reading(&mut self) {
        self.interest.remove(EventSet::READABLE);
    }

    pub fn enable_writing(&mut self) {
        self.interest.insert(EventSet::WRITABLE);
    }

    pub fn disable_writing(&mut self) {
        self.interest.remove(EventSet::WRITABLE);
    }

    pub fn disable_all(&mut self) {
        self.interest = EventSet::NONE;
    }

    pub fn set_read_callback(&mut self, cb: impl FnMut(Instant) + 'static) {
        self.read_cb = Some(Box::new(cb));
    }

    pub fn set_write_callback(&mut self, cb: impl FnMut() + 'static) {
        self.write_cb = Some(Box::new(cb));
    }

    pub fn set_close_callback(&mut self, cb: impl FnMut() + 'static) {
        self.close_cb = Some(Box::new(cb));
    }

    pub fn set_error_callback(&mut self, cb: impl FnMut() + 'static) {
        self.error_cb = Some(Box::new(cb));
    }

    /// Dispatches the channel's last-observed readiness to its handler
    /// slots. Called by the owning loop after a poll returns.
    ///
    /// A hang-up with no pending input runs the close slot and skips
    /// the read slot. When readable data accompanies the hang-up, the
    /// read slot runs instead so the remaining bytes are drained
    /// first; close handling then follows once the read path observes
    /// EOF. Error and write readiness dispatch on their own flags in
    /// either case. Each slot is lifted out of the channel for the
    /// duration of its call, so handlers may re-borrow the channel
    /// (to drop its interest set, say) without conflict.
    pub fn handle_event(channel: &ChannelRef, at: Instant) {
        let ready = channel.borrow().ready;
        trace!("channel fd={} dispatch ready={}", channel.borrow().fd, ready);

        if ready.contains(EventSet::CLOSED) && !ready.contains(EventSet::READABLE) {
            Self::invoke(channel, |ch: &mut Channel| &mut ch.close_cb);
        }
        if ready.contains(EventSet::ERROR) {
            Self::invoke(channel, |ch: &mut Channel| &mut ch.error_cb);
        }
        if ready.contains(EventSet::READABLE) {
            let cb = channel.borrow_mut().read_cb.take();
            if let Some(mut cb) = cb {
                cb(at);
                let mut ch = channel.borrow_mut();
                if ch.read_cb.is_none() {
                    ch.read_cb = Some(cb);
                }
            }
        }
        if ready.contains(EventSet::WRITABLE) {
            Self::invoke(channel, |ch: &mut Channel| &mut ch.write_cb);
        }
    }

    fn invoke(
        channel: &ChannelRef,
        slot: impl Fn(&mut Channel) -> &mut Option<Box<dyn FnMut()>>,
    ) {
        let cb = slot(&mut *channel.borrow_mut()).take();
        if let Some(mut cb) = cb {
            cb();
            // restore unless the handler installed a replacement
            let mut ch = channel.borrow_mut();
            let s = slot(&mut *ch);
            if s.is_none() {
                *s = Some(cb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn ready_channel(ready: EventSet) -> ChannelRef {
        let ch = Channel::new(42).into_ref();
        ch.borrow_mut().set_ready(ready);
        ch
    }

    #[test]
    fn dispatches_read_and_write() {
        let ch = ready_channel(EventSet::READABLE | EventSet::WRITABLE);
        let reads = Rc::new(Cell::new(0));
        let writes = Rc::new(Cell::new(0));
        {
            let reads = reads.clone();
            let writes = writes.clone();
            let mut guard = ch.borrow_mut();
            guard.set_read_callback(move |_| reads.set(reads.get() + 1));
            guard.set_write_callback(move || writes.set(writes.get() + 1));
        }

        Channel::handle_event(&ch, Instant::now());
        assert_eq!(reads.get(), 1);
        assert_eq!(writes.get(), 1);

        // slots survive a dispatch
        Channel::handle_event(&ch, Instant::now());
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn hangup_without_input_runs_close_only() {
        let ch = ready_channel(EventSet::CLOSED);
        let reads = Rc::new(Cell::new(0));
        let closes = Rc::new(Cell::new(0));
        {
            let reads = reads.clone();
            let closes = closes.clone();
            let mut guard = ch.borrow_mut();
            guard.set_read_callback(move |_| reads.set(reads.get() + 1));
            guard.set_close_callback(move || closes.set(closes.get() + 1));
        }

        Channel::handle_event(&ch, Instant::now());
        assert_eq!(closes.get(), 1);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn hangup_with_error_runs_close_and_error() {
        let ch = ready_channel(EventSet::CLOSED | EventSet::ERROR);
        let closes = Rc::new(Cell::new(0));
        let errors = Rc::new(Cell::new(0));
        let reads = Rc::new(Cell::new(0));
        {
            let closes = closes.clone();
            let errors = errors.clone();
            let reads = reads.clone();
            let mut guard = ch.borrow_mut();
            guard.set_close_callback(move || closes.set(closes.get() + 1));
            guard.set_error_callback(move || errors.set(errors.get() + 1));
            guard.set_read_callback(move |_| reads.set(reads.get() + 1));
        }

        Channel::handle_event(&ch, Instant::now());
        assert_eq!(closes.get(), 1);
        assert_eq!(errors.get(), 1);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn hangup_with_pending_input_drains_reads() {
        let ch = ready_channel(EventSet::CLOSED | EventSet::READABLE);
        let reads = Rc::new(Cell::new(0));
        let closes = Rc::new(Cell::new(0));
        {
            let reads = reads.clone();
            let closes = closes.clone();
            let mut guard = ch.borrow_mut();
            guard.set_read_callback(move |_| reads.set(reads.get() + 1));
            guard.set_close_callback(move || closes.set(closes.get() + 1));
        }

        Channel::handle_event(&ch, Instant::now());
        assert_eq!(reads.get(), 1);
        assert_eq!(closes.get(), 0);
    }

    #[test]
    fn handler_may_reborrow_the_channel() {
        let ch = ready_channel(EventSet::READABLE);
        {
            let ch2 = Rc::downgrade(&ch);
            ch.borrow_mut().set_read_callback(move |_| {
                // interest dropping to empty mid-dispatch must be tolerated
                if let Some(ch) = ch2.upgrade() {
                    ch.borrow_mut().disable_all();
                }
            });
        }

        Channel::handle_event(&ch, Instant::now());
        assert!(ch.borrow().interest().is_empty());
    }

    #[test]
    fn error_and_read_both_dispatch() {
        let ch = ready_channel(EventSet::ERROR | EventSet::READABLE);
        let errors = Rc::new(Cell::new(0));
        let reads = Rc::new(Cell::new(0));
        {
            let errors = errors.clone();
            let reads = reads.clone();
            let mut guard = ch.borrow_mut();
            guard.set_error_callback(move || errors.set(errors.get() + 1));
            guard.set_read_callback(move |_| reads.set(reads.get() + 1));
        }

        Channel::handle_event(&ch, Instant::now());
        assert_eq!(errors.get(), 1);
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn missing_slots_are_ignored() {
        let ch = ready_channel(EventSet::READABLE | EventSet::WRITABLE | EventSet::ERROR);
        Channel::handle_event(&ch, Instant::now());
    }
}
