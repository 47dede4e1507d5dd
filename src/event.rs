use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use mio::Interest;

/// Compact interest/readiness mask for one channel.
///
/// The same type serves both directions: the events a channel wants to
/// be told about, and the events the poller last observed on it. An
/// empty set is a valid interest (the channel is parked) but never a
/// valid OS registration, which [`EventSet::to_interest`] encodes by
/// returning `None`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSet(u8);

impl EventSet {
    pub const NONE: EventSet = EventSet(0);
    pub const READABLE: EventSet = EventSet(0b0001);
    pub const WRITABLE: EventSet = EventSet(0b0010);
    /// Peer closed its end (hang-up).
    pub const CLOSED: EventSet = EventSet(0b0100);
    pub const ERROR: EventSet = EventSet(0b1000);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EventSet) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EventSet) {
        self.0 &= !other.0;
    }

    /// Translates this interest set into what the OS registration
    /// layer understands. Empty interest has no OS-level counterpart.
    pub fn to_interest(self) -> Option<Interest> {
        match (
            self.contains(EventSet::READABLE),
            self.contains(EventSet::WRITABLE),
        ) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Readiness observed by the poller for one OS event record.
    pub(crate) fn from_mio(event: &mio::event::Event) -> EventSet {
        let mut set = EventSet::NONE;
        if event.is_readable() {
            set.insert(EventSet::READABLE);
        }
        if event.is_writable() {
            set.insert(EventSet::WRITABLE);
        }
        if event.is_read_closed() {
            set.insert(EventSet::CLOSED);
        }
        if event.is_error() {
            set.insert(EventSet::ERROR);
        }
        set
    }
}

impl BitOr for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventSet {
    fn bitor_assign(&mut self, rhs: EventSet) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        for (flag, tag) in [
            (EventSet::READABLE, "R"),
            (EventSet::WRITABLE, "W"),
            (EventSet::CLOSED, "C"),
            (EventSet::ERROR, "E"),
        ] {
            if self.contains(flag) {
                write!(f, "{}", tag)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_interest_has_no_os_counterpart() {
        assert_eq!(EventSet::NONE.to_interest(), None);

        let mut set = EventSet::READABLE;
        set.remove(EventSet::READABLE);
        assert_eq!(set.to_interest(), None);
    }

    #[test]
    fn interest_translation() {
        assert_eq!(EventSet::READABLE.to_interest(), Some(Interest::READABLE));
        assert_eq!(EventSet::WRITABLE.to_interest(), Some(Interest::WRITABLE));
        assert_eq!(
            (EventSet::READABLE | EventSet::WRITABLE).to_interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        // closed/error are readiness-only flags, not registrable interests
        assert_eq!(EventSet::CLOSED.to_interest(), None);
    }

    #[test]
    fn set_operations() {
        let mut set = EventSet::NONE;
        set.insert(EventSet::READABLE);
        set |= EventSet::WRITABLE;
        assert!(set.contains(EventSet::READABLE));
        assert!(set.contains(EventSet::READABLE | EventSet::WRITABLE));
        assert!(!set.contains(EventSet::CLOSED));

        set.remove(EventSet::READABLE);
        assert!(!set.contains(EventSet::READABLE));
        assert!(set.contains(EventSet::WRITABLE));
    }

    #[test]
    fn display_tags() {
        assert_eq!(format!("{}", EventSet::NONE), "-");
        assert_eq!(format!("{}", EventSet::READABLE | EventSet::CLOSED), "RC");
    }
}
