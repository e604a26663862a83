//! Interest flags for descriptor readiness.

use polling::Event;

/// Readiness events a wait subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    /// Interest in readable events.
    pub const READABLE: Interest = Interest(0b01);
    /// Interest in writable events.
    pub const WRITABLE: Interest = Interest(0b10);

    /// Returns interest in readable events.
    #[must_use]
    pub const fn readable() -> Self {
        Self::READABLE
    }

    /// Returns interest in writable events.
    #[must_use]
    pub const fn writable() -> Self {
        Self::WRITABLE
    }

    /// Returns interest in both readable and writable events.
    #[must_use]
    pub const fn both() -> Self {
        Interest(0b11)
    }

    /// Returns true if readable interest is set.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if writable interest is set.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Combines interests.
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Returns true if any event is shared with `other`.
    #[must_use]
    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    /// Converts to a polling event armed under `key`.
    pub(crate) fn to_event(self, key: usize) -> Event {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => Event::all(key),
            (true, false) => Event::readable(key),
            (false, true) => Event::writable(key),
            (false, false) => Event::none(key),
        }
    }

    /// Readiness reported by a delivered polling event.
    pub(crate) fn from_event(event: &Event) -> Self {
        let mut ready = Interest(0);
        if event.readable {
            ready = ready.add(Self::READABLE);
        }
        if event.writable {
            ready = ready.add(Self::WRITABLE);
        }
        ready
    }
}
