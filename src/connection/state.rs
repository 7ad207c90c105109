use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    NotStarted = 0,
    Connected = 1,
    /// The last write left bytes in the writer
    Draining = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::NotStarted,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    /// Connected or draining.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Draining)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotStarted => "not started",
            ConnectionState::Connected => "connected",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free holder of a [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::NotStarted as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Fails if the state was anything else.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flips between connected and draining. Never leaves `Closed`.
    pub fn set_draining(&self, draining: bool) {
        let (from, to) = if draining {
            (ConnectionState::Connected, ConnectionState::Draining)
        } else {
            (ConnectionState::Draining, ConnectionState::Connected)
        };
        self.transition(from, to);
    }

    /// Closes. Only the call that actually closed it gets the previous state.
    pub fn close(&self) -> Option<ConnectionState> {
        match ConnectionState::from_u8(self.0.swap(ConnectionState::Closed as u8, Ordering::AcqRel)) {
            ConnectionState::Closed => None,
            previous => Some(previous),
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let state = StateCell::new();
        assert_eq!(state.get(), ConnectionState::NotStarted);

        assert!(state.transition(ConnectionState::NotStarted, ConnectionState::Connected));
        assert!(state.get().is_open());

        state.set_draining(true);
        assert_eq!(state.get(), ConnectionState::Draining);
        state.set_draining(false);
        assert_eq!(state.get(), ConnectionState::Connected);

        assert_eq!(state.close(), Some(ConnectionState::Connected));
        assert_eq!(state.close(), None);
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let state = StateCell::new();
        state.close();

        assert!(!state.transition(ConnectionState::NotStarted, ConnectionState::Connected));
        state.set_draining(true);
        state.set_draining(false);
        assert_eq!(state.get(), ConnectionState::Closed);
    }
}
