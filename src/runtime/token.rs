//! Readiness tokens.
//!
//! The listener and every connection are registered with the poller under a
//! token. A readiness event is turned into a [`Ready`] value so dispatch is a
//! `match`, not a comparison against the listener handle.

use crate::runtime::connection::ConnectionId;
use mio::event::Event;
use mio::{Interest, Token};

/// Token reserved for the listening socket. Connection ids come from a slab
/// and start at zero, so they never reach it.
pub const LISTENER: Token = Token(usize::MAX);

/// A classified readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// The listener has connections waiting to be accepted.
    Listener,
    /// A connection can be read from and/or written to.
    Connection {
        id: ConnectionId,
        readable: bool,
        writable: bool,
    },
}

impl Ready {
    pub fn from_event(event: &Event) -> Self {
        // Hang-ups and socket errors are surfaced through the next read
        let readable = event.is_readable() || event.is_read_closed() || event.is_error();
        Self::classify(event.token(), readable, event.is_writable())
    }

    pub fn classify(token: Token, readable: bool, writable: bool) -> Self {
        match token {
            LISTENER => Ready::Listener,
            Token(id) => Ready::Connection {
                id,
                readable,
                writable,
            },
        }
    }
}

/// Token a connection is registered under.
pub fn token_for(id: ConnectionId) -> Token {
    Token(id)
}

/// Read interest always; write interest only while output is pending.
pub fn interest_for(wants_write: bool) -> Interest {
    if wants_write {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_listener() {
        assert_eq!(Ready::classify(LISTENER, true, false), Ready::Listener);
    }

    #[test]
    fn test_classify_connection() {
        assert_eq!(
            Ready::classify(token_for(3), true, true),
            Ready::Connection {
                id: 3,
                readable: true,
                writable: true
            }
        );
        assert_eq!(
            Ready::classify(Token(0), false, true),
            Ready::Connection {
                id: 0,
                readable: false,
                writable: true
            }
        );
    }

    #[test]
    fn test_interest_for() {
        assert_eq!(interest_for(false), Interest::READABLE);
        let both = interest_for(true);
        assert!(both.is_readable());
        assert!(both.is_writable());
    }
}
