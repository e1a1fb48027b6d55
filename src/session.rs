//! Per-connection session state machine and wire formatting.
//!
//! ```text
//! Unregistered --line--> Named --line--> Named (broadcast)
//!      |                   |
//!      +--EOF/error--------+------------> Closed
//! ```
//!
//! The first line a connection sends becomes its display name and is
//! answered with a private welcome. Every later line is stamped with the
//! local wall-clock time and handed back to the caller for broadcast.

use bytes::Bytes;
use chrono::{Local, NaiveTime};
use std::fmt;

/// Sent to every connection as soon as it is accepted. No trailing newline.
pub const PROMPT: &[u8] = b"Enter username: ";

/// Display name bound in the default configuration.
pub const DEFAULT_NAME_MAX_LEN: usize = 31;

/// A display name, bounded at construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName(String);

impl DisplayName {
    /// Build a name from a raw input line.
    ///
    /// The trailing delimiter is stripped, invalid UTF-8 is replaced, and the
    /// result is cut to at most `max_chars` characters. Cutting is done on
    /// character boundaries so the stored name is always valid and exactly
    /// bounded, including when the line is already at the bound.
    pub fn from_line(line: &[u8], max_chars: usize) -> Self {
        let text = String::from_utf8_lossy(trim_line(line));
        let name = match text.char_indices().nth(max_chars) {
            Some((cut, _)) => text[..cut].to_string(),
            None => text.into_owned(),
        };
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session state of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    /// Accepted, waiting for the name line.
    #[default]
    Unregistered,
    /// Named and eligible for broadcast.
    Named(DisplayName),
    /// Read hit EOF or an error. The connection is about to be evicted.
    Closed,
}

/// What the event loop must do with the outcome of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to the originating connection only.
    Reply(Bytes),
    /// Fan out to every named connection, the origin included.
    Broadcast(Bytes),
    /// Nothing to send.
    Ignore,
}

impl Session {
    pub fn new() -> Self {
        Self::Unregistered
    }

    pub fn name(&self) -> Option<&DisplayName> {
        match self {
            Session::Named(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Session::Named(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Session::Closed)
    }

    /// Interpret one logical input line.
    ///
    /// `now` is only used for chat lines; callers pass the local time of the
    /// read that produced `line`.
    pub fn on_line(&mut self, line: &[u8], name_max_len: usize, now: NaiveTime) -> Action {
        match self {
            Session::Unregistered => {
                let name = DisplayName::from_line(line, name_max_len);
                let reply = welcome(&name);
                *self = Session::Named(name);
                Action::Reply(reply)
            }
            Session::Named(name) => {
                let message = String::from_utf8_lossy(trim_line(line));
                Action::Broadcast(chat_line(now, name, &message))
            }
            Session::Closed => Action::Ignore,
        }
    }

    /// Move to `Closed`, handing back the name if the session had one.
    pub fn close(&mut self) -> Option<DisplayName> {
        match std::mem::replace(self, Session::Closed) {
            Session::Named(name) => Some(name),
            _ => None,
        }
    }
}

/// Local wall-clock time used to stamp chat lines.
pub fn now() -> NaiveTime {
    Local::now().time()
}

/// `"Welcome {name}!\n"`
pub fn welcome(name: &DisplayName) -> Bytes {
    Bytes::from(format!("Welcome {name}!\n"))
}

/// `"[HH:MM:SS] {name}: {message}\n"`
pub fn chat_line(time: NaiveTime, name: &DisplayName, message: &str) -> Bytes {
    Bytes::from(format!("[{}] {name}: {message}\n", time.format("%H:%M:%S")))
}

/// `"[HH:MM:SS] * {name} left\n"`, sent only when departures are announced.
pub fn departure_line(time: NaiveTime, name: &DisplayName) -> Bytes {
    Bytes::from(format!("[{}] * {name} left\n", time.format("%H:%M:%S")))
}

/// Strip one trailing line delimiter (`\n` or `\r\n`).
fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_first_line_names_session() {
        let mut session = Session::new();
        assert!(!session.is_named());

        let action = session.on_line(b"alice\n", DEFAULT_NAME_MAX_LEN, at(12, 0, 0));
        assert_eq!(action, Action::Reply(Bytes::from_static(b"Welcome alice!\n")));
        assert_eq!(session.name().unwrap().as_str(), "alice");
    }

    #[test]
    fn test_later_lines_broadcast() {
        let mut session = Session::new();
        session.on_line(b"alice\r\n", DEFAULT_NAME_MAX_LEN, at(0, 0, 0));

        let action = session.on_line(b"hi\n", DEFAULT_NAME_MAX_LEN, at(9, 5, 7));
        assert_eq!(
            action,
            Action::Broadcast(Bytes::from_static(b"[09:05:07] alice: hi\n"))
        );
        // The name never changes after registration
        session.on_line(b"bob\n", DEFAULT_NAME_MAX_LEN, at(9, 5, 8));
        assert_eq!(session.name().unwrap().as_str(), "alice");
    }

    #[test]
    fn test_close() {
        let mut session = Session::new();
        assert_eq!(session.close(), None);
        assert!(session.is_closed());

        let mut session = Session::new();
        session.on_line(b"bob\n", DEFAULT_NAME_MAX_LEN, at(0, 0, 0));
        assert_eq!(session.close().unwrap().as_str(), "bob");
        assert_eq!(
            session.on_line(b"late\n", DEFAULT_NAME_MAX_LEN, at(0, 0, 0)),
            Action::Ignore
        );
    }

    #[test]
    fn test_name_exactly_at_bound() {
        let line = format!("{}\n", "n".repeat(DEFAULT_NAME_MAX_LEN));
        let name = DisplayName::from_line(line.as_bytes(), DEFAULT_NAME_MAX_LEN);
        assert_eq!(name.char_len(), DEFAULT_NAME_MAX_LEN);
        assert_eq!(name.as_str(), "n".repeat(DEFAULT_NAME_MAX_LEN));
    }

    #[test]
    fn test_name_over_bound_truncated() {
        let line = "x".repeat(DEFAULT_NAME_MAX_LEN + 20);
        let name = DisplayName::from_line(line.as_bytes(), DEFAULT_NAME_MAX_LEN);
        assert_eq!(name.char_len(), DEFAULT_NAME_MAX_LEN);
    }

    #[test]
    fn test_name_truncates_on_char_boundary() {
        // Four bytes per character
        let name = DisplayName::from_line("🦀🦀🦀\n".as_bytes(), 2);
        assert_eq!(name.as_str(), "🦀🦀");
    }

    #[test]
    fn test_name_from_invalid_utf8() {
        let name = DisplayName::from_line(b"ab\xffcd\n", DEFAULT_NAME_MAX_LEN);
        assert_eq!(name.as_str(), "ab\u{fffd}cd");
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"hi\n"), b"hi");
        assert_eq!(trim_line(b"hi\r\n"), b"hi");
        assert_eq!(trim_line(b"hi"), b"hi");
        assert_eq!(trim_line(b"\n"), b"");
    }

    #[test]
    fn test_departure_line() {
        let name = DisplayName::from_line(b"carol", DEFAULT_NAME_MAX_LEN);
        assert_eq!(
            departure_line(at(23, 59, 1), &name),
            Bytes::from_static(b"[23:59:01] * carol left\n")
        );
    }
}
