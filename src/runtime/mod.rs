//! Readiness-driven runtime.
//!
//! Single-threaded mio event loop (epoll on Linux, kqueue on macOS) over a
//! registry of connections. Pieces, leaves first:
//! - `transfer`: reliable transfer over short-writing transports
//! - `connection`: per-connection state and the connection registry
//! - `token`: readiness tokens and event classification
//! - `broadcast`: fan-out of chat lines to named connections
//! - `event_loop`: the poller, accept handling and read/write dispatch

pub mod broadcast;
pub mod connection;
mod event_loop;
pub mod token;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock;

pub use broadcast::{broadcast, Delivery, FailurePolicy};
pub use connection::{Connection, ConnectionId, ConnectionRegistry, ReadOutcome, Scan};
pub use event_loop::{run, Server, Settings};
pub use transfer::{send_all, send_ready, Flushed, PendingWrites};
