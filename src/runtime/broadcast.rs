//! Broadcast dispatcher.
//!
//! A chat line goes to every named connection, the sender included. Each
//! recipient gets the shared payload queued and an immediate non-blocking
//! flush; whatever the transport does not take right away waits for write
//! readiness.

use crate::runtime::connection::{Connection, ConnectionId, ConnectionRegistry, Scan};
use bytes::Bytes;
use std::io::Write;
use tracing::warn;

/// What to do with a recipient whose delivery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and keep the recipient registered.
    #[default]
    Log,
    /// Log and evict the recipient.
    Evict,
}

impl FailurePolicy {
    pub fn from_evict_flag(evict: bool) -> Self {
        if evict {
            FailurePolicy::Evict
        } else {
            FailurePolicy::Log
        }
    }

    /// What a registry scan does with a recipient whose delivery failed.
    pub fn on_failure(self) -> Scan {
        match self {
            FailurePolicy::Log => Scan::Keep,
            FailurePolicy::Evict => Scan::Evict,
        }
    }
}

/// Summary of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Named connections the line was addressed to.
    pub recipients: usize,
    /// Recipients whose transport took the whole line immediately.
    pub completed: usize,
    /// Recipients with output left waiting for write readiness.
    pub deferred: usize,
    /// Recipients whose transport failed.
    pub failed: usize,
}

/// Deliver `line` to every named connection.
///
/// A failure on one recipient never stops delivery to the rest. A recipient
/// whose pending output is already at its bound does not get the line; that
/// counts as a failed delivery. Connections
/// evicted under [`FailurePolicy::Evict`] are handed back so the caller can
/// deregister and log them; they are already out of the registry.
pub fn broadcast<S: Write>(
    registry: &mut ConnectionRegistry<S>,
    line: &Bytes,
    origin: Option<ConnectionId>,
    policy: FailurePolicy,
) -> (Delivery, Vec<Connection<S>>) {
    let mut delivery = Delivery::default();

    let evicted = registry.scan(|conn| {
        if !conn.is_named() {
            return Scan::Keep;
        }
        delivery.recipients += 1;
        if let Err(e) = conn.queue(line.clone()) {
            delivery.failed += 1;
            warn!(
                conn_id = conn.id(),
                origin = ?origin,
                pending = e.pending,
                limit = e.limit,
                "Broadcast dropped, outbound queue full"
            );
            return policy.on_failure();
        }

        match conn.flush() {
            Ok(flushed) if flushed.drained => {
                delivery.completed += 1;
                Scan::Keep
            }
            Ok(_) => {
                delivery.deferred += 1;
                Scan::Keep
            }
            Err(e) => {
                delivery.failed += 1;
                warn!(
                    conn_id = conn.id(),
                    origin = ?origin,
                    sent = e.sent,
                    error = %e.source,
                    "Broadcast delivery failed"
                );
                policy.on_failure()
            }
        }
    });

    (delivery, evicted)
}
