//! Reliable transfer over byte streams that may accept short writes.
//!
//! Two flavours share the same accounting:
//!
//! - [`send_all`]: blocking retry loop. Either every byte goes out or the
//!   error reports exactly how many did.
//! - [`send_ready`]: non-blocking variant. Stops at `WouldBlock` and
//!   returns progress so the caller can resume once the handle is writable.
//!
//! [`PendingWrites`] builds on `send_ready` to give each connection a queue
//! of outbound payloads with a stored resume offset.

use crate::error::{QueueFull, SendError};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, Write};

/// Write all of `buf`, retrying short writes.
///
/// Returns the number of bytes written (always `buf.len()`) on success.
/// `Interrupted` is retried. A zero-length write is treated as
/// `WriteZero` so a dead transport cannot spin the loop.
pub fn send_all<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<usize, SendError> {
    let mut sent = 0;
    let mut remaining = buf.len();

    while remaining > 0 {
        match w.write(&buf[sent..]) {
            Ok(0) => {
                return Err(SendError {
                    sent,
                    source: io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
                });
            }
            Ok(n) => {
                sent += n;
                remaining -= n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(SendError { sent, source }),
        }
    }

    Ok(sent)
}

/// Write as much of `buf` as the transport takes without blocking.
///
/// `Ok(n)` with `n < buf.len()` means the transport reported `WouldBlock`
/// after `n` bytes.
pub fn send_ready<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<usize, SendError> {
    match send_all(w, buf) {
        Ok(sent) => Ok(sent),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(e.sent),
        Err(e) => Err(e),
    }
}

/// Outcome of a [`PendingWrites::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flushed {
    /// Bytes handed to the transport during this flush.
    pub written: usize,
    /// True when the queue is now empty.
    pub drained: bool,
}

/// Per-connection outbound queue.
///
/// Payloads are `Bytes` so one broadcast line is shared by every recipient
/// queue without copying. `offset` is how far into the front payload the
/// transport has already taken. Pending output never exceeds `limit`.
#[derive(Debug)]
pub struct PendingWrites {
    queue: VecDeque<Bytes>,
    offset: usize,
    queued: usize,
    limit: usize,
}

impl Default for PendingWrites {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue holding at most `limit` unwritten bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            offset: 0,
            queued: 0,
            limit,
        }
    }

    /// Append a payload behind anything already pending.
    ///
    /// A payload that would take pending output past the limit is refused
    /// whole, so the peer never sees a truncated line.
    pub fn push(&mut self, payload: Bytes) -> Result<(), QueueFull> {
        if payload.is_empty() {
            return Ok(());
        }
        let pending = self.pending_bytes();
        if pending.saturating_add(payload.len()) > self.limit {
            return Err(QueueFull {
                pending,
                refused: payload.len(),
                limit: self.limit,
            });
        }
        self.queued += payload.len();
        self.queue.push_back(payload);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bytes still waiting to be written.
    pub fn pending_bytes(&self) -> usize {
        self.queued - self.offset
    }

    /// Drop everything that has not been written yet.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.offset = 0;
        self.queued = 0;
    }

    /// Write pending payloads until the queue drains or the transport
    /// would block, resuming from the stored offset.
    ///
    /// On a transport error the unsent remainder is discarded, since it can
    /// no longer be delivered in order, and the error carries the bytes
    /// written during this flush.
    pub fn flush<W: Write + ?Sized>(&mut self, w: &mut W) -> Result<Flushed, SendError> {
        let mut written = 0;

        while let Some(front) = self.queue.front() {
            let rest = &front[self.offset..];
            match send_ready(w, rest) {
                Ok(n) if n == rest.len() => {
                    written += n;
                    self.queued -= front.len();
                    self.offset = 0;
                    self.queue.pop_front();
                }
                Ok(n) => {
                    written += n;
                    self.offset += n;
                    return Ok(Flushed {
                        written,
                        drained: false,
                    });
                }
                Err(e) => {
                    self.clear();
                    return Err(SendError {
                        sent: written + e.sent,
                        source: e.source,
                    });
                }
            }
        }

        Ok(Flushed {
            written,
            drained: true,
        })
    }
}
