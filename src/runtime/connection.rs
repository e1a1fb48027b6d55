//! Connections and the registry that owns them.
//!
//! Each connection tracks its session state, its outbound queue and the
//! transport handle. The registry stores connections densely so removal is
//! a swap with the last entry, and keeps a slab from connection id (the
//! readiness token) to dense index so lookup stays O(1) as entries move.

use crate::error::{QueueFull, RegistryError, SendError};
use crate::runtime::transfer::{Flushed, PendingWrites};
use crate::session::{DisplayName, Session};
use bytes::Bytes;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Stable identifier of a connection for as long as it is registered.
/// Doubles as its readiness token.
pub type ConnectionId = usize;

/// Result of one bounded read from a connection.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were read into the front of the scratch buffer.
    Line(usize),
    /// Nothing more to read until the next readiness event.
    Drained,
    /// Peer closed the stream.
    Eof,
    /// Read failed; treated as a disconnect.
    Failed(io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    stream: S,
    peer: Option<SocketAddr>,
    session: Session,
    pending: PendingWrites,
    /// Whether write interest is currently registered with the poller.
    write_interest: bool,
}

impl<S> Connection<S> {
    fn new(id: ConnectionId, stream: S, peer: Option<SocketAddr>, max_pending: usize) -> Self {
        Self {
            id,
            stream,
            peer,
            session: Session::new(),
            pending: PendingWrites::with_limit(max_pending),
            write_interest: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn name(&self) -> Option<&DisplayName> {
        self.session.name()
    }

    pub fn is_named(&self) -> bool {
        self.session.is_named()
    }

    /// Queue a payload behind any output still pending.
    ///
    /// Refused when it would take pending output past the connection's bound.
    pub fn queue(&mut self, payload: Bytes) -> Result<(), QueueFull> {
        self.pending.push(payload)
    }

    /// True while output is waiting for write readiness.
    pub fn wants_write(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.pending_bytes()
    }

    /// True when the registered interest no longer matches pending output.
    pub(crate) fn interest_stale(&self) -> bool {
        self.wants_write() != self.write_interest
    }

    pub(crate) fn set_write_interest(&mut self, on: bool) {
        self.write_interest = on;
    }
}

impl<S: Read> Connection<S> {
    /// Read at most `scratch.len()` bytes.
    ///
    /// Anything beyond the bound stays in the transport and comes back as
    /// the next line.
    pub fn read_line(&mut self, scratch: &mut [u8]) -> ReadOutcome {
        loop {
            match self.stream.read(scratch) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => return ReadOutcome::Line(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }
}

impl<S: Write> Connection<S> {
    /// Push pending output to the transport until it drains or would block.
    pub fn flush(&mut self) -> Result<Flushed, SendError> {
        self.pending.flush(&mut self.stream)
    }
}

/// What a registry scan should do with the entry it just visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Keep,
    Evict,
}

/// Registry of active connections.
///
/// Capacity starts at a small constant and doubles whenever an insert would
/// exceed it. It never shrinks.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    entries: Vec<Connection<S>>,
    slots: Slab<usize>,
    capacity: usize,
    /// Pending output bound handed to every new connection.
    max_pending: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a registry with room for `initial` connections.
    pub fn with_capacity(initial: usize) -> Self {
        let capacity = initial.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            slots: Slab::with_capacity(capacity),
            capacity,
            max_pending: usize::MAX,
        }
    }

    /// Bound the unwritten output of connections registered from now on.
    pub fn with_max_pending(mut self, bytes: usize) -> Self {
        self.max_pending = bytes;
        self
    }

    /// Add a new connection in the `Unregistered` state.
    ///
    /// Fails only if the backing storage could not be doubled.
    pub fn register(
        &mut self,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> Result<ConnectionId, RegistryError> {
        if self.entries.len() == self.capacity {
            self.grow()?;
        }

        let index = self.entries.len();
        let id = self.slots.insert(index);
        self.entries
            .push(Connection::new(id, stream, peer, self.max_pending));
        Ok(id)
    }

    fn grow(&mut self) -> Result<(), RegistryError> {
        let capacity = self.capacity;
        let target = capacity.saturating_mul(2);
        self.entries
            .try_reserve_exact(target - self.entries.len())
            .map_err(|source| RegistryError::Grow { capacity, source })?;
        self.slots.reserve(target - self.slots.len());
        self.capacity = target;
        Ok(())
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.slots.get(id).map(|&index| &self.entries[index])
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        let index = *self.slots.get(id)?;
        Some(&mut self.entries[index])
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.slots.contains(id)
    }

    /// Remove a connection by swapping the last entry into its place.
    ///
    /// Order is not preserved. Dropping the returned connection closes its
    /// handle.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        let index = self.slots.try_remove(id)?;
        let conn = self.entries.swap_remove(index);
        if let Some(moved) = self.entries.get(index) {
            self.slots[moved.id] = index;
        }
        Some(conn)
    }

    /// Visit every entry once in storage order, evicting where `visit` says so.
    ///
    /// An eviction swaps the last entry into the current slot, so the index
    /// is not advanced: the swapped-in entry is visited next, exactly once.
    pub fn scan<F>(&mut self, mut visit: F) -> Vec<Connection<S>>
    where
        F: FnMut(&mut Connection<S>) -> Scan,
    {
        let mut evicted = Vec::new();
        let mut index = 0;

        while index < self.entries.len() {
            match visit(&mut self.entries[index]) {
                Scan::Keep => index += 1,
                Scan::Evict => {
                    let id = self.entries[index].id;
                    if let Some(conn) = self.unregister(id) {
                        evicted.push(conn);
                    }
                }
            }
        }

        evicted
    }

    /// Remove every connection, e.g. at shutdown.
    pub fn drain(&mut self) -> Vec<Connection<S>> {
        self.slots.clear();
        self.entries.drain(..).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current backing capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over all connections in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.entries.iter()
    }

    /// Iterate over named connections, the broadcast recipient set.
    ///
    /// The registry is borrowed for the whole iteration, so the set cannot
    /// change while a broadcast walks it.
    pub fn named(&self) -> impl Iterator<Item = &Connection<S>> {
        self.entries.iter().filter(|conn| conn.is_named())
    }

    pub fn named_mut(&mut self) -> impl Iterator<Item = &mut Connection<S>> {
        self.entries.iter_mut().filter(|conn| conn.is_named())
    }
}
