//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking accept/read/write syscalls. Uses epoll on Linux,
//! kqueue on macOS. Everything runs on one thread; the only place it
//! blocks is the readiness wait.
//!
//! ## Output
//!
//! Replies and broadcasts are queued per connection and flushed right away.
//! If the socket cannot take everything, write interest is added for that
//! connection and the rest goes out on the next writable event. Write
//! interest is dropped again once the queue drains. Each queue is bounded;
//! a payload that does not fit is a failed delivery, handled by the
//! configured [`FailurePolicy`] like a transport error.

use crate::config::Config;
use crate::error::ServerError;
use crate::runtime::broadcast::{self, FailurePolicy};
use crate::runtime::connection::{Connection, ConnectionId, ConnectionRegistry, ReadOutcome};
use crate::runtime::token::{interest_for, token_for, Ready, LISTENER};
use crate::session::{self, Action, PROMPT};
use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Runtime knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub events_capacity: usize,
    pub initial_capacity: usize,
    pub read_buffer_size: usize,
    pub name_max_len: usize,
    pub announce_departures: bool,
    pub failure_policy: FailurePolicy,
    /// Unwritten output allowed per connection.
    pub max_pending_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            events_capacity: config.events_capacity.max(1),
            initial_capacity: config.initial_capacity,
            read_buffer_size: config.read_buffer_size.max(1),
            name_max_len: config.name_max_len,
            announce_departures: config.announce_departures,
            failure_policy: FailurePolicy::from_evict_flag(config.evict_on_send_failure),
            max_pending_bytes: config.max_pending_bytes.max(1),
        }
    }
}

/// Why a connection is leaving the registry.
#[derive(Debug)]
enum Departure {
    Eof,
    ReadFailed(io::Error),
    DeliveryFailed,
    InterestFailed(io::Error),
    Shutdown,
}

/// The chat server: listener, poller and connection registry in one owner.
pub struct Server {
    poll: Poll,
    events: Events,
    ready: Vec<Ready>,
    listener: TcpListener,
    registry: ConnectionRegistry<TcpStream>,
    scratch: Vec<u8>,
    settings: Settings,
}

impl Server {
    /// Take ownership of an already bound, listening socket.
    pub fn new(listener: std::net::TcpListener, settings: Settings) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(settings.events_capacity),
            ready: Vec::with_capacity(settings.events_capacity),
            listener,
            registry: ConnectionRegistry::with_capacity(settings.initial_capacity)
                .with_max_pending(settings.max_pending_bytes),
            scratch: vec![0u8; settings.read_buffer_size],
            settings,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &ConnectionRegistry<TcpStream> {
        &self.registry
    }

    /// Serve forever. Returns only on a fatal error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.turn(None)?;
        }
    }

    /// One readiness wait plus its dispatch pass.
    ///
    /// `None` waits indefinitely. Returns the number of ready handles handled.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        // Classify first so dispatch can borrow the server mutably
        let mut ready = std::mem::take(&mut self.ready);
        ready.extend(self.events.iter().map(Ready::from_event));
        let count = ready.len();

        let result = ready.drain(..).try_for_each(|event| match event {
            Ready::Listener => self.accept_connections(),
            Ready::Connection {
                id,
                readable,
                writable,
            } => {
                self.handle_connection_event(id, readable, writable);
                Ok(())
            }
        });

        self.ready = ready;
        result.map(|()| count)
    }

    /// Close every connection. The listener stays open until the server is dropped.
    pub fn shutdown(&mut self) {
        let connections = self.registry.drain();
        info!(connections = connections.len(), "Shutting down");
        for conn in connections {
            self.retire(conn, Departure::Shutdown);
        }
    }

    fn accept_connections(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer)?,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // The next readiness wait retries
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
        Ok(())
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        let id = self.registry.register(stream, Some(peer))?;
        info!(conn_id = id, peer = %peer, clients = self.registry.len(), "New client");

        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(());
        };
        let watched =
            self.poll
                .registry()
                .register(conn.stream_mut(), token_for(id), Interest::READABLE);
        if let Err(e) = watched {
            warn!(conn_id = id, peer = %peer, error = %e, "Failed to watch connection");
            self.registry.unregister(id);
            return Ok(());
        }

        self.reply(id, Bytes::from_static(PROMPT));
        Ok(())
    }

    fn handle_connection_event(&mut self, id: ConnectionId, readable: bool, writable: bool) {
        if !self.registry.contains(id) {
            return;
        }

        if writable {
            self.handle_writable(id);
        }

        // Re-check, the write path may have evicted it
        if readable && self.registry.contains(id) {
            self.handle_readable(id);
        }
    }

    fn handle_writable(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        match conn.flush() {
            Ok(flushed) => {
                trace!(conn_id = id, bytes = flushed.written, drained = flushed.drained, "Flushed");
                self.sync_interest(id);
            }
            Err(e) => {
                warn!(conn_id = id, sent = e.sent, error = %e.source, "Delivery failed");
                match self.settings.failure_policy {
                    FailurePolicy::Log => self.sync_interest(id),
                    FailurePolicy::Evict => self.disconnect(id, Departure::DeliveryFailed),
                }
            }
        }
    }

    /// Edge-triggered: keep reading until the socket would block. Each
    /// bounded read is one logical line.
    fn handle_readable(&mut self, id: ConnectionId) {
        loop {
            let Some(conn) = self.registry.get_mut(id) else {
                return;
            };

            let n = match conn.read_line(&mut self.scratch) {
                ReadOutcome::Line(n) => n,
                ReadOutcome::Drained => return,
                ReadOutcome::Eof => {
                    self.disconnect(id, Departure::Eof);
                    return;
                }
                ReadOutcome::Failed(e) => {
                    self.disconnect(id, Departure::ReadFailed(e));
                    return;
                }
            };
            trace!(conn_id = id, bytes = n, "Read");

            let action =
                conn.session_mut()
                    .on_line(&self.scratch[..n], self.settings.name_max_len, session::now());

            match action {
                Action::Reply(reply) => {
                    if let Some(name) = conn.name() {
                        info!(conn_id = id, name = %name, "Client joined");
                    }
                    self.reply(id, reply);
                }
                Action::Broadcast(line) => self.dispatch(line, Some(id)),
                Action::Ignore => {}
            }
        }
    }

    /// Send `payload` to one connection, applying the failure policy when
    /// it cannot be queued or the transport fails.
    fn reply(&mut self, id: ConnectionId, payload: Bytes) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        let failed = match conn.queue(payload) {
            Err(e) => {
                warn!(conn_id = id, pending = e.pending, limit = e.limit, "Reply dropped, outbound queue full");
                true
            }
            Ok(()) => match conn.flush() {
                Ok(_) => false,
                Err(e) => {
                    warn!(conn_id = id, sent = e.sent, error = %e.source, "Reply delivery failed");
                    true
                }
            },
        };

        if failed && self.settings.failure_policy == FailurePolicy::Evict {
            self.disconnect(id, Departure::DeliveryFailed);
        } else {
            self.sync_interest(id);
        }
    }

    /// Broadcast `line`, then any departure notices the broadcast itself causes.
    fn dispatch(&mut self, line: Bytes, origin: Option<ConnectionId>) {
        let mut outbox = VecDeque::from([(line, origin)]);

        while let Some((line, origin)) = outbox.pop_front() {
            let (delivery, evicted) = broadcast::broadcast(
                &mut self.registry,
                &line,
                origin,
                self.settings.failure_policy,
            );
            debug!(
                origin = ?origin,
                recipients = delivery.recipients,
                deferred = delivery.deferred,
                failed = delivery.failed,
                "Broadcast"
            );

            for conn in evicted {
                if let Some(notice) = self.retire(conn, Departure::DeliveryFailed) {
                    outbox.push_back((notice, None));
                }
            }
        }

        self.sync_all_interest();
    }

    fn disconnect(&mut self, id: ConnectionId, why: Departure) {
        if let Some(conn) = self.registry.unregister(id) {
            if let Some(notice) = self.retire(conn, why) {
                self.dispatch(notice, None);
            }
        }
    }

    /// Deregister, log and close a connection already removed from the
    /// registry. Returns a departure notice when departures are announced.
    fn retire(&mut self, mut conn: Connection<TcpStream>, why: Departure) -> Option<Bytes> {
        let id = conn.id();
        let _ = self.poll.registry().deregister(conn.stream_mut());
        let name = conn.session_mut().close();

        match (&name, &why) {
            (Some(name), Departure::Eof | Departure::ReadFailed(_)) => {
                info!(conn_id = id, name = %name, "Client left");
            }
            (Some(name), _) => info!(conn_id = id, name = %name, reason = ?why, "Client removed"),
            (None, _) => debug!(conn_id = id, reason = ?why, "Connection closed before naming"),
        }
        match &why {
            Departure::ReadFailed(e) => debug!(conn_id = id, error = %e, "Read failed"),
            Departure::InterestFailed(e) => {
                warn!(conn_id = id, error = %e, "Failed to update readiness interest")
            }
            _ => {}
        }
        // Dropping the connection closes the socket
        drop(conn);

        match (name, &why) {
            (_, Departure::Shutdown) => None,
            (Some(name), _) if self.settings.announce_departures => {
                Some(session::departure_line(session::now(), &name))
            }
            _ => None,
        }
    }

    /// Bring one connection's registered interest in line with its queue.
    fn sync_interest(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        if !conn.interest_stale() {
            return;
        }

        let wants_write = conn.wants_write();
        let result =
            self.poll
                .registry()
                .reregister(conn.stream_mut(), token_for(id), interest_for(wants_write));
        match result {
            Ok(()) => conn.set_write_interest(wants_write),
            Err(e) => self.disconnect(id, Departure::InterestFailed(e)),
        }
    }

    fn sync_all_interest(&mut self) {
        let stale: Vec<ConnectionId> = self
            .registry
            .iter()
            .filter(|conn| conn.interest_stale())
            .map(|conn| conn.id())
            .collect();
        for id in stale {
            self.sync_interest(id);
        }
    }
}

/// Bind the configured address and serve forever.
pub fn run(config: &Config) -> Result<(), ServerError> {
    let listener = crate::listener::bind(config.listen.as_str(), config.backlog)?;
    let mut server = Server::new(listener, Settings::from(config))?;

    info!(
        addr = %server.local_addr()?,
        read_buffer = config.read_buffer_size,
        initial_capacity = config.initial_capacity,
        "Chat server running"
    );

    server.run()
}
