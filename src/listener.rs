//! Listening socket setup.
//!
//! The event loop only needs an already bound, listening, non-blocking
//! socket. This module produces one with `SO_REUSEADDR` so restarts do not
//! wait out `TIME_WAIT`.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use tracing::debug;

/// Resolve `addr` and bind a listening socket on the first address that works.
pub fn bind<A: ToSocketAddrs>(addr: A, backlog: i32) -> io::Result<TcpListener> {
    let mut last_err = None;

    for addr in addr.to_socket_addrs()? {
        match bind_addr(addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Bind attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

/// Create a TCP listener on a single resolved address.
fn bind_addr(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
