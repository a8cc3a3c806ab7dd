//! Listening socket
//!
//! Binds a TCP listener with `SO_REUSEADDR`, a small backlog, and
//! non-blocking accepts.

use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};

use filter_core::error::ListenerError;

/// Pending-connection backlog passed to listen()
pub const LISTEN_BACKLOG: i32 = 2;

/// Create a bound, listening, non-blocking TCP listener.
pub fn create_listener(address: SocketAddr) -> Result<TcpListener, ListenerError> {
    tracing::debug!("Binding to {}", address);

    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(ListenerError::Configure)?;

    socket
        .set_reuse_address(true)
        .map_err(ListenerError::Configure)?;

    socket
        .bind(&address.into())
        .map_err(|source| ListenerError::Bind {
            address: address.to_string(),
            source,
        })?;

    socket
        .listen(LISTEN_BACKLOG)
        .map_err(ListenerError::Listen)?;

    socket
        .set_nonblocking(true)
        .map_err(ListenerError::Configure)?;

    Ok(socket.into())
}
