//! Transport abstraction for network I/O.
//!
//! The broker assumes a connection-oriented, multiplexed, TLS-authenticated
//! datagram transport (the QUIC model):
//!
//! - **Connection**: long-lived, carries an ALPN protocol and a remote
//!   address, closes with an application error code
//! - **Streams**: bidirectional, ordered, reliable, cheap to create,
//!   multiplexed over the connection
//!
//! Production deployments back these traits with a QUIC stack; tests use
//! the in-memory transport from `zipper-harness`. Protocol correctness is
//! what gets tested here, not the transport's own reliability machinery.

use std::{fmt, io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Identifier of a stream within one transport connection.
pub type StreamId = u64;

/// Application-level close information carried across the transport.
///
/// Transports surface a peer's `close(code, reason)` to blocked readers as
/// an [`io::Error`] wrapping this type; [`app_close`] recovers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppClose {
    /// Application error code (see `ErrorCode`).
    pub code: u64,
    /// Human-readable close reason.
    pub reason: String,
}

impl fmt::Display for AppClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application close {:#x}: {}", self.code, self.reason)
    }
}

impl std::error::Error for AppClose {}

/// Wrap an application close into an [`io::Error`] for transports to
/// return from read/accept paths.
pub fn app_close_error(code: u64, reason: impl Into<String>) -> io::Error {
    io::Error::other(AppClose { code, reason: reason.into() })
}

/// Recover the application close carried by an [`io::Error`], if any.
#[must_use]
pub fn app_close(err: &io::Error) -> Option<&AppClose> {
    err.get_ref()?.downcast_ref()
}

/// Listening side of a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection handle produced by [`Transport::accept`].
    type Connection: TransportConnection;

    /// Accept an incoming connection; blocks until one is established.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener is closed or the transport-level
    /// handshake fails.
    async fn accept(&self) -> io::Result<Self::Connection>;

    /// Address the transport is listening on.
    fn local_addr(&self) -> SocketAddr;

    /// Stop listening and terminate every connection accepted from this
    /// transport. In-flight streams observe their connection closing.
    fn close(&self);
}

/// A transport that can bind itself to an address string.
///
/// This is the `listen_and_serve` entry point: the implementation resolves
/// the address and binds the underlying packet socket.
#[async_trait]
pub trait BindTransport: Transport + Sized {
    /// Bind a listener on `addr` (e.g. `"0.0.0.0:9000"`).
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be resolved or bound.
    async fn bind(addr: &str) -> io::Result<Self>;
}

/// A connection to a remote peer, supporting multiplexed bidirectional
/// streams.
///
/// Handles are cheap clones of the same underlying connection, so the
/// broker can hold one in every stream task.
#[async_trait]
pub trait TransportConnection: Clone + Send + Sync + 'static {
    /// Sending half of a bidirectional stream.
    type SendStream: AsyncWrite + Send + Unpin + 'static;

    /// Receiving half of a bidirectional stream.
    type RecvStream: AsyncRead + Send + Unpin + 'static;

    /// Accept the next stream the peer opens.
    ///
    /// Returns `Ok(None)` when the connection closed gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; an application close from
    /// the peer arrives as an [`AppClose`]-carrying error.
    async fn accept_bi(&self)
        -> io::Result<Option<(StreamId, Self::SendStream, Self::RecvStream)>>;

    /// Open a new bidirectional stream towards the peer.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is closed.
    async fn open_bi(&self) -> io::Result<(StreamId, Self::SendStream, Self::RecvStream)>;

    /// Address of the remote endpoint. Connection ids derive from this.
    fn remote_addr(&self) -> SocketAddr;

    /// ALPN protocol negotiated during the TLS handshake, if any.
    fn alpn_protocol(&self) -> Option<String>;

    /// Close the connection immediately with an application error code.
    /// Non-blocking; terminates all streams on the connection.
    fn close(&self, code: u64, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_close_round_trips_through_io_error() {
        let err = app_close_error(0xC7, "client abort");
        let close = app_close(&err).expect("should carry an AppClose");
        assert_eq!(close.code, 0xC7);
        assert_eq!(close.reason, "client abort");
    }

    #[test]
    fn plain_io_errors_carry_nothing() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(app_close(&err).is_none());
    }
}
