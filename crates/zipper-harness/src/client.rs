//! Minimal test clients speaking the zipper wire protocol.

use std::io;

use tokio::io::{DuplexStream, WriteHalf};
use zipper_core::{
    frame_stream::{self, ReadFrameError},
    transport::TransportConnection,
    ClientType, ErrorCode,
};
use zipper_proto::{Frame, HandshakeFrame, Tag};

use crate::mem_transport::{MemConnection, MemConnector, MemRecvStream};

/// Handshake frame for a source client.
pub fn source_handshake(name: &str, client_id: &str, tags: Vec<Tag>) -> HandshakeFrame {
    HandshakeFrame::new(name, client_id, ClientType::Source.to_u8(), tags, "", "")
}

/// Handshake frame for a stream function client.
pub fn sfn_handshake(name: &str, tags: Vec<Tag>) -> HandshakeFrame {
    HandshakeFrame::new(name, "", ClientType::StreamFunction.to_u8(), tags, "", "")
}

/// Handshake frame for an upstream zipper client.
pub fn upstream_handshake(name: &str) -> HandshakeFrame {
    HandshakeFrame::new(name, "", ClientType::UpstreamZipper.to_u8(), vec![], "", "")
}

/// One connected client: a connection plus the stream its handshake ran
/// on.
pub struct TestClient {
    conn: MemConnection,
    send: WriteHalf<DuplexStream>,
    recv: MemRecvStream,
}

impl TestClient {
    /// Connect, send `handshake` and return the client together with the
    /// server's first reply (ack, rejected or goaway).
    ///
    /// # Errors
    ///
    /// Propagates connect/stream failures; a reply that cannot be read
    /// surfaces as `io::Error`.
    pub async fn connect(
        connector: &MemConnector,
        handshake: HandshakeFrame,
    ) -> io::Result<(Self, Frame)> {
        let conn = connector.connect().await?;
        let (_id, mut send, mut recv) = conn.open_bi().await?;
        frame_stream::write_frame(&mut send, &Frame::Handshake(handshake)).await?;
        let reply = frame_stream::read_frame(&mut recv).await.map_err(io::Error::other)?;
        Ok((Self { conn, send, recv }, reply))
    }

    /// The id the server knows this client's connection by.
    pub fn conn_id(&self) -> String {
        self.conn.local_addr().to_string()
    }

    /// Write one frame on the handshake stream.
    ///
    /// # Errors
    ///
    /// Propagates stream write failures.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        frame_stream::write_frame(&mut self.send, frame).await
    }

    /// Read the next frame from the server.
    ///
    /// # Errors
    ///
    /// See [`ReadFrameError`].
    pub async fn read_frame(&mut self) -> Result<Frame, ReadFrameError> {
        frame_stream::read_frame(&mut self.recv).await
    }

    /// Close like a well-behaved client: an application close with code
    /// `ClientAbort`, then drop the streams.
    pub fn abort(self) {
        self.conn.close(ErrorCode::ClientAbort.to_u64(), "client abort");
    }
}
