//! Logical connections: what the broker knows about an authenticated
//! client.
//!
//! A logical connection is created exactly once, on a successful
//! handshake, and owns the sending half of the stream the handshake
//! arrived on. All outbound frames for a client go through its
//! connection's writer, which serializes them; nothing else may write to
//! the raw stream.

use std::{
    fmt,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use zipper_proto::{Frame, Tag};

use crate::metadata::Metadata;

/// Identifier of a logical connection, derived from the transport remote
/// address. Unique while the connection is live.
pub type ConnId = String;

const CLIENT_TYPE_SOURCE: u8 = 0x5F;
const CLIENT_TYPE_UPSTREAM_ZIPPER: u8 = 0x5E;
const CLIENT_TYPE_STREAM_FUNCTION: u8 = 0x5D;

/// The kind of client behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    /// Produces data frames.
    Source,
    /// Observes data tags and consumes matching frames.
    StreamFunction,
    /// A peer broker forwarding traffic downstream.
    UpstreamZipper,
}

impl ClientType {
    /// Interpret the handshake's client type byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CLIENT_TYPE_SOURCE => Some(Self::Source),
            CLIENT_TYPE_STREAM_FUNCTION => Some(Self::StreamFunction),
            CLIENT_TYPE_UPSTREAM_ZIPPER => Some(Self::UpstreamZipper),
            _ => None,
        }
    }

    /// The wire byte for this client type.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Source => CLIENT_TYPE_SOURCE,
            Self::StreamFunction => CLIENT_TYPE_STREAM_FUNCTION,
            Self::UpstreamZipper => CLIENT_TYPE_UPSTREAM_ZIPPER,
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Source => "Source",
            Self::StreamFunction => "StreamFunction",
            Self::UpstreamZipper => "UpstreamZipper",
        };
        f.write_str(name)
    }
}

/// Anything frames can be written to: logical connections and downstream
/// zipper clients.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Write one frame. Implementations serialize concurrent writers.
    async fn write_frame(&self, frame: &Frame) -> io::Result<()>;
}

/// An authenticated client connection.
pub struct Connection {
    name: String,
    client_id: String,
    client_type: ClientType,
    metadata: Option<Arc<dyn Metadata>>,
    observed: Vec<Tag>,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    closed: AtomicBool,
}

impl Connection {
    /// Create a logical connection owning `sink` as its write side.
    pub fn new(
        name: String,
        client_id: String,
        client_type: ClientType,
        metadata: Option<Arc<dyn Metadata>>,
        observed: Vec<Tag>,
        sink: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            name,
            client_id,
            client_type,
            metadata,
            observed,
            writer: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Client name from the handshake.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client id from the handshake.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// What kind of client this is.
    #[must_use]
    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    /// Routing metadata built at handshake. `None` for upstream zippers.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<dyn Metadata>> {
        self.metadata.as_ref()
    }

    /// Data tags this client declared at handshake.
    #[must_use]
    pub fn observed_tags(&self) -> &[Tag] {
        &self.observed
    }

    /// Whether the client declared `tag` among its observed tags.
    #[must_use]
    pub fn observes(&self, tag: Tag) -> bool {
        self.observed.contains(&tag)
    }

    /// Whether [`Connection::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the write side down. Idempotent; later writes fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.writer.lock().await;
        let _ = sink.shutdown().await;
    }
}

#[async_trait]
impl FrameWriter for Connection {
    async fn write_frame(&self, frame: &Frame) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection is closed"));
        }
        let wire = frame.encode();
        let mut sink = self.writer.lock().await;
        sink.write_all(&wire).await?;
        sink.flush().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_type", &self.client_type)
            .field("observed", &self.observed)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
