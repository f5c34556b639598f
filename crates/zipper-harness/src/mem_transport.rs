//! In-memory transport with QUIC-like connection/stream semantics.
//!
//! A [`MemTransport`] is the listening side; [`MemConnector`] handles dial
//! into it. Each connection is a pair of handles joined by channels; each
//! stream is a [`tokio::io::duplex`] pipe. An application close travels
//! through a shared slot and surfaces to the peer's blocked readers as an
//! [`AppClose`]-carrying `io::Error`, matching what a QUIC stack reports.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, DuplexStream, ReadBuf, ReadHalf, WriteHalf},
    sync::{mpsc, Notify},
};
use zipper_core::transport::{
    app_close_error, AppClose, BindTransport, StreamId, Transport, TransportConnection,
};

const STREAM_BUFFER: usize = 64 * 1024;

type StreamPipe = (StreamId, DuplexStream);
type CloseSlot = Arc<Mutex<Option<AppClose>>>;

fn registry() -> &'static Mutex<HashMap<SocketAddr, MemConnector>> {
    static REGISTRY: OnceLock<Mutex<HashMap<SocketAddr, MemConnector>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_client_addr() -> SocketAddr {
    static NEXT_PORT: AtomicU32 = AtomicU32::new(40_000);
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed) as u16;
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Listening side of the in-memory transport.
pub struct MemTransport {
    local: SocketAddr,
    incoming: tokio::sync::Mutex<mpsc::Receiver<MemConnection>>,
    handle: MemConnector,
    accepted: Mutex<Vec<MemConnection>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Create a transport listening on `local`.
    pub fn new(local: SocketAddr) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            local,
            incoming: tokio::sync::Mutex::new(rx),
            handle: MemConnector { local, tx },
            accepted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Dial handle clients connect through.
    pub fn connector(&self) -> MemConnector {
        self.handle.clone()
    }

    /// Dial a transport previously bound with [`BindTransport::bind`].
    pub async fn dial(addr: &str) -> io::Result<MemConnection> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{addr}: {e}")))?;
        let connector = registry()
            .lock()
            .expect("mem registry poisoned")
            .get(&addr)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, format!("nothing bound on {addr}"))
            })?;
        connector.connect().await
    }
}

#[async_trait]
impl Transport for MemTransport {
    type Connection = MemConnection;

    async fn accept(&self) -> io::Result<MemConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
        }
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(conn) => {
                self.accepted.lock().expect("accepted list poisoned").push(conn.clone());
                Ok(conn)
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed")),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        registry().lock().expect("mem registry poisoned").remove(&self.local);
        let accepted: Vec<MemConnection> =
            self.accepted.lock().expect("accepted list poisoned").drain(..).collect();
        for conn in accepted {
            conn.close(0, "server shutdown");
        }
    }
}

#[async_trait]
impl BindTransport for MemTransport {
    async fn bind(addr: &str) -> io::Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{addr}: {e}")))?;
        let transport = Self::new(addr);
        let mut registry = registry().lock().expect("mem registry poisoned");
        if registry.contains_key(&addr) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, addr.to_string()));
        }
        registry.insert(addr, transport.connector());
        Ok(transport)
    }
}

/// Dial handle for a [`MemTransport`].
#[derive(Clone)]
pub struct MemConnector {
    local: SocketAddr,
    tx: mpsc::Sender<MemConnection>,
}

impl MemConnector {
    /// Connect without an ALPN protocol.
    pub async fn connect(&self) -> io::Result<MemConnection> {
        self.connect_with_alpn(None).await
    }

    /// Connect, presenting `alpn` as the negotiated protocol.
    pub async fn connect_with_alpn(&self, alpn: Option<&str>) -> io::Result<MemConnection> {
        let client_addr = next_client_addr();
        let (client, server) = MemConnection::pair(client_addr, self.local, alpn);
        self.tx.send(server).await.map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "listener is gone")
        })?;
        Ok(client)
    }
}

/// One side of an in-memory connection. Clones share the connection.
#[derive(Clone)]
pub struct MemConnection {
    local: SocketAddr,
    remote: SocketAddr,
    alpn: Option<String>,
    incoming: Arc<tokio::sync::Mutex<mpsc::Receiver<StreamPipe>>>,
    peer_tx: mpsc::Sender<StreamPipe>,
    next_stream: Arc<AtomicU64>,
    /// Close we sent; the peer's readers observe it.
    sent_close: CloseSlot,
    /// Close the peer sent; our readers observe it.
    recv_close: CloseSlot,
    /// Woken when the peer closes, to unblock our accept.
    accept_notify: Arc<Notify>,
    /// The peer's accept notify, woken by our close.
    peer_notify: Arc<Notify>,
}

impl MemConnection {
    fn pair(
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        alpn: Option<&str>,
    ) -> (MemConnection, MemConnection) {
        let (client_tx, server_rx) = mpsc::channel::<StreamPipe>(16);
        let (server_tx, client_rx) = mpsc::channel::<StreamPipe>(16);
        let client_close: CloseSlot = Arc::default();
        let server_close: CloseSlot = Arc::default();
        let client_notify = Arc::new(Notify::new());
        let server_notify = Arc::new(Notify::new());

        let client = MemConnection {
            local: client_addr,
            remote: server_addr,
            alpn: alpn.map(str::to_string),
            incoming: Arc::new(tokio::sync::Mutex::new(client_rx)),
            peer_tx: client_tx,
            // Client-initiated bidirectional streams: 0, 4, 8, ...
            next_stream: Arc::new(AtomicU64::new(0)),
            sent_close: Arc::clone(&client_close),
            recv_close: Arc::clone(&server_close),
            accept_notify: Arc::clone(&client_notify),
            peer_notify: Arc::clone(&server_notify),
        };
        let server = MemConnection {
            local: server_addr,
            remote: client_addr,
            alpn: alpn.map(str::to_string),
            incoming: Arc::new(tokio::sync::Mutex::new(server_rx)),
            peer_tx: server_tx,
            // Server-initiated bidirectional streams: 1, 5, 9, ...
            next_stream: Arc::new(AtomicU64::new(1)),
            sent_close: server_close,
            recv_close: client_close,
            accept_notify: server_notify,
            peer_notify: client_notify,
        };
        (client, server)
    }

    /// This side's address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn peer_close(&self) -> Option<AppClose> {
        self.recv_close.lock().expect("close slot poisoned").clone()
    }
}

#[async_trait]
impl TransportConnection for MemConnection {
    type SendStream = WriteHalf<DuplexStream>;
    type RecvStream = MemRecvStream;

    async fn accept_bi(
        &self,
    ) -> io::Result<Option<(StreamId, Self::SendStream, Self::RecvStream)>> {
        let mut incoming = self.incoming.lock().await;

        let notified = self.accept_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(close) = self.peer_close() {
            return Err(app_close_error(close.code, close.reason));
        }

        tokio::select! {
            next = incoming.recv() => match next {
                Some((id, pipe)) => {
                    let (read, write) = tokio::io::split(pipe);
                    Ok(Some((id, write, MemRecvStream::new(read, Arc::clone(&self.recv_close)))))
                }
                // Every peer handle dropped; an explicit close wins over
                // the graceful variant.
                None => match self.peer_close() {
                    Some(close) => Err(app_close_error(close.code, close.reason)),
                    None => Ok(None),
                },
            },
            _ = &mut notified => match self.peer_close() {
                Some(close) => Err(app_close_error(close.code, close.reason)),
                None => Ok(None),
            },
        }
    }

    async fn open_bi(&self) -> io::Result<(StreamId, Self::SendStream, Self::RecvStream)> {
        if let Some(close) = self.peer_close() {
            return Err(app_close_error(close.code, close.reason));
        }
        if self.sent_close.lock().expect("close slot poisoned").is_some() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed locally"));
        }

        let id = self.next_stream.fetch_add(4, Ordering::Relaxed);
        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        self.peer_tx.send((id, remote)).await.map_err(|_| {
            io::Error::new(io::ErrorKind::NotConnected, "peer connection is gone")
        })?;

        let (read, write) = tokio::io::split(local);
        Ok((id, write, MemRecvStream::new(read, Arc::clone(&self.recv_close))))
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn alpn_protocol(&self) -> Option<String> {
        self.alpn.clone()
    }

    fn close(&self, code: u64, reason: &str) {
        let mut slot = self.sent_close.lock().expect("close slot poisoned");
        if slot.is_none() {
            *slot = Some(AppClose { code, reason: reason.to_string() });
        }
        drop(slot);
        self.peer_notify.notify_waiters();
    }
}

/// Receiving half of an in-memory stream.
///
/// EOF with a pending application close from the peer surfaces as the
/// close, the way a QUIC stream reports a connection-level error to its
/// readers.
#[derive(Debug)]
pub struct MemRecvStream {
    inner: ReadHalf<DuplexStream>,
    close: CloseSlot,
}

impl MemRecvStream {
    fn new(inner: ReadHalf<DuplexStream>, close: CloseSlot) -> Self {
        Self { inner, close }
    }
}

impl AsyncRead for MemRecvStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => {
                let close = this.close.lock().expect("close slot poisoned").clone();
                match close {
                    Some(close) => {
                        Poll::Ready(Err(app_close_error(close.code, close.reason)))
                    }
                    None => Poll::Ready(Ok(())),
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use zipper_core::transport::app_close;

    use super::*;

    fn pair() -> (MemConnection, MemConnection) {
        MemConnection::pair(
            "127.0.0.1:1111".parse().unwrap(),
            "127.0.0.1:9000".parse().unwrap(),
            Some("zipper"),
        )
    }

    #[tokio::test]
    async fn streams_carry_bytes_both_ways() {
        let (client, server) = pair();

        let (id, mut c_send, mut c_recv) = client.open_bi().await.unwrap();
        let (sid, mut s_send, mut s_recv) = server.accept_bi().await.unwrap().unwrap();
        assert_eq!(id, sid);

        c_send.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        s_recv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        s_send.write_all(b"pong").await.unwrap();
        c_recv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn stream_ids_do_not_collide_across_sides() {
        let (client, server) = pair();
        let (c0, ..) = client.open_bi().await.unwrap();
        let (c1, ..) = client.open_bi().await.unwrap();
        let (s0, ..) = server.open_bi().await.unwrap();
        assert_eq!((c0, c1, s0), (0, 4, 1));
    }

    #[tokio::test]
    async fn close_surfaces_to_peer_readers_as_app_close() {
        let (client, server) = pair();
        let (_, c_send, _c_recv) = client.open_bi().await.unwrap();
        let (_, _s_send, mut s_recv) = server.accept_bi().await.unwrap().unwrap();

        client.close(0xC7, "bye");
        drop(c_send);

        let mut buf = [0u8; 1];
        let err = s_recv.read(&mut buf).await.unwrap_err();
        let close = app_close(&err).expect("should carry the app close");
        assert_eq!(close.code, 0xC7);
        assert_eq!(close.reason, "bye");
    }

    #[tokio::test]
    async fn close_unblocks_pending_accept() {
        let (client, server) = pair();
        let accepting = tokio::spawn(async move { server.accept_bi().await });
        tokio::task::yield_now().await;

        client.close(0xC7, "bye");
        let err = accepting.await.unwrap().unwrap_err();
        assert!(app_close(&err).is_some());
    }

    #[tokio::test]
    async fn dropping_every_peer_handle_is_a_graceful_close() {
        let (client, server) = pair();
        drop(client);
        assert!(server.accept_bi().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bind_and_dial_through_the_registry() {
        let transport = MemTransport::bind("127.0.0.1:19001").await.unwrap();
        let client = MemTransport::dial("127.0.0.1:19001").await.unwrap();
        let server_side = transport.accept().await.unwrap();
        assert_eq!(server_side.remote_addr(), client.local_addr());

        transport.close();
        assert!(MemTransport::dial("127.0.0.1:19001").await.is_err());
    }
}
