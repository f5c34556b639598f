//! The server underlying a zipper: accept loop, per-stream handshake,
//! frame loop, and graceful shutdown.
//!
//! One task runs per transport connection (accepting streams) and one per
//! accepted stream (handshake, then the frame loop). There is no queue
//! between a stream's reader and the dispatcher: dispatch writes happen on
//! the reader's task, so a slow consumer backpressures the producing
//! stream directly.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zipper_proto::{Frame, GoawayFrame, HandshakeAckFrame, RejectedFrame};

use crate::{
    auth::{self, AuthenticationMap, Authenticator},
    connection::{ClientType, ConnId, Connection, FrameWriter},
    connector::Connector,
    context::{BoxError, Context},
    error::{ErrorCode, ServerError},
    frame_stream::{self, ReadFrameError},
    metadata::MetadataBuilder,
    router::{Router, RouterError},
    transport::{self, BindTransport, StreamId, Transport, TransportConnection},
};

/// Default address a zipper listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";

/// Wall-clock bound on a stream's handshake. A stream that exceeds it is
/// dropped without a reply; the client saw nothing and will reconnect.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hook running before or after the main handler for every frame.
/// An error closes the stream with the matching application error code.
pub type FrameHandler = Arc<dyn Fn(&Context) -> Result<(), BoxError> + Send + Sync>;

/// Hook fired exactly once per transport connection when it goes away.
pub type ConnectionCloseHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Filter over the ALPN protocol negotiated by a new connection.
/// An error closes the connection with code `Rejected`.
pub type AlpnHandler = Arc<dyn Fn(Option<&str>) -> Result<(), BoxError> + Send + Sync>;

/// Server construction options.
#[derive(Default)]
pub struct ServerOptions {
    /// Authenticators the server verifies handshakes against, keyed by
    /// scheme name. Empty means authentication is disabled.
    pub auths: AuthenticationMap,
}

impl ServerOptions {
    /// Options with authentication disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticator under its own name.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auths.insert(auth.name().to_string(), auth);
        self
    }
}

pub(crate) struct ServerState {
    pub(crate) router: Option<Arc<dyn Router>>,
    pub(crate) metadata_builder: Option<Arc<dyn MetadataBuilder>>,
    pub(crate) alpn_handler: Option<AlpnHandler>,
    pub(crate) downstreams: HashMap<String, Arc<dyn FrameWriter>>,
    pub(crate) before_handlers: Vec<FrameHandler>,
    pub(crate) after_handlers: Vec<FrameHandler>,
    pub(crate) connection_close_handlers: Vec<ConnectionCloseHandler>,
}

/// The broker server.
///
/// Configuration setters are safe to call while serving; the per-frame hot
/// path reads a last-writer-wins snapshot of the shared state.
pub struct Server {
    name: String,
    pub(crate) connector: Connector,
    pub(crate) counter_of_data_frame: AtomicU64,
    state: Mutex<ServerState>,
    opts: ServerOptions,
    shutdown: watch::Sender<bool>,
    // Shutdown wait group: close() blocks until this drains to zero.
    tasks: watch::Sender<usize>,
}

impl Server {
    /// Create a server with the given name and options.
    #[must_use]
    pub fn new(name: impl Into<String>, opts: ServerOptions) -> Self {
        Self {
            name: name.into(),
            connector: Connector::new(),
            counter_of_data_frame: AtomicU64::new(0),
            state: Mutex::new(ServerState {
                router: None,
                metadata_builder: None,
                alpn_handler: None,
                downstreams: HashMap::new(),
                before_handlers: Vec::new(),
                after_handlers: Vec::new(),
                connection_close_handlers: Vec::new(),
            }),
            opts,
            shutdown: watch::channel(false).0,
            tasks: watch::channel(0).0,
        }
    }

    /// The server's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry of live logical connections.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Set the router. Required before serving.
    pub fn config_router(&self, router: Arc<dyn Router>) {
        self.state().router = Some(router);
    }

    /// Set the metadata builder. Required before serving.
    pub fn config_metadata_builder(&self, builder: Arc<dyn MetadataBuilder>) {
        self.state().metadata_builder = Some(builder);
    }

    /// Set the ALPN filter applied to every new connection.
    pub fn config_alpn_handler(&self, handler: AlpnHandler) {
        self.state().alpn_handler = Some(handler);
    }

    /// Add a downstream zipper writer. Broadcast data frames from sources
    /// are dispatched to every downstream.
    pub fn add_downstream(&self, addr: impl Into<String>, writer: Arc<dyn FrameWriter>) {
        self.state().downstreams.insert(addr.into(), writer);
    }

    /// The configured downstream writers, keyed by address.
    #[must_use]
    pub fn downstreams(&self) -> HashMap<String, Arc<dyn FrameWriter>> {
        self.state().downstreams.clone()
    }

    /// Append hooks run before the main handler for every frame.
    pub fn set_before_handlers(&self, handlers: impl IntoIterator<Item = FrameHandler>) {
        self.state().before_handlers.extend(handlers);
    }

    /// Append hooks run after the main handler for every frame.
    pub fn set_after_handlers(&self, handlers: impl IntoIterator<Item = FrameHandler>) {
        self.state().after_handlers.extend(handlers);
    }

    /// Append hooks fired once per transport connection on close.
    pub fn set_connection_close_handlers(
        &self,
        handlers: impl IntoIterator<Item = ConnectionCloseHandler>,
    ) {
        self.state().connection_close_handlers.extend(handlers);
    }

    /// How many data frames have passed through the server.
    #[must_use]
    pub fn stats_counter(&self) -> u64 {
        self.counter_of_data_frame.load(Ordering::Relaxed)
    }

    /// Snapshot of connected clients as `conn_id -> name`.
    #[must_use]
    pub fn stats_functions(&self) -> HashMap<ConnId, String> {
        self.connector.snapshot()
    }

    /// Bind `addr` with transport `T` and serve until closed.
    ///
    /// An empty address binds [`DEFAULT_LISTEN_ADDR`].
    ///
    /// # Errors
    ///
    /// Fails early when the bind fails or configuration is incomplete; see
    /// [`Server::serve`].
    pub async fn listen_and_serve<T: BindTransport>(
        self: Arc<Self>,
        addr: &str,
    ) -> Result<(), ServerError> {
        let addr = if addr.is_empty() { DEFAULT_LISTEN_ADDR } else { addr };
        let listener = T::bind(addr).await.map_err(ServerError::Bind)?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener` until closed.
    ///
    /// # Errors
    ///
    /// Fails early when the router or metadata builder is missing, or when
    /// the accept loop dies.
    pub async fn serve<T: Transport>(self: Arc<Self>, listener: T) -> Result<(), ServerError> {
        self.validate_router()?;
        self.validate_metadata_builder()?;

        let mut shutdown = self.shutdown.subscribe();
        info!(
            name = %self.name,
            addr = %listener.local_addr(),
            auth = ?self.auth_names(),
            "listening"
        );

        loop {
            let conn = tokio::select! {
                _ = shutdown.wait_for(|closing| *closing) => {
                    listener.close();
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        if *self.shutdown.borrow() {
                            return Ok(());
                        }
                        error!(error = %e, "accept connections");
                        return Err(ServerError::Accept(e));
                    }
                }
            };

            let alpn = conn.alpn_protocol();
            let alpn_handler = self.state().alpn_handler.clone();
            match alpn_handler {
                Some(handler) => {
                    if let Err(e) = handler(alpn.as_deref()) {
                        conn.close(ErrorCode::Rejected.to_u64(), &e.to_string());
                        continue;
                    }
                }
                None => debug!(alpn = ?alpn, "client alpn protocol"),
            }

            let conn_id: ConnId = conn.remote_addr().to_string();
            info!(conn_id = %conn_id, "new connection");

            self.task_started();
            let server = Arc::clone(&self);
            tokio::spawn(server.handle_transport_connection(conn, conn_id));
        }
    }

    /// Shut the server down: stop accepting, wait for every connection
    /// task to fire its close-hooks and return, then clean the router and
    /// the connector.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let mut tasks = self.tasks.subscribe();
        let _ = tasks.wait_for(|running| *running == 0).await;

        let router = self.state().router.clone();
        if let Some(router) = router {
            router.clean();
        }
        self.connector.clean().await;
    }

    /// Accept streams on one transport connection until it goes away.
    async fn handle_transport_connection<C: TransportConnection>(
        self: Arc<Self>,
        conn: C,
        conn_id: ConnId,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait_for(|closing| *closing) => None,
                accepted = conn.accept_bi() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        info!(conn_id = %conn_id, error = %e, "connection failed");
                        None
                    }
                }
            };
            let Some((stream_id, send, recv)) = accepted else {
                self.teardown(&conn_id).await;
                break;
            };

            debug!(conn_id = %conn_id, stream_id, "stream accepted");
            self.task_started();
            let server = Arc::clone(&self);
            tokio::spawn(server.handle_stream(conn.clone(), conn_id.clone(), stream_id, send, recv));
        }

        self.do_connection_close_handlers(&conn_id);
        self.task_finished();
    }

    /// Handshake one stream, then run its frame loop.
    async fn handle_stream<C: TransportConnection>(
        self: Arc<Self>,
        conn: C,
        conn_id: ConnId,
        stream_id: StreamId,
        send: C::SendStream,
        mut recv: C::RecvStream,
    ) {
        let handshake =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(&conn, &conn_id, send, &mut recv))
                .await;
        match handshake {
            // Timeout drops the stream with nothing written; the send half
            // died with the cancelled handshake future.
            Err(_elapsed) => {
                warn!(conn_id = %conn_id, stream_id, "handshake timed out, dropping stream");
            }
            Ok(None) => {}
            Ok(Some(_logical)) => {
                self.serve_stream(&conn, &conn_id, stream_id, &mut recv).await;
                self.teardown(&conn_id).await;
            }
        }
        self.task_finished();
    }

    /// Accept the first frame of a stream and establish the logical
    /// connection.
    ///
    /// Returns the registered connection on success; `None` means the
    /// stream was rejected or sent away and must not serve.
    async fn handshake<C: TransportConnection>(
        &self,
        conn: &C,
        conn_id: &str,
        send: C::SendStream,
        recv: &mut C::RecvStream,
    ) -> Option<Arc<Connection>> {
        let mut send = send;

        let frame = match frame_stream::read_frame(recv).await {
            Ok(frame) => frame,
            Err(e) => {
                self.write_goaway(&mut send, conn_id, &e.to_string()).await;
                return None;
            }
        };
        let Frame::Handshake(handshake) = frame else {
            error!(
                conn_id = %conn_id,
                frame_type = %frame.frame_type(),
                "first frame is not a handshake"
            );
            self.write_goaway(&mut send, conn_id, "handshake failed").await;
            return None;
        };

        debug!(
            conn_id = %conn_id,
            client_id = %handshake.id,
            client_type = handshake.client_type,
            auth = %auth_name_label(handshake.auth_name()),
            "got handshake"
        );

        let authed = auth::authenticate(&self.opts.auths, Some(&handshake));
        debug!(conn_id = %conn_id, authed, "authenticated");
        if !authed {
            // The connected line is logged independently of the outcome.
            debug!(name = %handshake.name, conn_id = %conn_id, "client connected");
            let reason = format!(
                "handshake authentication fails, client credential name is {}",
                auth_name_label(handshake.auth_name())
            );
            let rejected = Frame::Rejected(RejectedFrame::new(reason.as_str()));
            if let Err(e) = frame_stream::write_frame(&mut send, &rejected).await {
                debug!(name = %handshake.name, conn_id = %conn_id, error = %e, "write rejected frame");
            }
            return None;
        }

        let Some(client_type) = ClientType::from_u8(handshake.client_type) else {
            let reason = format!("illegal client type: {:#04x}", handshake.client_type);
            error!(conn_id = %conn_id, %reason, "unknown client");
            conn.close(ErrorCode::UnknownClient.to_u64(), &reason);
            return None;
        };

        let (router, builder) = {
            let state = self.state();
            (state.router.clone(), state.metadata_builder.clone())
        };

        let metadata = match client_type {
            ClientType::Source | ClientType::StreamFunction => {
                let Some(builder) = builder else {
                    self.write_goaway(&mut send, conn_id, "metadata builder is not configured")
                        .await;
                    return None;
                };
                match builder.build(&handshake) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        self.write_goaway(&mut send, conn_id, &e.to_string()).await;
                        return None;
                    }
                }
            }
            ClientType::UpstreamZipper => None,
        };

        let logical = Arc::new(Connection::new(
            handshake.name.clone(),
            handshake.id.clone(),
            client_type,
            metadata.clone(),
            handshake.observe_data_tags.clone(),
            Box::new(send),
        ));

        // Register before acking so a client that sees the ack is already
        // resolvable by id, and in its route.
        self.connector.add(conn_id.to_string(), Arc::clone(&logical));

        if client_type == ClientType::StreamFunction {
            let route = router.as_ref().and_then(|router| router.route(metadata.as_deref()));
            let Some(route) = route else {
                error!(conn_id = %conn_id, "no route for stream function handshake");
                self.connector.remove(conn_id);
                let goaway =
                    Frame::Goaway(GoawayFrame::new("no route for stream function handshake"));
                if let Err(e) = logical.write_frame(&goaway).await {
                    error!(conn_id = %conn_id, error = %e, "write goaway frame");
                }
                return None;
            };
            if let Err(e @ RouterError::DuplicateName { .. }) =
                route.add(conn_id.to_string(), &handshake.name, &handshake.observe_data_tags)
            {
                let RouterError::DuplicateName { conn_id: prior_id, .. } = &e;
                debug!(
                    name = %handshake.name,
                    prior_conn_id = %prior_id,
                    "duplicate stream function name, evicting prior holder"
                );
                if let Some(prior) = self.connector.get(prior_id) {
                    let goaway = Frame::Goaway(GoawayFrame::new(e.to_string()));
                    if let Err(we) = prior.write_frame(&goaway).await {
                        error!(conn_id = %prior_id, error = %we, "write goaway frame");
                    }
                    prior.close().await;
                    self.connector.remove(prior_id);
                }
            }
        }

        if let Err(e) = logical.write_frame(&Frame::HandshakeAck(HandshakeAckFrame)).await {
            debug!(name = %handshake.name, conn_id = %conn_id, error = %e, "write handshake ack");
        }

        info!(
            client_type = %client_type,
            name = %handshake.name,
            client_id = %handshake.id,
            conn_id = %conn_id,
            "client connected"
        );
        Some(logical)
    }

    /// Frame loop of one serving stream: read, hooks, main handler, hooks.
    async fn serve_stream<C: TransportConnection>(
        &self,
        conn: &C,
        conn_id: &str,
        stream_id: StreamId,
        recv: &mut C::RecvStream,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let frame = tokio::select! {
                _ = shutdown.wait_for(|closing| *closing) => return,
                frame = frame_stream::read_frame(recv) => match frame {
                    Ok(frame) => frame,
                    Err(ReadFrameError::UnknownFrame { tag, len }) => {
                        warn!(conn_id = %conn_id, tag, len, "unknown frame discarded");
                        continue;
                    }
                    Err(e) => {
                        self.close_on_read_error(conn, conn_id, &e);
                        return;
                    }
                }
            };

            let ctx =
                Context { conn_id: conn_id.to_string(), stream_id, frame };

            let (before, after) = {
                let state = self.state();
                (state.before_handlers.clone(), state.after_handlers.clone())
            };

            for handler in &before {
                if let Err(e) = handler(&ctx) {
                    error!(conn_id = %conn_id, error = %e, "before frame handler");
                    conn.close(ErrorCode::BeforeHandler.to_u64(), &e.to_string());
                    return;
                }
            }

            self.main_frame_handler(conn, &ctx).await;

            for handler in &after {
                if let Err(e) = handler(&ctx) {
                    error!(conn_id = %conn_id, error = %e, "after frame handler");
                    conn.close(ErrorCode::AfterHandler.to_u64(), &e.to_string());
                    return;
                }
            }
        }
    }

    /// Dispatch one frame by type.
    async fn main_frame_handler<C: TransportConnection>(&self, conn: &C, ctx: &Context) {
        match &ctx.frame {
            Frame::Handshake(_) => {
                // Protocol violation, non-fatal.
                error!(conn_id = %ctx.conn_id, "handshake frame while serving, ignored");
            }
            Frame::Data(_) => {
                if let Err(e) = self.handle_data_frame(ctx).await {
                    error!(conn_id = %ctx.conn_id, error = %e, "handle data frame");
                    conn.close(ErrorCode::Data.to_u64(), &format!("handle data frame: {e}"));
                } else {
                    self.dispatch_to_downstreams(ctx).await;
                    if let Err(e) = self.handle_backflow(ctx).await {
                        // Backflow failures never tear the producer down.
                        error!(conn_id = %ctx.conn_id, error = %e, "backflow");
                    }
                }
            }
            other => {
                debug!(
                    conn_id = %ctx.conn_id,
                    frame_type = %other.frame_type(),
                    "reserved frame ignored"
                );
            }
        }
    }

    /// Classify a read failure and close accordingly.
    fn close_on_read_error<C: TransportConnection>(
        &self,
        conn: &C,
        conn_id: &str,
        err: &ReadFrameError,
    ) {
        match err {
            ReadFrameError::Eof => {
                info!(conn_id = %conn_id, "the connection is EOF");
            }
            ReadFrameError::Io(io_err) => {
                if let Some(close) = transport::app_close(io_err) {
                    let code = ErrorCode::parse(close.code);
                    if code == ErrorCode::ClientAbort {
                        info!(conn_id = %conn_id, "client close the connection");
                    } else {
                        error!(conn_id = %conn_id, %code, reason = %close.reason, "application error");
                        conn.close(close.code, &close.reason);
                    }
                } else if is_net_closed(io_err) {
                    warn!(conn_id = %conn_id, error = %io_err, "transport closed");
                    conn.close(ErrorCode::Closed.to_u64(), "transport closed");
                } else {
                    warn!(conn_id = %conn_id, error = %io_err, "closing connection");
                    conn.close(ErrorCode::Unknown.to_u64(), &io_err.to_string());
                }
            }
            ReadFrameError::Protocol(proto_err) => {
                warn!(conn_id = %conn_id, error = %proto_err, "malformed frame, stream poisoned");
                conn.close(ErrorCode::Unknown.to_u64(), &proto_err.to_string());
            }
            // Handled inline by the frame loop.
            ReadFrameError::UnknownFrame { .. } => {}
        }
    }

    /// Remove a finished connection from the connector and its route.
    async fn teardown(&self, conn_id: &str) {
        let Some(conn) = self.connector.get(conn_id) else {
            info!(conn_id = %conn_id, "close the connection");
            return;
        };
        self.connector.remove(conn_id);

        let router = self.state().router.clone();
        if let Some(router) = router {
            if let Some(route) = router.route(conn.metadata().map(|m| &**m)) {
                route.remove(conn_id);
            }
        }
        conn.close().await;
        info!(
            name = %conn.name(),
            client_id = %conn.client_id(),
            conn_id = %conn_id,
            "close the connection"
        );
    }

    fn do_connection_close_handlers(&self, conn_id: &str) {
        debug!(conn_id = %conn_id, "transport connection closed");
        let handlers = self.state().connection_close_handlers.clone();
        for handler in &handlers {
            handler(conn_id);
        }
    }

    async fn write_goaway<W>(&self, send: &mut W, conn_id: &str, message: &str)
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let goaway = Frame::Goaway(GoawayFrame::new(message));
        if let Err(e) = frame_stream::write_frame(send, &goaway).await {
            error!(conn_id = %conn_id, error = %e, "write goaway frame");
        }
    }

    fn validate_router(&self) -> Result<(), ServerError> {
        if self.state().router.is_none() {
            return Err(ServerError::MissingRouter);
        }
        Ok(())
    }

    fn validate_metadata_builder(&self) -> Result<(), ServerError> {
        if self.state().metadata_builder.is_none() {
            return Err(ServerError::MissingMetadataBuilder);
        }
        Ok(())
    }

    fn auth_names(&self) -> Vec<String> {
        if self.opts.auths.is_empty() {
            return vec!["none".to_string()];
        }
        self.opts.auths.keys().cloned().collect()
    }

    fn task_started(&self) {
        self.tasks.send_modify(|running| *running += 1);
    }

    fn task_finished(&self) {
        self.tasks.send_modify(|running| *running -= 1);
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("server state mutex poisoned")
    }
}

fn auth_name_label(name: &str) -> &str {
    if name.is_empty() {
        "empty"
    } else {
        name
    }
}

fn is_net_closed(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}
