//! Shared scaffolding for the integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use zipper_core::{
    DefaultMetadataBuilder, DefaultRouter, MetadataBuilder, Server, ServerOptions,
};
use zipper_harness::{MemConnector, MemTransport};

/// A served zipper plus the handles tests poke at.
pub struct TestServer {
    pub server: Arc<Server>,
    pub router: Arc<DefaultRouter>,
    pub connector: MemConnector,
}

/// Start a server over the in-memory transport with the default router and
/// metadata builder.
pub async fn start_server(opts: ServerOptions) -> TestServer {
    start_server_with_builder(opts, Arc::new(DefaultMetadataBuilder)).await
}

/// Start a server with a specific metadata builder.
pub async fn start_server_with_builder(
    opts: ServerOptions,
    builder: Arc<dyn MetadataBuilder>,
) -> TestServer {
    init_tracing();

    let server = Arc::new(Server::new("test-zipper", opts));
    let router = Arc::new(DefaultRouter::new());
    let dyn_router: Arc<DefaultRouter> = Arc::clone(&router);
    let dyn_router: Arc<dyn zipper_core::Router> = dyn_router;
    server.config_router(dyn_router);
    server.config_metadata_builder(builder);

    let transport = MemTransport::new("127.0.0.1:9000".parse().expect("test addr"));
    let connector = transport.connector();
    tokio::spawn(Arc::clone(&server).serve(transport));

    TestServer { server, router, connector }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or the test deadline passes.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
