//! Core of the zipper data-flow broker.
//!
//! A zipper accepts long-lived multiplexed connections from three kinds of
//! clients — sources (producers), stream functions (consumers subscribed
//! to data tags), and upstream zippers (peer brokers) — and dispatches
//! tagged data frames among them.
//!
//! # Architecture
//!
//! ```text
//!      listener -> accept connection -> accept stream -> handshake
//!                                                            |
//!        +---------------------------------------------------+
//!        v
//!   Connector (id -> logical connection)      Router (metadata -> route)
//!        |                                          |
//!        +-------------------+----------------------+
//!                            v
//!                       Dispatcher
//!          fan-out to stream functions observing the tag,
//!          broadcast to downstream zippers,
//!          backflow results to the originating source
//! ```
//!
//! The transport is provider-supplied behind the traits in [`transport`];
//! tests drive the whole server over the in-memory transport from
//! `zipper-harness`.
//!
//! # Modules
//!
//! - [`auth`]: pluggable credential verification
//! - [`metadata`]: routing metadata derivation and codec
//! - [`connection`]: logical connections with serialized writers
//! - [`connector`]: concurrent registry of live connections
//! - [`router`]: tag-indexed stream function routing
//! - [`frame_stream`]: framed reading/writing over transport streams
//! - [`dispatcher`]: data frame fan-out, downstream broadcast, backflow
//! - [`server`]: accept loop, handshake, frame loop, shutdown
//! - [`transport`]: the QUIC-class transport contract
//! - [`error`]: error codes of the wire contract

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod connection;
pub mod connector;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod frame_stream;
pub mod metadata;
pub mod router;
pub mod server;
pub mod transport;

pub use connection::{ClientType, ConnId, Connection, FrameWriter};
pub use connector::Connector;
pub use context::{BoxError, Context};
pub use dispatcher::DispatchError;
pub use error::{ErrorCode, ServerError};
pub use metadata::{DefaultMetadataBuilder, Metadata, MetadataBuilder, MetadataError};
pub use router::{DefaultRouter, Route, Router, RouterError};
pub use server::{Server, ServerOptions, DEFAULT_LISTEN_ADDR};
