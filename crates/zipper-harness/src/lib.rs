//! Test harness for the zipper broker.
//!
//! The broker's protocol logic lives inside transport streams, so
//! correctness is tested over an in-memory transport that provides the
//! same connection/stream semantics as the production QUIC stack:
//! multiplexed bidirectional streams, ALPN, and application error codes on
//! close. What is *not* tested here is the transport's own reliability
//! machinery (loss recovery, congestion control, migration).

#![forbid(unsafe_code)]

mod client;
mod mem_transport;

pub use client::{sfn_handshake, source_handshake, upstream_handshake, TestClient};
pub use mem_transport::{MemConnection, MemConnector, MemRecvStream, MemTransport};
