//! Frame definitions.
//!
//! Each frame owns its body encoding (`encode_body`) and decoding
//! (`decode`); the outer `TAG | LEN` envelope is applied by
//! [`crate::Frame`].

mod control;
mod data;
mod handshake;

pub use control::{BackflowFrame, GoawayFrame, HandshakeAckFrame, RejectedFrame};
pub use data::{DataFrame, MetaFrame, PayloadFrame};
pub use handshake::HandshakeFrame;
