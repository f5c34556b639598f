//! Zipper wire protocol.
//!
//! This crate contains the pure codec for the zipper broker: frame type
//! tags, the varint/TLV wire primitives, and the encode/decode logic for
//! every frame the broker exchanges with its clients. It is completely
//! decoupled from I/O; the async framed reader lives in `zipper-core`.
//!
//! # Wire format
//!
//! Every frame is `TAG | LEN | BODY`:
//!
//! - `TAG` is one byte. Top-level frames carry the high bit (`0x80`);
//!   sub-frames nested inside a body do not.
//! - `LEN` is an unsigned LEB128 varint counting the body bytes.
//! - `BODY` may contain nested frames of the same shape.
//!
//! Numeric fields (data tags, observed-tag arrays) are little-endian fixed
//! 32-bit. Strings are raw UTF-8 bytes of the declared length, no
//! terminator.
//!
//! Decoding skips unknown sub-frames inside a known frame so that newer
//! peers can add fields without breaking older ones. Unknown *top-level*
//! tags surface as [`ProtocolError::UnknownFrame`], which the connection
//! handler treats as a soft error.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
mod frame;
pub mod frames;
mod tags;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use frames::{
    BackflowFrame, DataFrame, GoawayFrame, HandshakeAckFrame, HandshakeFrame, MetaFrame,
    PayloadFrame, RejectedFrame,
};
pub use tags::FrameType;

/// Identifier of a data topic ("data tag").
///
/// Sources emit [`DataFrame`]s carrying a tag; stream functions declare at
/// handshake the set of tags they observe.
pub type Tag = u32;
