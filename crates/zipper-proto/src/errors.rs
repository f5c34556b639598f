//! Error types for the zipper wire protocol.

use thiserror::Error;

/// Protocol-level errors raised while encoding or decoding frames.
///
/// Every variant except [`ProtocolError::UnknownFrame`] means the input is
/// malformed and the producing stream should be considered poisoned.
/// `UnknownFrame` is recoverable: the frame's length prefix has already
/// been consumed, so the caller may discard the body and keep reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended in the middle of a frame.
    #[error("frame truncated")]
    Truncated,

    /// A length varint does not fit in a u64.
    #[error("length varint overflows u64")]
    VarintOverflow,

    /// A declared body length exceeds the frame size cap.
    #[error("frame body of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared body size.
        size: usize,
        /// Maximum allowed body size.
        max: usize,
    },

    /// The first byte of a top-level frame does not carry the high bit.
    #[error("byte {0:#04x} is not a top-level frame tag")]
    NotTopLevel(u8),

    /// A top-level tag that no known frame uses.
    #[error("unknown top-level frame tag {0:#04x}")]
    UnknownFrame(u8),

    /// A required sub-frame or field is absent.
    #[error("{frame} is missing required field {field}")]
    MissingField {
        /// Frame being decoded.
        frame: &'static str,
        /// Missing field name.
        field: &'static str,
    },

    /// A field is present but its content is invalid.
    #[error("{frame}: {reason}")]
    Malformed {
        /// Frame being decoded.
        frame: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Convenient Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
