//! Frame type tags.

use std::fmt;

/// The kinds of frames transferable within the zipper protocol.
///
/// The discriminant is the masked tag value; on the wire, top-level frames
/// carry the value with the high bit set (see [`FrameType::wire_tag`]).
/// [`FrameType::Meta`] and [`FrameType::Payload`] only ever appear nested
/// inside a [`crate::DataFrame`] body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Tagged user data, nesting a meta and a payload frame.
    Data = 0x3F,
    /// Reserved.
    Token = 0x3E,
    /// First frame of every stream: client identity and credentials.
    Handshake = 0x3D,
    /// Reserved; the transport's keep-alive is used instead.
    Ping = 0x3C,
    /// Reserved.
    Pong = 0x3B,
    /// Reserved.
    Accepted = 0x3A,
    /// Handshake denied (bad credentials, ALPN filter).
    Rejected = 0x39,
    /// Server is abandoning the stream (protocol violation, eviction).
    Goaway = 0x30,
    /// Meta sub-frame of a data frame.
    Meta = 0x2F,
    /// Payload sub-frame of a data frame.
    Payload = 0x2E,
    /// Result returned from the broker to the originating source.
    Backflow = 0x2D,
    /// Handshake accepted.
    HandshakeAck = 0x29,
}

/// High bit marking a tag byte as a top-level frame.
pub(crate) const TOP_LEVEL_BIT: u8 = 0x80;

impl FrameType {
    /// Look up a frame type by its masked tag value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x3F => Some(Self::Data),
            0x3E => Some(Self::Token),
            0x3D => Some(Self::Handshake),
            0x3C => Some(Self::Ping),
            0x3B => Some(Self::Pong),
            0x3A => Some(Self::Accepted),
            0x39 => Some(Self::Rejected),
            0x30 => Some(Self::Goaway),
            0x2F => Some(Self::Meta),
            0x2E => Some(Self::Payload),
            0x2D => Some(Self::Backflow),
            0x29 => Some(Self::HandshakeAck),
            _ => None,
        }
    }

    /// Masked tag value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Tag byte as written on the wire for a top-level frame.
    #[must_use]
    pub fn wire_tag(self) -> u8 {
        TOP_LEVEL_BIT | self as u8
    }

    /// Whether this frame type may appear at the top level of a stream.
    #[must_use]
    pub fn is_top_level(self) -> bool {
        !matches!(self, Self::Meta | Self::Payload)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "DataFrame",
            Self::Token => "TokenFrame",
            Self::Handshake => "HandshakeFrame",
            Self::Ping => "PingFrame",
            Self::Pong => "PongFrame",
            Self::Accepted => "AcceptedFrame",
            Self::Rejected => "RejectedFrame",
            Self::Goaway => "GoawayFrame",
            Self::Meta => "MetaFrame",
            Self::Payload => "PayloadFrame",
            Self::Backflow => "BackflowFrame",
            Self::HandshakeAck => "HandshakeAckFrame",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        // Wire contract: these values must never change.
        assert_eq!(FrameType::Data.to_u8(), 0x3F);
        assert_eq!(FrameType::Handshake.to_u8(), 0x3D);
        assert_eq!(FrameType::Rejected.to_u8(), 0x39);
        assert_eq!(FrameType::Goaway.to_u8(), 0x30);
        assert_eq!(FrameType::Meta.to_u8(), 0x2F);
        assert_eq!(FrameType::Payload.to_u8(), 0x2E);
        assert_eq!(FrameType::Backflow.to_u8(), 0x2D);
        assert_eq!(FrameType::HandshakeAck.to_u8(), 0x29);
    }

    #[test]
    fn round_trip_all_tags() {
        for value in 0u8..=0x7F {
            if let Some(t) = FrameType::from_u8(value) {
                assert_eq!(t.to_u8(), value);
                assert_eq!(t.wire_tag(), 0x80 | value);
            }
        }
    }

    #[test]
    fn nested_tags_are_not_top_level() {
        assert!(!FrameType::Meta.is_top_level());
        assert!(!FrameType::Payload.is_top_level());
        assert!(FrameType::Data.is_top_level());
        assert!(FrameType::Backflow.is_top_level());
    }
}
