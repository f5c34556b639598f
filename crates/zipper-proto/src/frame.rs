//! Top-level frame envelope: `TAG | LEN | BODY`.

use bytes::Bytes;

use crate::{
    errors::{ProtocolError, Result},
    frames::{
        BackflowFrame, DataFrame, GoawayFrame, HandshakeAckFrame, HandshakeFrame, RejectedFrame,
    },
    tags::{FrameType, TOP_LEVEL_BIT},
    wire::{self, MAX_FRAME_SIZE},
};

/// One top-level protocol frame.
///
/// # Invariants
///
/// - Round-trip: `Frame::decode(&f.encode()) == f` for every variant.
/// - Encoding is deterministic: sub-frames are written in the canonical
///   order defined by each frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Tagged user data.
    Data(DataFrame),
    /// Client identity and credentials.
    Handshake(HandshakeFrame),
    /// Handshake accepted.
    HandshakeAck(HandshakeAckFrame),
    /// Handshake denied.
    Rejected(RejectedFrame),
    /// Server abandoning the stream.
    Goaway(GoawayFrame),
    /// Result returned to the originating source.
    Backflow(BackflowFrame),
    /// A known but unhandled frame type (ping/pong/accepted/token).
    Reserved(FrameType),
}

impl Frame {
    /// The frame's type tag.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Data(_) => FrameType::Data,
            Self::Handshake(_) => FrameType::Handshake,
            Self::HandshakeAck(_) => FrameType::HandshakeAck,
            Self::Rejected(_) => FrameType::Rejected,
            Self::Goaway(_) => FrameType::Goaway,
            Self::Backflow(_) => FrameType::Backflow,
            Self::Reserved(t) => *t,
        }
    }

    /// Encode the frame into its wire representation.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut body = Vec::new();
        match self {
            Self::Data(f) => f.encode_body(&mut body),
            Self::Handshake(f) => f.encode_body(&mut body),
            Self::HandshakeAck(f) => f.encode_body(&mut body),
            Self::Rejected(f) => f.encode_body(&mut body),
            Self::Goaway(f) => f.encode_body(&mut body),
            Self::Backflow(f) => f.encode_body(&mut body),
            Self::Reserved(_) => {}
        }

        let mut out = Vec::with_capacity(body.len() + 6);
        out.push(self.frame_type().wire_tag());
        wire::put_varint(&mut out, body.len() as u64);
        out.extend_from_slice(&body);
        Bytes::from(out)
    }

    /// Decode exactly one frame from the front of `bytes`.
    ///
    /// Trailing bytes after the frame body are ignored; the streaming
    /// reader in `zipper-core` is length-driven and never over-reads.
    ///
    /// # Errors
    ///
    /// See [`ProtocolError`]; all variants except `UnknownFrame` poison the
    /// producing stream.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&first, mut rest)) = bytes.split_first() else {
            return Err(ProtocolError::Truncated);
        };
        if first & TOP_LEVEL_BIT == 0 {
            return Err(ProtocolError::NotTopLevel(first));
        }

        let len = wire::read_varint(&mut rest)?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::VarintOverflow)?;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
        }
        if rest.len() < len {
            return Err(ProtocolError::Truncated);
        }

        Self::decode_parts(first & !TOP_LEVEL_BIT, &rest[..len])
    }

    /// Decode a frame whose envelope has already been consumed.
    ///
    /// `tag` is the masked tag byte, `body` exactly the declared body
    /// bytes. This is the entry point for the streaming reader.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownFrame`] for tags outside the protocol (the
    /// caller may discard the body and continue); other variants for
    /// malformed bodies.
    pub fn decode_parts(tag: u8, body: &[u8]) -> Result<Self> {
        match FrameType::from_u8(tag) {
            Some(FrameType::Data) => Ok(Self::Data(DataFrame::decode(body)?)),
            Some(FrameType::Handshake) => Ok(Self::Handshake(HandshakeFrame::decode(body)?)),
            Some(FrameType::HandshakeAck) => {
                Ok(Self::HandshakeAck(HandshakeAckFrame::decode(body)?))
            }
            Some(FrameType::Rejected) => Ok(Self::Rejected(RejectedFrame::decode(body)?)),
            Some(FrameType::Goaway) => Ok(Self::Goaway(GoawayFrame::decode(body)?)),
            Some(FrameType::Backflow) => Ok(Self::Backflow(BackflowFrame::decode(body)?)),
            Some(
                t @ (FrameType::Token | FrameType::Ping | FrameType::Pong | FrameType::Accepted),
            ) => Ok(Self::Reserved(t)),
            Some(FrameType::Meta | FrameType::Payload) | None => {
                Err(ProtocolError::UnknownFrame(tag))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;
    use crate::frames::{MetaFrame, PayloadFrame};

    fn arb_string() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:_-]{0,24}"
    }

    fn arb_bytes() -> impl Strategy<Value = Bytes> {
        prop::collection::vec(any::<u8>(), 0..128).prop_map(Bytes::from)
    }

    fn arb_data_frame() -> impl Strategy<Value = Frame> {
        (arb_string(), arb_string(), arb_bytes(), any::<bool>(), any::<u32>(), arb_bytes())
            .prop_map(|(transaction_id, issuer, metadata, broadcast, tag, carriage)| {
                Frame::Data(DataFrame {
                    meta: MetaFrame { transaction_id, issuer, metadata, broadcast },
                    payload: PayloadFrame { tag, carriage },
                })
            })
    }

    fn arb_handshake_frame() -> impl Strategy<Value = Frame> {
        (
            arb_string(),
            arb_string(),
            any::<u8>(),
            prop::collection::vec(any::<u32>(), 0..8),
            arb_string(),
            arb_string(),
        )
            .prop_map(|(name, id, client_type, tags, auth_name, auth_payload)| {
                Frame::Handshake(HandshakeFrame::new(
                    name,
                    id,
                    client_type,
                    tags,
                    auth_name,
                    auth_payload,
                ))
            })
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        prop_oneof![
            arb_data_frame(),
            arb_handshake_frame(),
            Just(Frame::HandshakeAck(HandshakeAckFrame)),
            arb_string().prop_map(|m| Frame::Rejected(RejectedFrame::new(m))),
            arb_string().prop_map(|m| Frame::Goaway(GoawayFrame::new(m))),
            (any::<u32>(), arb_bytes())
                .prop_map(|(tag, carriage)| Frame::Backflow(BackflowFrame::new(tag, carriage))),
        ]
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in arb_frame()) {
            let wire = frame.encode();
            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame, parsed);
        }
    }

    #[test]
    fn top_level_bit_is_required() {
        let wire = Frame::Goaway(GoawayFrame::new("x")).encode();
        let mut stripped = wire.to_vec();
        stripped[0] &= !TOP_LEVEL_BIT;
        assert_eq!(Frame::decode(&stripped), Err(ProtocolError::NotTopLevel(0x30)));
    }

    #[test]
    fn unknown_top_level_tag_is_soft() {
        assert_eq!(Frame::decode(&[0x80 | 0x11, 0x00]), Err(ProtocolError::UnknownFrame(0x11)));
    }

    #[test]
    fn nested_tags_are_not_valid_top_level() {
        assert_eq!(Frame::decode(&[0x80 | 0x2F, 0x00]), Err(ProtocolError::UnknownFrame(0x2F)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let wire = Frame::Data(DataFrame::new(7, Bytes::from_static(b"hi"))).encode();
        assert_eq!(Frame::decode(&wire[..wire.len() - 1]), Err(ProtocolError::Truncated));
    }

    #[test]
    fn reserved_frames_round_trip() {
        for t in [FrameType::Ping, FrameType::Pong, FrameType::Accepted, FrameType::Token] {
            let wire = Frame::Reserved(t).encode();
            assert_eq!(Frame::decode(&wire).unwrap(), Frame::Reserved(t));
        }
    }
}
