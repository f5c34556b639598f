//! Byte-exact wire vectors.
//!
//! These vectors are the wire contract; peers built against other
//! implementations must see identical bytes.

use zipper_proto::{Frame, HandshakeFrame};

#[test]
fn handshake_frame_encodes_to_the_normative_vector() {
    let frame = HandshakeFrame::new("1234", "", 0xD3, vec![0x01, 0x02], "token", "a");

    let wire = Frame::Handshake(frame.clone()).encode();
    assert_eq!(
        wire.as_ref(),
        &[
            0x80 | 0x3D, 0x1F, // HandshakeFrame, 31 body bytes
            0x01, 0x04, 0x31, 0x32, 0x33, 0x34, // Name "1234"
            0x02, 0x00, // ID ""
            0x02, 0x01, 0xD3, // Type 0xD3
            0x03, 0x08, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, // ObserveDataTags
            0x04, 0x05, 0x74, 0x6F, 0x6B, 0x65, 0x6E, // AuthName "token"
            0x05, 0x01, 0x61, // AuthPayload "a"
        ][..]
    );

    let decoded = Frame::decode(&wire).expect("vector should decode");
    let Frame::Handshake(decoded) = decoded else {
        panic!("expected a handshake frame");
    };
    assert_eq!(decoded.name, "1234");
    assert_eq!(decoded.client_type, 0xD3);
    assert_eq!(decoded.observe_data_tags, vec![0x01, 0x02]);
    assert_eq!(decoded.auth_name(), "token");
    assert_eq!(decoded.auth_payload(), "a");
    assert_eq!(decoded, frame);
}

#[test]
fn handshake_ack_is_two_bytes() {
    let wire = Frame::HandshakeAck(zipper_proto::HandshakeAckFrame).encode();
    assert_eq!(wire.as_ref(), &[0x80 | 0x29, 0x00][..]);
}

#[test]
fn goaway_message_layout() {
    let wire = Frame::Goaway(zipper_proto::GoawayFrame::new("bye")).encode();
    assert_eq!(wire.as_ref(), &[0x80 | 0x30, 0x05, 0x01, 0x03, b'b', b'y', b'e'][..]);
}

#[test]
fn backflow_layout() {
    let wire = Frame::Backflow(zipper_proto::BackflowFrame::new(0x07, &b"hi"[..])).encode();
    assert_eq!(
        wire.as_ref(),
        &[
            0x80 | 0x2D, 0x0A, // BackflowFrame, 10 body bytes
            0x01, 0x04, 0x07, 0x00, 0x00, 0x00, // DataTag 0x07 LE
            0x02, 0x02, b'h', b'i', // Carriage
        ][..]
    );
}
