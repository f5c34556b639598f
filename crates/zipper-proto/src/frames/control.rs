//! Control frames: handshake ack, rejection, goaway, backflow.

use bytes::Bytes;

use crate::{
    errors::{ProtocolError, Result},
    frames::data::{decode_data_tag, decode_string},
    wire::{put_tlv, TlvReader},
    Tag,
};

const TAG_MESSAGE: u8 = 0x01;

const TAG_DATA_TAG: u8 = 0x01;
const TAG_CARRIAGE: u8 = 0x02;

/// Handshake accepted. Empty body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeAckFrame;

impl HandshakeAckFrame {
    pub(crate) fn encode_body(&self, _out: &mut Vec<u8>) {}

    pub(crate) fn decode(_body: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// Handshake denied: bad credentials or a failed ALPN filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectedFrame {
    /// Human-readable reason for the rejection.
    pub message: String,
}

impl RejectedFrame {
    /// Create a rejection with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        put_tlv(out, TAG_MESSAGE, self.message.as_bytes());
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        Ok(Self { message: decode_message("RejectedFrame", body)? })
    }
}

/// Server is abandoning the stream: protocol violation or duplicate-name
/// eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Human-readable reason for the goaway.
    pub message: String,
}

impl GoawayFrame {
    /// Create a goaway with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        put_tlv(out, TAG_MESSAGE, self.message.as_bytes());
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        Ok(Self { message: decode_message("GoawayFrame", body)? })
    }
}

/// Result returned from the broker to the source that originated a data
/// frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackflowFrame {
    /// Data tag the result belongs to.
    pub tag: Tag,
    /// Result bytes.
    pub carriage: Bytes,
}

impl BackflowFrame {
    /// Create a backflow result for `tag`.
    pub fn new(tag: Tag, carriage: impl Into<Bytes>) -> Self {
        Self { tag, carriage: carriage.into() }
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        put_tlv(out, TAG_DATA_TAG, &self.tag.to_le_bytes());
        put_tlv(out, TAG_CARRIAGE, &self.carriage);
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut tag = None;
        let mut carriage = Bytes::new();
        let mut blocks = TlvReader::new(body);
        while let Some((block_tag, block)) = blocks.next_block()? {
            match block_tag {
                TAG_DATA_TAG => tag = Some(decode_data_tag("BackflowFrame", block)?),
                TAG_CARRIAGE => carriage = Bytes::copy_from_slice(block),
                _ => {}
            }
        }
        let tag = tag
            .ok_or(ProtocolError::MissingField { frame: "BackflowFrame", field: "DataTag" })?;
        Ok(Self { tag, carriage })
    }
}

fn decode_message(frame: &'static str, body: &[u8]) -> Result<String> {
    let mut message = String::new();
    let mut blocks = TlvReader::new(body);
    while let Some((tag, block)) = blocks.next_block()? {
        if tag == TAG_MESSAGE {
            message = decode_string(frame, block)?;
        }
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goaway_carries_its_message() {
        let mut body = Vec::new();
        GoawayFrame::new("handshake failed").encode_body(&mut body);
        assert_eq!(GoawayFrame::decode(&body).unwrap().message, "handshake failed");
    }

    #[test]
    fn backflow_requires_data_tag() {
        let mut body = Vec::new();
        put_tlv(&mut body, TAG_CARRIAGE, b"result");
        assert_eq!(
            BackflowFrame::decode(&body),
            Err(ProtocolError::MissingField { frame: "BackflowFrame", field: "DataTag" })
        );
    }
}
