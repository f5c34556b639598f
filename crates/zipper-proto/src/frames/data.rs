//! The data frame and its nested meta/payload sub-frames.

use bytes::Bytes;

use crate::{
    errors::{ProtocolError, Result},
    tags::FrameType,
    wire::{put_tlv, TlvReader},
    Tag,
};

const TAG_TRANSACTION_ID: u8 = 0x01;
const TAG_ISSUER: u8 = 0x02;
const TAG_METADATA: u8 = 0x03;
const TAG_BROADCAST: u8 = 0x04;

const TAG_DATA_TAG: u8 = 0x01;
const TAG_CARRIAGE: u8 = 0x02;

/// Meta sub-frame of a [`DataFrame`].
///
/// Carries the transaction id, the issuer (the client id of the source
/// that produced the frame, which backflow routing keys on), the opaque
/// routing metadata produced by the metadata builder, and the broadcast
/// flag. Metadata and broadcast are omitted from the wire when empty/false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFrame {
    /// Transaction id, assigned by the producer.
    pub transaction_id: String,
    /// Client id of the producing source.
    pub issuer: String,
    /// Opaque metadata bytes; empty means "inherit from the connection".
    pub metadata: Bytes,
    /// Whether the frame fans out to downstream zippers.
    pub broadcast: bool,
}

impl MetaFrame {
    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        put_tlv(out, TAG_TRANSACTION_ID, self.transaction_id.as_bytes());
        put_tlv(out, TAG_ISSUER, self.issuer.as_bytes());
        if !self.metadata.is_empty() {
            put_tlv(out, TAG_METADATA, &self.metadata);
        }
        if self.broadcast {
            put_tlv(out, TAG_BROADCAST, &[1]);
        }
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut frame = Self::default();
        let mut blocks = TlvReader::new(body);
        while let Some((tag, block)) = blocks.next_block()? {
            match tag {
                TAG_TRANSACTION_ID => frame.transaction_id = decode_string("MetaFrame", block)?,
                TAG_ISSUER => frame.issuer = decode_string("MetaFrame", block)?,
                TAG_METADATA => frame.metadata = Bytes::copy_from_slice(block),
                TAG_BROADCAST => frame.broadcast = block.first().is_some_and(|b| *b != 0),
                _ => {}
            }
        }
        Ok(frame)
    }
}

/// Payload sub-frame of a [`DataFrame`]: a data tag plus opaque carriage
/// bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFrame {
    /// Topic the carriage is published under.
    pub tag: Tag,
    /// The user bytes being carried.
    pub carriage: Bytes,
}

impl PayloadFrame {
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
                TAG_DATA_TAG => tag = Some(decode_data_tag("PayloadFrame", block)?),
                TAG_CARRIAGE => carriage = Bytes::copy_from_slice(block),
                _ => {}
            }
        }
        let tag = tag
            .ok_or(ProtocolError::MissingField { frame: "PayloadFrame", field: "DataTag" })?;
        Ok(Self { tag, carriage })
    }
}

/// Tagged user data flowing from a producer through the broker.
///
/// Body layout, in order: [`MetaFrame`] then [`PayloadFrame`], each as a
/// nested `TAG | LEN | BODY` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFrame {
    /// Routing metadata.
    pub meta: MetaFrame,
    /// The tagged payload.
    pub payload: PayloadFrame,
}

impl DataFrame {
    /// Create a frame carrying `carriage` under `tag`, with an empty meta
    /// frame.
    pub fn new(tag: Tag, carriage: impl Into<Bytes>) -> Self {
        Self {
            meta: MetaFrame::default(),
            payload: PayloadFrame { tag, carriage: carriage.into() },
        }
    }

    /// The data tag the payload is published under.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.payload.tag
    }

    /// The carried user bytes.
    #[must_use]
    pub fn carriage(&self) -> &Bytes {
        &self.payload.carriage
    }

    /// Transaction id from the meta frame.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.meta.transaction_id
    }

    /// Client id of the producing source (the meta frame's issuer).
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.meta.issuer
    }

    /// Whether the frame fans out to downstream zippers.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.meta.broadcast
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        let mut meta = Vec::new();
        self.meta.encode_body(&mut meta);
        put_tlv(out, FrameType::Meta.to_u8(), &meta);

        let mut payload = Vec::new();
        self.payload.encode_body(&mut payload);
        put_tlv(out, FrameType::Payload.to_u8(), &payload);
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut meta = None;
        let mut payload = None;
        let mut blocks = TlvReader::new(body);
        while let Some((tag, block)) = blocks.next_block()? {
            match FrameType::from_u8(tag) {
                Some(FrameType::Meta) => meta = Some(MetaFrame::decode(block)?),
                Some(FrameType::Payload) => payload = Some(PayloadFrame::decode(block)?),
                _ => {}
            }
        }
        let meta =
            meta.ok_or(ProtocolError::MissingField { frame: "DataFrame", field: "MetaFrame" })?;
        let payload = payload
            .ok_or(ProtocolError::MissingField { frame: "DataFrame", field: "PayloadFrame" })?;
        Ok(Self { meta, payload })
    }
}

pub(crate) fn decode_string(frame: &'static str, block: &[u8]) -> Result<String> {
    String::from_utf8(block.to_vec())
        .map_err(|_| ProtocolError::Malformed { frame, reason: "string field is not valid UTF-8" })
}

pub(crate) fn decode_data_tag(frame: &'static str, block: &[u8]) -> Result<Tag> {
    let bytes: [u8; 4] = block
        .try_into()
        .map_err(|_| ProtocolError::Malformed { frame, reason: "data tag is not 4 bytes" })?;
    Ok(Tag::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_requires_both_sub_frames() {
        // A body holding only the meta sub-frame.
        let mut body = Vec::new();
        let mut meta = Vec::new();
        MetaFrame::default().encode_body(&mut meta);
        put_tlv(&mut body, FrameType::Meta.to_u8(), &meta);

        assert_eq!(
            DataFrame::decode(&body),
            Err(ProtocolError::MissingField { frame: "DataFrame", field: "PayloadFrame" })
        );
    }

    #[test]
    fn payload_frame_requires_data_tag() {
        let mut body = Vec::new();
        put_tlv(&mut body, TAG_CARRIAGE, b"hi");
        assert_eq!(
            PayloadFrame::decode(&body),
            Err(ProtocolError::MissingField { frame: "PayloadFrame", field: "DataTag" })
        );
    }

    #[test]
    fn payload_frame_rejects_short_tag() {
        let mut body = Vec::new();
        put_tlv(&mut body, TAG_DATA_TAG, &[0x01, 0x02]);
        assert!(matches!(PayloadFrame::decode(&body), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn meta_frame_skips_unknown_blocks() {
        let mut body = Vec::new();
        put_tlv(&mut body, TAG_TRANSACTION_ID, b"tx-1");
        put_tlv(&mut body, 0x66, b"from the future");
        put_tlv(&mut body, TAG_ISSUER, b"src-9");

        let meta = MetaFrame::decode(&body).unwrap();
        assert_eq!(meta.transaction_id, "tx-1");
        assert_eq!(meta.issuer, "src-9");
        assert!(meta.metadata.is_empty());
        assert!(!meta.broadcast);
    }

    #[test]
    fn empty_metadata_is_not_encoded() {
        let mut with_meta = Vec::new();
        MetaFrame { metadata: Bytes::from_static(b"m"), ..Default::default() }
            .encode_body(&mut with_meta);

        let mut without = Vec::new();
        MetaFrame::default().encode_body(&mut without);

        assert!(with_meta.len() > without.len());
    }
}
