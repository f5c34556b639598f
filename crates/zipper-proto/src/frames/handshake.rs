//! The handshake frame, first frame of every stream.

use crate::{
    errors::{ProtocolError, Result},
    frames::data::decode_string,
    wire::{put_tlv, TlvReader},
    Tag,
};

const TAG_NAME: u8 = 0x01;
// ID and Type share tag 0x02 on the wire; canonical encoding order
// disambiguates them (ID first, Type second).
const TAG_ID: u8 = 0x02;
const TAG_TYPE: u8 = 0x02;
const TAG_OBSERVE_DATA_TAGS: u8 = 0x03;
const TAG_AUTH_NAME: u8 = 0x04;
const TAG_AUTH_PAYLOAD: u8 = 0x05;

/// Client identity and credentials, sent as the first frame of a stream.
///
/// Canonical body order: name, id, client type, observed data tags, auth
/// name, auth payload. All six fields are always encoded, empty strings as
/// zero-length blocks, so the encoding is deterministic byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeFrame {
    /// Client name. Within one route, stream function names are unique.
    pub name: String,
    /// Client id, stable across reconnects of the same logical client.
    pub id: String,
    /// Raw client type byte; interpreted by the broker core.
    pub client_type: u8,
    /// Data tags this client observes (stream functions and sources).
    pub observe_data_tags: Vec<Tag>,
    /// Name of the authentication scheme the credentials belong to.
    pub auth_name: String,
    /// Credential payload handed to the authenticator.
    pub auth_payload: String,
}

impl HandshakeFrame {
    /// Create a handshake frame.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        client_type: u8,
        observe_data_tags: Vec<Tag>,
        auth_name: impl Into<String>,
        auth_payload: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            client_type,
            observe_data_tags,
            auth_name: auth_name.into(),
            auth_payload: auth_payload.into(),
        }
    }

    /// Name of the authentication scheme.
    #[must_use]
    pub fn auth_name(&self) -> &str {
        &self.auth_name
    }

    /// Credential payload.
    #[must_use]
    pub fn auth_payload(&self) -> &str {
        &self.auth_payload
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        put_tlv(out, TAG_NAME, self.name.as_bytes());
        put_tlv(out, TAG_ID, self.id.as_bytes());
        put_tlv(out, TAG_TYPE, &[self.client_type]);

        let mut tags = Vec::with_capacity(self.observe_data_tags.len() * 4);
        for tag in &self.observe_data_tags {
            tags.extend_from_slice(&tag.to_le_bytes());
        }
        put_tlv(out, TAG_OBSERVE_DATA_TAGS, &tags);

        put_tlv(out, TAG_AUTH_NAME, self.auth_name.as_bytes());
        put_tlv(out, TAG_AUTH_PAYLOAD, self.auth_payload.as_bytes());
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut frame = Self::default();
        let mut client_type = None;
        let mut id_seen = false;

        let mut blocks = TlvReader::new(body);
        while let Some((tag, block)) = blocks.next_block()? {
            match tag {
                TAG_NAME => frame.name = decode_string("HandshakeFrame", block)?,
                TAG_ID if !id_seen => {
                    frame.id = decode_string("HandshakeFrame", block)?;
                    id_seen = true;
                }
                TAG_TYPE => {
                    let [value] = block else {
                        return Err(ProtocolError::Malformed {
                            frame: "HandshakeFrame",
                            reason: "client type is not exactly 1 byte",
                        });
                    };
                    client_type = Some(*value);
                }
                TAG_OBSERVE_DATA_TAGS => {
                    if block.len() % 4 != 0 {
                        return Err(ProtocolError::Malformed {
                            frame: "HandshakeFrame",
                            reason: "observed tags are not a multiple of 4 bytes",
                        });
                    }
                    frame.observe_data_tags = block
                        .chunks_exact(4)
                        .map(|chunk| Tag::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
                        .collect();
                }
                TAG_AUTH_NAME => frame.auth_name = decode_string("HandshakeFrame", block)?,
                TAG_AUTH_PAYLOAD => frame.auth_payload = decode_string("HandshakeFrame", block)?,
                _ => {}
            }
        }

        frame.client_type = client_type
            .ok_or(ProtocolError::MissingField { frame: "HandshakeFrame", field: "Type" })?;
        Ok(frame)
    }
}
