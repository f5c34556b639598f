//! Routing metadata, derived at handshake and carried on data frames.
//!
//! Metadata is the key routes are indexed by. What it contains is
//! deployment-specific (tenant ids, application names, ...), so both the
//! extraction from a handshake and the byte codec carried inside data
//! frames are pluggable.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use zipper_proto::HandshakeFrame;

/// Opaque routing metadata.
pub trait Metadata: Send + Sync + 'static {
    /// Serialize the metadata into the bytes carried in a data frame's
    /// meta frame.
    fn encode(&self) -> Bytes;
}

/// Failure while building or decoding metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("metadata: {0}")]
pub struct MetadataError(pub String);

/// Derives metadata from handshakes and revives it from frame bytes.
pub trait MetadataBuilder: Send + Sync + 'static {
    /// Derive routing metadata from a client's handshake.
    ///
    /// # Errors
    ///
    /// An error here fails the handshake with a goaway.
    fn build(&self, handshake: &HandshakeFrame) -> Result<Arc<dyn Metadata>, MetadataError>;

    /// Revive metadata from the bytes carried in a data frame.
    ///
    /// Empty bytes decode to `None`; the dispatcher then inherits the
    /// producing connection's metadata.
    ///
    /// # Errors
    ///
    /// An error here fails the frame's dispatch.
    fn decode(&self, bytes: &[u8]) -> Result<Option<Arc<dyn Metadata>>, MetadataError>;
}

/// Metadata builder for single-tenant deployments: every client maps to
/// the same (empty) metadata, so one route serves the whole broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMetadataBuilder;

struct DefaultMetadata(Bytes);

impl Metadata for DefaultMetadata {
    fn encode(&self) -> Bytes {
        self.0.clone()
    }
}

impl MetadataBuilder for DefaultMetadataBuilder {
    fn build(&self, _handshake: &HandshakeFrame) -> Result<Arc<dyn Metadata>, MetadataError> {
        Ok(Arc::new(DefaultMetadata(Bytes::new())))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Option<Arc<dyn Metadata>>, MetadataError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(DefaultMetadata(Bytes::copy_from_slice(bytes)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_builds_empty_metadata() {
        let hs = HandshakeFrame::new("s", "", 0x5F, vec![], "", "");
        let md = DefaultMetadataBuilder.build(&hs).unwrap();
        assert!(md.encode().is_empty());
    }

    #[test]
    fn empty_bytes_decode_to_none() {
        assert!(DefaultMetadataBuilder.decode(b"").unwrap().is_none());
    }

    #[test]
    fn nonempty_bytes_survive_decode() {
        let md = DefaultMetadataBuilder.decode(b"tenant-a").unwrap().unwrap();
        assert_eq!(md.encode().as_ref(), b"tenant-a");
    }
}
