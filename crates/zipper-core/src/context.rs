//! Per-frame context handed to frame handlers.

use zipper_proto::Frame;

use crate::{connection::ConnId, transport::StreamId};

/// Boxed error returned by user-supplied hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a frame handler may need about the frame being processed:
/// which connection and stream it arrived on, and the frame itself.
#[derive(Debug)]
pub struct Context {
    /// Id of the logical connection the frame arrived on.
    pub conn_id: ConnId,
    /// Id of the stream within the transport connection.
    pub stream_id: StreamId,
    /// The frame being processed.
    pub frame: Frame,
}
