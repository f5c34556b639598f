//! Framed reading and writing over transport streams.
//!
//! [`read_frame`] pulls exactly one top-level frame off an `AsyncRead` and
//! never over-reads: one tag byte, the length varint, then exactly the
//! declared body. Clean EOF at a frame boundary is reported as
//! [`ReadFrameError::Eof`]; EOF in the middle of a frame is a truncation
//! and poisons the stream.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zipper_proto::{wire::MAX_FRAME_SIZE, Frame, ProtocolError};

/// Why reading the next frame failed.
#[derive(Error, Debug)]
pub enum ReadFrameError {
    /// The stream ended cleanly at a frame boundary.
    #[error("stream ended")]
    Eof,

    /// The transport failed; may carry an application close.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The frame was malformed; the stream is poisoned.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A well-framed but unknown top-level tag. The body has been consumed,
    /// so the caller may log, discard, and keep reading.
    #[error("unknown frame tag {tag:#04x} ({len} byte body discarded)")]
    UnknownFrame {
        /// The masked unknown tag.
        tag: u8,
        /// Length of the discarded body.
        len: usize,
    },
}

/// Read exactly one top-level frame.
///
/// # Errors
///
/// See [`ReadFrameError`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ReadFrameError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if reader.read(&mut tag).await? == 0 {
        return Err(ReadFrameError::Eof);
    }
    let tag = tag[0];
    if tag & 0x80 == 0 {
        return Err(ProtocolError::NotTopLevel(tag).into());
    }

    let len = read_varint(reader).await?;
    let len = usize::try_from(len).map_err(|_| ProtocolError::VarintOverflow)?;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE }.into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(truncated_on_eof)?;

    match Frame::decode_parts(tag & 0x7F, &body) {
        Ok(frame) => Ok(frame),
        Err(ProtocolError::UnknownFrame(tag)) => Err(ReadFrameError::UnknownFrame { tag, len }),
        Err(e) => Err(e.into()),
    }
}

/// Encode and write one frame, flushing afterwards.
///
/// # Errors
///
/// Propagates transport write errors.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let wire = frame.encode();
    writer.write_all(&wire).await?;
    writer.flush().await
}

async fn read_varint<R>(reader: &mut R) -> Result<u64, ReadFrameError>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = reader.read_u8().await.map_err(truncated_on_eof)?;
        if shift == 63 && byte & 0x7F > 1 {
            return Err(ProtocolError::VarintOverflow.into());
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(ProtocolError::VarintOverflow.into());
        }
    }
}

// EOF inside a frame is a protocol truncation, not a clean close.
fn truncated_on_eof(err: io::Error) -> ReadFrameError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ReadFrameError::Protocol(ProtocolError::Truncated)
    } else {
        ReadFrameError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use zipper_proto::{BackflowFrame, DataFrame, GoawayFrame};

    use super::*;

    #[tokio::test]
    async fn frames_round_trip_back_to_back() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frames = vec![
            Frame::Data(DataFrame::new(0x7, &b"hi"[..])),
            Frame::Goaway(GoawayFrame::new("done")),
            Frame::Backflow(BackflowFrame::new(0x7, &b"result"[..])),
        ];
        for frame in &frames {
            write_frame(&mut client, frame).await.unwrap();
        }
        drop(client);

        for expected in &frames {
            let got = read_frame(&mut server).await.unwrap();
            assert_eq!(&got, expected);
        }
        assert!(matches!(read_frame(&mut server).await, Err(ReadFrameError::Eof)));
    }

    #[tokio::test]
    async fn unknown_frame_is_skipped_without_poisoning() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        // A well-framed frame with a tag outside the protocol, then a real
        // frame behind it.
        client.write_all(&[0x80 | 0x11, 0x02, 0xAA, 0xBB]).await.unwrap();
        write_frame(&mut client, &Frame::Goaway(GoawayFrame::new("after"))).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ReadFrameError::UnknownFrame { tag: 0x11, len: 2 }));

        let got = read_frame(&mut server).await.unwrap();
        assert_eq!(got, Frame::Goaway(GoawayFrame::new("after")));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncation() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let wire = Frame::Goaway(GoawayFrame::new("half")).encode();
        client.write_all(&wire[..wire.len() - 2]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ReadFrameError::Protocol(ProtocolError::Truncated)));
    }

    #[tokio::test]
    async fn sub_frame_tag_at_top_level_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x2F, 0x00]).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ReadFrameError::Protocol(ProtocolError::NotTopLevel(0x2F))));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut wire = vec![0x80 | 0x3F];
        // varint for 2^40: far over the cap
        wire.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x40]);
        client.write_all(&wire).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ReadFrameError::Protocol(ProtocolError::FrameTooLarge { .. })));
    }
}
