//! Error kinds of the broker.
//!
//! [`ErrorCode`] values travel as transport application error codes and are
//! part of the wire contract; a peer built against another implementation
//! must agree on them.

use std::{fmt, io};

use thiserror::Error;

/// Application error code carried on transport-level closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ErrorCode {
    /// Uncategorized failure.
    Unknown = 0xC0,
    /// A before-frame hook failed.
    BeforeHandler = 0xC1,
    /// The main frame handler failed.
    MainHandler = 0xC2,
    /// An after-frame hook failed.
    AfterHandler = 0xC3,
    /// DataFrame processing failed.
    Data = 0xC4,
    /// The handshake declared an unknown client type.
    UnknownClient = 0xC5,
    /// The transport reported its closed sentinel.
    Closed = 0xC6,
    /// The client closed cleanly.
    ClientAbort = 0xC7,
    /// Protocol violation, duplicate name or handshake timeout.
    Goaway = 0xC8,
    /// Authentication or ALPN failure.
    Rejected = 0xCC,
}

impl ErrorCode {
    /// The wire value of this code.
    #[must_use]
    pub fn to_u64(self) -> u64 {
        self as u64
    }

    /// Map a wire value back to a code; unrecognized values collapse to
    /// [`ErrorCode::Unknown`].
    #[must_use]
    pub fn parse(value: u64) -> Self {
        match value {
            0xC1 => Self::BeforeHandler,
            0xC2 => Self::MainHandler,
            0xC3 => Self::AfterHandler,
            0xC4 => Self::Data,
            0xC5 => Self::UnknownClient,
            0xC6 => Self::Closed,
            0xC7 => Self::ClientAbort,
            0xC8 => Self::Goaway,
            0xCC => Self::Rejected,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::BeforeHandler => "BeforeHandler",
            Self::MainHandler => "MainHandler",
            Self::AfterHandler => "AfterHandler",
            Self::Data => "Data",
            Self::UnknownClient => "UnknownClient",
            Self::Closed => "Closed",
            Self::ClientAbort => "ClientAbort",
            Self::Goaway => "Goaway",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// Server-level failures that abort `serve` early.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No router configured before serving.
    #[error("server's router is not configured")]
    MissingRouter,

    /// No metadata builder configured before serving.
    #[error("server's metadata builder is not configured")]
    MissingMetadataBuilder,

    /// The transport could not bind.
    #[error("bind listener: {0}")]
    Bind(#[source] io::Error),

    /// The accept loop failed.
    #[error("accept connections: {0}")]
    Accept(#[source] io::Error),
}
