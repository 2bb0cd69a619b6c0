//! Typed failure surfaces of the coordination engine.
//!
//! Protocol-level rejections are not errors here: they are dropped where they
//! are detected. Only failures a caller can act on get a type.

use thiserror::Error;

use crate::transport::PeerId;

/// Why a host could not issue a recording command.
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("only the host may broadcast recording commands")]
    NotHost,

    #[error("session not joined")]
    NotJoined,

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure reported by a capture primitive for a single track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("codec not supported: {0}")]
    UnsupportedCodec(String),

    #[error("capture failed to start: {0}")]
    StartFailed(String),

    #[error("capture is not running")]
    NotRunning,

    #[error("capture backend closed")]
    Closed,
}

/// Failure of the opaque peer-messaging facility.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("transport is not joined")]
    NotJoined,

    #[error("peer channel closed: {0}")]
    Closed(PeerId),
}

/// A payload that could not be decoded into a protocol message.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("payload does not carry a hotpod envelope")]
    NoEnvelope,

    #[error("malformed protocol message: {0}")]
    Malformed(#[from] serde_json::Error),
}
