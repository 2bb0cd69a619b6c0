//! Interface to the real-time media transport.
//!
//! The transport owns room membership, peer discovery, moderator capability
//! and the opaque peer-messaging facility. The engine only sees the events it
//! emits and the handful of calls declared on [`Transport`].

pub mod loopback;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;

pub use loopback::{LoopbackNetwork, LoopbackTransport};

/// Opaque peer identity assigned by the transport for one membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A media track made visible to this peer, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub track_id: String,
    pub participant_id: PeerId,
    pub display_name: String,
    pub kind: MediaKind,
    pub is_local: bool,
}

/// Events the transport delivers to a peer's session, in delivery order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Joined,
    Left,
    PeerJoined { peer: PeerId, moderator: bool },
    PeerLeft { peer: PeerId },
    TrackAdded(TrackDescriptor),
    TrackRemoved { track_id: String },
    Message { from: PeerId, payload: serde_json::Value },
}

/// Calls the engine makes into the transport.
///
/// Delivery through `send`/`broadcast` is at-most-once and unordered.
pub trait Transport: Send {
    fn local_peer(&self) -> PeerId;

    fn is_joined(&self) -> bool;

    /// Whether the local peer held moderator capability when it joined.
    fn is_moderator(&self) -> bool;

    /// Remote peers currently reported as moderators.
    fn moderators(&self) -> Vec<PeerId>;

    /// Remote peers currently in the room.
    fn peers(&self) -> Vec<PeerId>;

    fn send(&self, to: &PeerId, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Send to every remote peer, attempting all of them even if one fails.
    fn broadcast(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        let mut first_error = None;
        for peer in self.peers() {
            if let Err(e) = self.send(&peer, payload.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
