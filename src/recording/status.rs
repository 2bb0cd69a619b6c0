//! Session status types and shared state handle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::machine::SessionState;
use super::track::{TrackSnapshot, TrackState};
use crate::clock::LogicalMs;
use crate::transport::PeerId;

/// Role this peer plays in the command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    #[default]
    Detached,
    Host,
    Guest,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Host => "host",
            Self::Guest => "guest",
        }
    }
}

/// Current session state, readable outside the session loop.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub local_peer: Option<PeerId>,
    pub role: PeerRole,
    pub host: Option<PeerId>,
    pub state: SessionState,
    pub start_ts: Option<LogicalMs>,
    pub stop_ts: Option<LogicalMs>,
    pub last_applied: u64,
    pub tracks: Vec<TrackSnapshot>,
    pub sidecar_file: Option<String>,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn exported_tracks(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Exported)
            .count()
    }

    /// Whether the session has reached a state it will not leave on its own.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, SessionState::Exported | SessionState::Error)
    }
}

/// Thread-safe handle for sharing session state between the session loop and callers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    pub async fn publish(&self, status: SessionStatus) {
        let mut state = self.inner.lock().await;
        *state = status;
    }

    pub async fn set_error(&self, error: String) {
        let mut state = self.inner.lock().await;
        state.state = SessionState::Error;
        state.last_error = Some(error);
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        *state = SessionStatus::default();
    }
}
