//! In-process transport connecting several peers through shared channels.
//!
//! Used by `hotpod simulate` and the integration tests. Membership events are
//! always delivered; peer messages can be dropped at a configurable rate to
//! exercise the resync path.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use super::{MediaKind, PeerId, TrackDescriptor, Transport, TransportEvent};
use crate::error::TransportError;

struct PeerSlot {
    moderator: bool,
    tracks: Vec<TrackDescriptor>,
    events: UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct NetworkState {
    peers: BTreeMap<PeerId, PeerSlot>,
    drop_rate: f64,
    dropped: u64,
}

/// Shared room that loopback transports join.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop each peer message with probability `rate` (clamped to `0.0..=1.0`).
    pub fn with_drop_rate(self, rate: f64) -> Self {
        self.set_drop_rate(rate);
        self
    }

    pub fn set_drop_rate(&self, rate: f64) {
        self.state.lock().drop_rate = rate.clamp(0.0, 1.0);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Join the room with one local track per entry in `kinds`.
    ///
    /// The returned receiver yields this peer's transport events, starting
    /// with `Joined`, its own tracks, and every peer already present.
    pub fn join(
        &self,
        display_name: &str,
        moderator: bool,
        kinds: &[MediaKind],
    ) -> (LoopbackTransport, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let peer = PeerId::new(&simple[..8]);

        let tracks: Vec<TrackDescriptor> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| TrackDescriptor {
                track_id: format!("{}-{}{}", peer, &kind.as_str()[..1], i),
                participant_id: peer.clone(),
                display_name: display_name.to_string(),
                kind: *kind,
                is_local: true,
            })
            .collect();

        let mut state = self.state.lock();

        let _ = tx.send(TransportEvent::Joined);
        for track in &tracks {
            let _ = tx.send(TransportEvent::TrackAdded(track.clone()));
        }

        for (other_id, other) in &state.peers {
            let _ = tx.send(TransportEvent::PeerJoined {
                peer: other_id.clone(),
                moderator: other.moderator,
            });
            for track in &other.tracks {
                let _ = tx.send(TransportEvent::TrackAdded(TrackDescriptor {
                    is_local: false,
                    ..track.clone()
                }));
            }

            let _ = other.events.send(TransportEvent::PeerJoined {
                peer: peer.clone(),
                moderator,
            });
            for track in &tracks {
                let _ = other.events.send(TransportEvent::TrackAdded(TrackDescriptor {
                    is_local: false,
                    ..track.clone()
                }));
            }
        }

        state.peers.insert(
            peer.clone(),
            PeerSlot {
                moderator,
                tracks,
                events: tx,
            },
        );

        info!(
            "Loopback: {} joined as {} ({} peers in room)",
            display_name,
            peer,
            state.peers.len()
        );

        let transport = LoopbackTransport {
            network: self.clone(),
            local: peer,
            moderator,
        };
        (transport, rx)
    }

    fn leave(&self, peer: &PeerId) {
        let mut state = self.state.lock();
        let Some(slot) = state.peers.remove(peer) else {
            return;
        };

        let _ = slot.events.send(TransportEvent::Left);
        for other in state.peers.values() {
            for track in &slot.tracks {
                let _ = other.events.send(TransportEvent::TrackRemoved {
                    track_id: track.track_id.clone(),
                });
            }
            let _ = other.events.send(TransportEvent::PeerLeft { peer: peer.clone() });
        }
        info!("Loopback: {} left", peer);
    }

    fn deliver(
        &self,
        from: &PeerId,
        to: &PeerId,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.peers.contains_key(from) {
            return Err(TransportError::NotJoined);
        }

        let drop_rate = state.drop_rate;
        if drop_rate > 0.0 && rand::thread_rng().gen_bool(drop_rate) {
            state.dropped += 1;
            debug!("Loopback: dropped message {} -> {}", from, to);
            return Ok(());
        }

        let slot = state
            .peers
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        slot.events
            .send(TransportEvent::Message {
                from: from.clone(),
                payload,
            })
            .map_err(|_| TransportError::Closed(to.clone()))
    }
}

/// One peer's handle on a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    local: PeerId,
    moderator: bool,
}

impl LoopbackTransport {
    pub fn leave(&self) {
        self.network.leave(&self.local);
    }
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn is_joined(&self) -> bool {
        self.network.state.lock().peers.contains_key(&self.local)
    }

    fn is_moderator(&self) -> bool {
        self.moderator
    }

    fn moderators(&self) -> Vec<PeerId> {
        self.network
            .state
            .lock()
            .peers
            .iter()
            .filter(|(id, slot)| slot.moderator && **id != self.local)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.network
            .state
            .lock()
            .peers
            .keys()
            .filter(|id| **id != self.local)
            .cloned()
            .collect()
    }

    fn send(&self, to: &PeerId, payload: serde_json::Value) -> Result<(), TransportError> {
        self.network.deliver(&self.local, to, payload)
    }
}
