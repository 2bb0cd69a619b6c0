//! Host/guest command coordination.
//!
//! The coordinator owns one peer's view of the protocol: who the host is,
//! which commands have been seen and applied, and whether a resync is in
//! flight. It feeds validated commands into the [`RecordingMachine`], which
//! it also owns, so every mutation happens on the caller's single task.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dedup::ExpiringSet;
use super::host::HostLatch;
use super::log::{BroadcastLog, DEFAULT_CAPACITY};
use super::messages::{self, Command, CommandType, ControlMessage, WireMessage};
use crate::capture::CaptureEvent;
use crate::clock::LogicalMs;
use crate::error::{BroadcastError, WireError};
use crate::recording::{PeerRole, RecordingMachine, SessionStatus};
use crate::transport::{PeerId, Transport, TransportEvent};

#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub log_capacity: usize,
    pub resync_timeout: Duration,
    pub dedup_ttl: Duration,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_CAPACITY,
            resync_timeout: Duration::from_millis(2000),
            dedup_ttl: Duration::from_secs(60),
        }
    }
}

/// What happened to a received command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Duplicate,
    /// Issued by someone other than the latched host.
    ForeignHost,
    /// Claimed issuer is not the sender, or the local peer is the host.
    Unauthorized,
    /// Already covered by `last_applied`.
    Stale,
    /// Sequence skipped ahead; a resync was requested instead.
    Gap,
}

pub struct Coordinator<T: Transport> {
    transport: T,
    machine: RecordingMachine,
    settings: ProtocolSettings,
    role: PeerRole,
    host: HostLatch,
    seen: ExpiringSet,
    log: BroadcastLog,
    next_seq: u64,
    last_applied: u64,
    sync_deadline: Option<Instant>,
    sync_wanted: bool,
    /// Highest sequence seen past a gap; resync is done once applied up to it.
    gap_target: u64,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: T, machine: RecordingMachine, settings: ProtocolSettings) -> Self {
        Self {
            seen: ExpiringSet::new(settings.dedup_ttl),
            log: BroadcastLog::new(settings.log_capacity),
            transport,
            machine,
            settings,
            role: PeerRole::Detached,
            host: HostLatch::default(),
            next_seq: 1,
            last_applied: 0,
            sync_deadline: None,
            sync_wanted: false,
            gap_target: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn machine(&self) -> &RecordingMachine {
        &self.machine
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == PeerRole::Host
    }

    pub fn host(&self) -> Option<&PeerId> {
        self.host.current()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log(&self) -> &BroadcastLog {
        &self.log
    }

    pub fn sync_in_flight(&self) -> bool {
        self.sync_deadline.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            local_peer: Some(self.transport.local_peer()),
            role: self.role,
            host: self.host.current().cloned(),
            state: self.machine.state(),
            start_ts: self.machine.start_ts(),
            stop_ts: self.machine.stop_ts(),
            last_applied: self.last_applied,
            tracks: self.machine.tracks().iter().map(|t| t.snapshot()).collect(),
            sidecar_file: self.machine.sidecar().map(|s| s.file_name.clone()),
            last_error: self.machine.last_error().map(str::to_string),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Joined => self.on_joined(),
            TransportEvent::Left => self.on_left(),
            TransportEvent::PeerJoined { peer, moderator } => self.on_peer_joined(&peer, moderator),
            TransportEvent::PeerLeft { peer } => self.on_peer_left(&peer),
            TransportEvent::TrackAdded(descriptor) => self.machine.register_track(descriptor),
            TransportEvent::TrackRemoved { track_id } => self.machine.unregister_track(&track_id),
            TransportEvent::Message { from, payload } => self.on_message(&from, &payload),
        }
    }

    pub fn handle_capture_event(&mut self, event: CaptureEvent) {
        self.machine.handle_capture_event(event);
    }

    fn on_joined(&mut self) {
        self.clear_protocol_state();
        let local = self.transport.local_peer();

        if self.transport.is_moderator() {
            self.role = PeerRole::Host;
            self.host.latch(&local);
            info!("Joined as host ({})", local);
            return;
        }

        self.role = PeerRole::Guest;
        info!("Joined as guest ({})", local);
        if let Some(host) = self.transport.moderators().into_iter().next() {
            self.host.latch(&host);
            info!("Latched host {} from room membership", host);
            self.request_sync();
        }
    }

    fn on_left(&mut self) {
        info!("Left session");
        self.clear_protocol_state();
        self.role = PeerRole::Detached;
        self.machine.reset();
    }

    fn clear_protocol_state(&mut self) {
        self.host.clear();
        self.seen.clear();
        self.log.clear();
        self.next_seq = 1;
        self.last_applied = 0;
        self.sync_deadline = None;
        self.sync_wanted = false;
        self.gap_target = 0;
    }

    fn on_peer_joined(&mut self, peer: &PeerId, moderator: bool) {
        match self.role {
            PeerRole::Host => self.introduce_host(peer),
            PeerRole::Guest if moderator => {
                if self.host.latch(peer) {
                    info!("Latched host {} on arrival", peer);
                    self.request_sync();
                } else if !self.host.is(peer) {
                    debug!("Ignoring second moderator {}", peer);
                }
            }
            _ => {}
        }
    }

    /// Announce ourselves to a new peer and replay the full log to it.
    fn introduce_host(&mut self, peer: &PeerId) {
        let host_id = self.transport.local_peer();
        let events = self.log.all();
        debug!("Introducing host to {} with {} logged commands", peer, events.len());

        self.send_control(
            peer,
            ControlMessage::HostInfo {
                host_id: host_id.clone(),
            },
        );
        self.send_control(peer, ControlMessage::SyncResponse { host_id, events });
    }

    fn on_peer_left(&mut self, peer: &PeerId) {
        if self.role != PeerRole::Guest || !self.host.is(peer) {
            return;
        }

        warn!("Host {} left, resetting recording state", peer);
        self.host.clear();
        self.last_applied = 0;
        self.sync_deadline = None;
        self.sync_wanted = false;
        self.gap_target = 0;
        self.machine.reset();
    }

    fn on_message(&mut self, from: &PeerId, payload: &serde_json::Value) {
        let message = match messages::decode(payload) {
            Ok(message) => message,
            Err(WireError::NoEnvelope) => return,
            Err(e) => {
                debug!("Dropping message from {}: {}", from, e);
                return;
            }
        };

        match message {
            WireMessage::Command(command) => {
                self.on_command_received(from, command);
            }
            WireMessage::Control(ControlMessage::SyncRequest { last_event_id }) => {
                self.on_sync_request(from, last_event_id)
            }
            WireMessage::Control(ControlMessage::SyncResponse { host_id, events }) => {
                self.on_sync_response(from, &host_id, events)
            }
            WireMessage::Control(ControlMessage::HostInfo { host_id }) => {
                self.on_host_info(from, &host_id)
            }
        }
    }

    /// Run a command received from `from` through the acceptance rules.
    pub fn on_command_received(&mut self, from: &PeerId, command: Command) -> CommandOutcome {
        if self.role != PeerRole::Guest {
            debug!("Ignoring {} from {}: not a guest", command.kind.as_str(), from);
            return CommandOutcome::Unauthorized;
        }

        let issuer = command.issuer(from);
        if issuer != *from {
            debug!(
                "Ignoring command {} from {} claiming host {}",
                command.id, from, issuer
            );
            return CommandOutcome::Unauthorized;
        }

        self.accept(command, &issuer)
    }

    fn accept(&mut self, command: Command, issuer: &PeerId) -> CommandOutcome {
        if self.seen.contains(&command.id) {
            debug!("Duplicate command {}", command.id);
            return CommandOutcome::Duplicate;
        }
        if !self.host.admits(issuer) {
            debug!(
                "Rejecting command {} from {}: host is {:?}",
                command.id,
                issuer,
                self.host.current()
            );
            return CommandOutcome::ForeignHost;
        }
        if self.host.latch(issuer) {
            info!("Latched host {} from first accepted command", issuer);
        }

        let now = Instant::now();
        if command.seq <= self.last_applied {
            self.seen.insert(&command.id, now);
            debug!(
                "Stale command {} (seq {} <= {})",
                command.id, command.seq, self.last_applied
            );
            return CommandOutcome::Stale;
        }
        if command.seq > self.last_applied.saturating_add(1) {
            debug!(
                "Sequence gap: got {}, expected {}",
                command.seq,
                self.last_applied.saturating_add(1)
            );
            self.gap_target = self.gap_target.max(command.seq);
            self.request_sync();
            return CommandOutcome::Gap;
        }

        self.seen.insert(&command.id, now);
        self.last_applied = command.seq;
        self.apply(&command);
        CommandOutcome::Applied
    }

    fn apply(&mut self, command: &Command) {
        info!(
            "Applying {} seq {} at {}",
            command.kind.as_str(),
            command.seq,
            command.ts
        );
        match command.kind {
            CommandType::Start => self.machine.start_recording(Some(command.ts)),
            CommandType::Stop => self.machine.stop_recording(Some(command.ts)),
        }
    }

    fn on_sync_request(&mut self, from: &PeerId, last_event_id: u64) {
        if self.role != PeerRole::Host {
            debug!("Ignoring sync request from {}: not host", from);
            return;
        }

        let events = self.log.since(last_event_id);
        debug!(
            "Answering sync request from {} after {} with {} commands",
            from,
            last_event_id,
            events.len()
        );
        let host_id = self.transport.local_peer();
        self.send_control(from, ControlMessage::SyncResponse { host_id, events });
    }

    fn on_sync_response(&mut self, from: &PeerId, host_id: &PeerId, mut events: Vec<Command>) {
        if self.role != PeerRole::Guest {
            return;
        }
        if from != host_id {
            debug!("Ignoring sync response from {} on behalf of {}", from, host_id);
            return;
        }
        if !self.host.admits(host_id) {
            debug!("Ignoring sync response from non-host {}", host_id);
            return;
        }
        self.host.latch(host_id);

        events.sort_by_key(|c| c.seq);
        events.dedup_by_key(|c| c.seq);

        if let Some(first) = events.iter().find(|c| c.issuer(host_id) == *host_id) {
            if first.seq > self.last_applied.saturating_add(1) {
                warn!(
                    "Host log starts at seq {} but last applied is {}, skipping ahead",
                    first.seq, self.last_applied
                );
                self.last_applied = first.seq - 1;
            }
        }

        let count = events.len();
        for command in events {
            if command.issuer(host_id) != *host_id {
                continue;
            }
            self.accept(command, host_id);
        }
        debug!(
            "Resync from {} processed {} commands, last applied {}",
            host_id, count, self.last_applied
        );

        if self.last_applied >= self.gap_target {
            self.gap_target = 0;
            self.sync_deadline = None;
            self.sync_wanted = false;
        } else {
            // request stays outstanding and is re-issued on timeout
            debug!(
                "Resync left seq {} unresolved, last applied {}",
                self.gap_target, self.last_applied
            );
        }
    }

    fn on_host_info(&mut self, from: &PeerId, host_id: &PeerId) {
        if self.role != PeerRole::Guest || from != host_id {
            return;
        }
        if self.host.latch(host_id) {
            info!("Latched host {} from announcement", host_id);
            self.request_sync();
        } else if !self.host.is(host_id) {
            debug!("Ignoring host announcement from {}", host_id);
        }
    }

    /// Ask the latched host for everything after `last_applied`.
    ///
    /// At most one request is in flight; a timed-out one is re-issued on tick.
    pub fn request_sync(&mut self) {
        self.sync_wanted = true;
        if self.sync_deadline.is_some() {
            return;
        }
        let Some(host) = self.host.current().cloned() else {
            debug!("Resync wanted but no host is known");
            return;
        };

        debug!("Requesting resync from {} after {}", host, self.last_applied);
        self.send_control(
            &host,
            ControlMessage::SyncRequest {
                last_event_id: self.last_applied,
            },
        );
        self.sync_deadline = Some(Instant::now() + self.settings.resync_timeout);
    }

    /// Periodic deadline checks: idempotency pruning and resync timeouts.
    pub fn tick(&mut self) {
        let now = Instant::now();

        let pruned = self.seen.prune(now);
        if pruned > 0 {
            debug!("Pruned {} expired command ids", pruned);
        }

        if let Some(deadline) = self.sync_deadline {
            if now >= deadline {
                self.sync_deadline = None;
                if self.sync_wanted {
                    warn!("Resync request timed out, retrying");
                    self.request_sync();
                }
            }
        }
    }

    /// Issue a recording command to every peer. Host only.
    pub fn broadcast_command(
        &mut self,
        kind: CommandType,
        ts: Option<LogicalMs>,
    ) -> Result<Command, BroadcastError> {
        if !self.transport.is_joined() {
            return Err(BroadcastError::NotJoined);
        }
        if self.role != PeerRole::Host {
            return Err(BroadcastError::NotHost);
        }

        let command = Command {
            id: Uuid::new_v4().to_string(),
            kind,
            seq: self.next_seq,
            ts: ts.unwrap_or_else(|| self.machine.now()),
            host_id: Some(self.transport.local_peer()),
        };
        let payload = messages::encode(&WireMessage::Command(command.clone()))?;

        self.next_seq += 1;
        self.log.push(command.clone());
        self.seen.insert(&command.id, Instant::now());
        self.last_applied = command.seq;
        self.apply(&command);

        if let Err(e) = self.transport.broadcast(payload) {
            warn!("Broadcast of {} incomplete: {}", command.id, e);
        }
        Ok(command)
    }

    fn send_control(&self, to: &PeerId, message: ControlMessage) {
        let payload = match messages::encode(&WireMessage::Control(message)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode control message for {}: {}", to, e);
                return;
            }
        };
        if let Err(e) = self.transport.send(to, payload) {
            warn!("Failed to send control message to {}: {}", to, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::ScriptedFactory;
    use crate::clock::{ClockAligner, ManualClock};
    use crate::error::TransportError;
    use crate::recording::{CaptureSettings, SessionState};
    use crate::transport::{MediaKind, TrackDescriptor};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type Outbox = Arc<Mutex<Vec<(PeerId, Value)>>>;

    struct FakeTransport {
        local: PeerId,
        moderator: bool,
        joined: bool,
        moderators: Vec<PeerId>,
        peers: Vec<PeerId>,
        outbox: Outbox,
    }

    impl Transport for FakeTransport {
        fn local_peer(&self) -> PeerId {
            self.local.clone()
        }

        fn is_joined(&self) -> bool {
            self.joined
        }

        fn is_moderator(&self) -> bool {
            self.moderator
        }

        fn moderators(&self) -> Vec<PeerId> {
            self.moderators.clone()
        }

        fn peers(&self) -> Vec<PeerId> {
            self.peers.clone()
        }

        fn send(&self, to: &PeerId, payload: Value) -> Result<(), TransportError> {
            self.outbox.lock().push((to.clone(), payload));
            Ok(())
        }
    }

    fn host_id() -> PeerId {
        PeerId::from("host")
    }

    fn peer(local: &str, moderator: bool, moderators: &[&str]) -> (Coordinator<FakeTransport>, Outbox) {
        let outbox = Outbox::default();
        let transport = FakeTransport {
            local: PeerId::from(local),
            moderator,
            joined: true,
            moderators: moderators.iter().map(|m| PeerId::from(*m)).collect(),
            peers: vec![PeerId::from("g1"), PeerId::from("g2")],
            outbox: outbox.clone(),
        };

        let (capture_tx, _capture_rx) = mpsc::unbounded_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let machine = RecordingMachine::new(
            "room",
            CaptureSettings::default(),
            Box::new(ScriptedFactory::default()),
            ClockAligner::new(Arc::new(ManualClock::new(10_000))),
            capture_tx,
            events_tx,
        )
        .unwrap();

        let mut coordinator = Coordinator::new(transport, machine, ProtocolSettings::default());
        coordinator.handle_transport_event(TransportEvent::Joined);
        coordinator.handle_transport_event(TransportEvent::TrackAdded(TrackDescriptor {
            track_id: format!("{local}-a0"),
            participant_id: PeerId::from(local),
            display_name: local.to_string(),
            kind: MediaKind::Audio,
            is_local: true,
        }));
        (coordinator, outbox)
    }

    fn guest() -> (Coordinator<FakeTransport>, Outbox) {
        peer("g1", false, &[])
    }

    fn command(seq: u64, kind: CommandType) -> Command {
        Command {
            id: format!("cmd-{seq}"),
            kind,
            seq,
            ts: 1_000 * seq as LogicalMs,
            host_id: Some(host_id()),
        }
    }

    fn script() -> Vec<Command> {
        vec![
            command(1, CommandType::Start),
            command(2, CommandType::Stop),
            command(3, CommandType::Start),
        ]
    }

    fn sent(outbox: &Outbox) -> Vec<(PeerId, WireMessage)> {
        outbox
            .lock()
            .iter()
            .map(|(to, payload)| (to.clone(), messages::decode(payload).unwrap()))
            .collect()
    }

    fn sync_requests(outbox: &Outbox) -> Vec<u64> {
        sent(outbox)
            .into_iter()
            .filter_map(|(_, m)| match m {
                WireMessage::Control(ControlMessage::SyncRequest { last_event_id }) => {
                    Some(last_event_id)
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_host_broadcast_applies_locally_and_fans_out() {
        let (mut host, outbox) = peer("host", true, &[]);
        assert!(host.is_host());

        let start = host.broadcast_command(CommandType::Start, Some(1_000)).unwrap();
        assert_eq!(start.seq, 1);
        assert_eq!(start.host_id, Some(host_id()));
        assert_eq!(host.machine().state(), SessionState::Recording);
        assert_eq!(host.machine().start_ts(), Some(1_000));

        let stop = host.broadcast_command(CommandType::Stop, Some(5_000)).unwrap();
        assert_eq!(stop.seq, 2);
        assert_eq!(host.last_applied(), 2);
        assert_eq!(host.log().len(), 2);

        let recipients: Vec<PeerId> = sent(&outbox).into_iter().map(|(to, _)| to).collect();
        assert_eq!(recipients.len(), 4);
        assert!(recipients.contains(&PeerId::from("g1")));
        assert!(recipients.contains(&PeerId::from("g2")));
    }

    #[tokio::test]
    async fn test_broadcast_requires_host_and_membership() {
        let (mut guest, _) = guest();
        assert!(matches!(
            guest.broadcast_command(CommandType::Start, None),
            Err(BroadcastError::NotHost)
        ));

        let (mut host, _) = peer("host", true, &[]);
        host.transport.joined = false;
        assert!(matches!(
            host.broadcast_command(CommandType::Start, None),
            Err(BroadcastError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applies_once() {
        let (mut guest, _) = guest();
        let start = command(1, CommandType::Start);

        assert_eq!(
            guest.on_command_received(&host_id(), start.clone()),
            CommandOutcome::Applied
        );
        assert_eq!(
            guest.on_command_received(&host_id(), start),
            CommandOutcome::Duplicate
        );
        assert_eq!(guest.last_applied(), 1);
        assert_eq!(guest.machine().state(), SessionState::Recording);
        assert_eq!(guest.host(), Some(&host_id()));
    }

    #[tokio::test]
    async fn test_latched_host_rejects_other_issuers() {
        let (mut guest, _) = guest();
        guest.on_command_received(&host_id(), command(1, CommandType::Start));

        let intruder = PeerId::from("g2");
        let mut forged = command(2, CommandType::Stop);
        forged.id = "forged".to_string();
        forged.host_id = Some(intruder.clone());
        assert_eq!(
            guest.on_command_received(&intruder, forged),
            CommandOutcome::ForeignHost
        );

        let mut spoofed = command(2, CommandType::Stop);
        spoofed.id = "spoofed".to_string();
        assert_eq!(
            guest.on_command_received(&intruder, spoofed),
            CommandOutcome::Unauthorized
        );

        assert_eq!(guest.machine().state(), SessionState::Recording);
        assert_eq!(guest.last_applied(), 1);
    }

    #[tokio::test]
    async fn test_gap_requests_resync_instead_of_applying() {
        let (mut guest, outbox) = guest();
        guest.on_command_received(&host_id(), command(1, CommandType::Start));

        assert_eq!(
            guest.on_command_received(&host_id(), command(3, CommandType::Start)),
            CommandOutcome::Gap
        );
        assert_eq!(guest.last_applied(), 1);
        assert!(guest.sync_in_flight());
        assert_eq!(sync_requests(&outbox), vec![1]);

        // a second gap does not stack another request
        guest.on_command_received(&host_id(), command(4, CommandType::Stop));
        assert_eq!(sync_requests(&outbox).len(), 1);

        guest.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: messages::encode(&WireMessage::Control(ControlMessage::SyncResponse {
                host_id: host_id(),
                events: vec![
                    command(2, CommandType::Stop),
                    command(3, CommandType::Start),
                    command(4, CommandType::Stop),
                ],
            }))
            .unwrap(),
        });
        assert_eq!(guest.last_applied(), 4);
        assert!(!guest.sync_in_flight());
        assert_eq!(guest.machine().state(), SessionState::Stopping);
        assert_eq!(guest.machine().start_ts(), Some(3_000));
        assert_eq!(guest.machine().stop_ts(), Some(4_000));
    }

    #[tokio::test]
    async fn test_every_delivery_order_converges() {
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let (mut guest, _) = guest();
            let commands = script();
            for index in order {
                guest.on_command_received(&host_id(), commands[index].clone());
            }

            // host answers whatever resync is still outstanding
            let after = guest.last_applied();
            let events: Vec<Command> = commands.iter().filter(|c| c.seq > after).cloned().collect();
            guest.on_sync_response(&host_id(), &host_id(), events);

            assert_eq!(guest.last_applied(), 3, "order {order:?}");
            assert_eq!(guest.machine().state(), SessionState::Recording, "order {order:?}");
            assert_eq!(guest.machine().start_ts(), Some(3_000), "order {order:?}");
        }
    }

    #[tokio::test]
    async fn test_late_guest_catches_up_from_host_log() {
        let (mut host, host_outbox) = peer("host", true, &[]);
        host.broadcast_command(CommandType::Start, Some(1_000)).unwrap();
        host.broadcast_command(CommandType::Stop, Some(2_000)).unwrap();
        host.broadcast_command(CommandType::Start, Some(3_000)).unwrap();
        host_outbox.lock().clear();

        let (mut late, late_outbox) = peer("late", false, &["host"]);
        assert_eq!(late.host(), Some(&host_id()));
        assert_eq!(sync_requests(&late_outbox), vec![0]);

        host.handle_transport_event(TransportEvent::Message {
            from: PeerId::from("late"),
            payload: late_outbox.lock()[0].1.clone(),
        });
        let (to, response) = host_outbox.lock()[0].clone();
        assert_eq!(to, PeerId::from("late"));

        late.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: response,
        });
        assert_eq!(late.last_applied(), 3);
        assert_eq!(late.machine().state(), SessionState::Recording);
    }

    #[tokio::test]
    async fn test_host_introduces_itself_to_new_peers() {
        let (mut host, outbox) = peer("host", true, &[]);
        host.broadcast_command(CommandType::Start, Some(1_000)).unwrap();
        outbox.lock().clear();

        host.handle_transport_event(TransportEvent::PeerJoined {
            peer: PeerId::from("g3"),
            moderator: false,
        });

        let messages = sent(&outbox);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0].1,
            WireMessage::Control(ControlMessage::HostInfo { host_id }) if *host_id == PeerId::from("host")
        ));
        assert!(matches!(
            &messages[1].1,
            WireMessage::Control(ControlMessage::SyncResponse { events, .. }) if events.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_host_info_latches_and_requests_sync() {
        let (mut guest, outbox) = guest();
        guest.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: messages::encode(&WireMessage::Control(ControlMessage::HostInfo {
                host_id: host_id(),
            }))
            .unwrap(),
        });
        assert_eq!(guest.host(), Some(&host_id()));
        assert_eq!(sync_requests(&outbox), vec![0]);
    }

    #[tokio::test]
    async fn test_sync_response_skips_ahead_past_trimmed_log() {
        let (mut guest, _) = guest();
        let events = vec![
            command(51, CommandType::Start),
            command(52, CommandType::Stop),
        ];
        guest.on_sync_response(&host_id(), &host_id(), events);

        assert_eq!(guest.last_applied(), 52);
        assert_eq!(guest.machine().state(), SessionState::Stopping);
    }

    #[tokio::test]
    async fn test_host_departure_resets_guest() {
        let (mut guest, _) = guest();
        guest.on_command_received(&host_id(), command(1, CommandType::Start));

        guest.handle_transport_event(TransportEvent::PeerLeft { peer: PeerId::from("g2") });
        assert_eq!(guest.machine().state(), SessionState::Recording);

        guest.handle_transport_event(TransportEvent::PeerLeft { peer: host_id() });
        assert!(guest.host().is_none());
        assert_eq!(guest.last_applied(), 0);
        assert_eq!(guest.machine().state(), SessionState::Idle);
        assert!(guest.machine().tracks().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_payloads_are_ignored() {
        let (mut guest, outbox) = guest();
        guest.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: serde_json::json!({"chat": "hi"}),
        });
        guest.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: serde_json::json!({"hotpod": {"kind": "nonsense"}}),
        });
        assert_eq!(guest.machine().state(), SessionState::Idle);
        assert!(outbox.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_retries_after_timeout() {
        let (mut guest, outbox) = peer("g1", false, &["host"]);
        assert_eq!(sync_requests(&outbox).len(), 1);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        guest.tick();
        assert_eq!(sync_requests(&outbox).len(), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        guest.tick();
        assert_eq!(sync_requests(&outbox).len(), 2);
        assert!(guest.sync_in_flight());

        guest.on_sync_response(&host_id(), &host_id(), Vec::new());
        tokio::time::advance(Duration::from_secs(5)).await;
        guest.tick();
        assert_eq!(sync_requests(&outbox).len(), 2);
        assert!(!guest.sync_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhelpful_sync_response_keeps_resync_pending() {
        let (mut guest, outbox) = guest();
        guest.on_command_received(&host_id(), command(1, CommandType::Start));
        assert_eq!(
            guest.on_command_received(&host_id(), command(3, CommandType::Start)),
            CommandOutcome::Gap
        );
        assert_eq!(sync_requests(&outbox).len(), 1);

        // a replay that predates the gap does not close it
        guest.on_sync_response(&host_id(), &host_id(), vec![command(1, CommandType::Start)]);
        assert_eq!(guest.last_applied(), 1);
        assert!(guest.sync_in_flight());

        tokio::time::advance(Duration::from_secs(10)).await;
        guest.tick();
        assert_eq!(sync_requests(&outbox), vec![1, 1]);
        assert!(guest.sync_in_flight());

        guest.on_sync_response(&host_id(), &host_id(), script()[1..].to_vec());
        assert_eq!(guest.last_applied(), 3);
        assert!(!guest.sync_in_flight());

        tokio::time::advance(Duration::from_secs(10)).await;
        guest.tick();
        assert_eq!(sync_requests(&outbox).len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_is_dropped() {
        let (mut guest, outbox) = guest();
        guest.handle_transport_event(TransportEvent::Message {
            from: host_id(),
            payload: serde_json::json!({"hotpod": {
                "id": "x", "type": "REC_START", "seq": 1, "ts": i64::MIN, "hostId": "host"
            }}),
        });

        assert_eq!(guest.last_applied(), 0);
        assert_eq!(guest.machine().state(), SessionState::Idle);
        assert!(outbox.lock().is_empty());

        assert_eq!(
            guest.on_command_received(&host_id(), command(1, CommandType::Start)),
            CommandOutcome::Applied
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_ids_expire_after_ttl() {
        let (mut guest, _) = guest();
        let start = command(1, CommandType::Start);
        guest.on_command_received(&host_id(), start.clone());

        tokio::time::advance(Duration::from_secs(61)).await;
        guest.tick();

        // forgotten id is still stale by sequence
        assert_eq!(
            guest.on_command_received(&host_id(), start),
            CommandOutcome::Stale
        );
    }
}
