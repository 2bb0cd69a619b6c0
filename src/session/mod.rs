//! One peer's serialized event loop.
//!
//! Transport events, capture reports, local start/stop requests and the
//! periodic tick all funnel into a single task that owns the
//! [`Coordinator`]. Nothing else mutates protocol or recording state.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::capture::{CaptureEvent, CaptureFactory};
use crate::clock::{ClockAligner, LogicalMs, MonotonicClock};
use crate::error::BroadcastError;
use crate::protocol::{Command, CommandType, Coordinator, ProtocolSettings};
use crate::recording::{
    CaptureSettings, RecordingEvent, RecordingMachine, SessionStatus, SessionStatusHandle,
};
use crate::transport::{Transport, TransportEvent};

/// Everything a peer session needs besides its transport and capture factory.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub room: String,
    pub domain: Option<String>,
    pub capture: CaptureSettings,
    pub protocol: ProtocolSettings,
    pub tick_interval: Duration,
}

impl SessionOptions {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            domain: None,
            capture: CaptureSettings::default(),
            protocol: ProtocolSettings::default(),
            tick_interval: Duration::from_millis(250),
        }
    }
}

enum SessionCommand {
    Broadcast {
        kind: CommandType,
        ts: Option<LogicalMs>,
        reply: oneshot::Sender<Result<Command, BroadcastError>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running peer session.
#[derive(Clone)]
pub struct PeerSessionHandle {
    tx: UnboundedSender<SessionCommand>,
    status: SessionStatusHandle,
}

impl PeerSessionHandle {
    pub async fn start_recording(&self, ts: Option<LogicalMs>) -> Result<Command> {
        self.broadcast(CommandType::Start, ts).await
    }

    pub async fn stop_recording(&self, ts: Option<LogicalMs>) -> Result<Command> {
        self.broadcast(CommandType::Stop, ts).await
    }

    async fn broadcast(&self, kind: CommandType, ts: Option<LogicalMs>) -> Result<Command> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Broadcast { kind, ts, reply })
            .map_err(|_| anyhow!("peer session is not running"))?;
        let command = rx
            .await
            .map_err(|_| anyhow!("peer session stopped before answering"))??;
        Ok(command)
    }

    pub async fn status(&self) -> SessionStatus {
        self.status.get().await
    }

    pub fn status_handle(&self) -> SessionStatusHandle {
        self.status.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SessionCommand::Shutdown);
    }
}

/// A spawned peer session.
pub struct SpawnedSession {
    pub handle: PeerSessionHandle,
    /// Recording notifications, closed when the session task ends.
    pub events: UnboundedReceiver<RecordingEvent>,
    pub task: JoinHandle<()>,
}

pub struct PeerSession<T: Transport> {
    coordinator: Coordinator<T>,
    status: SessionStatusHandle,
    tick_interval: Duration,
}

impl<T: Transport + 'static> PeerSession<T> {
    /// Build the recording stack for one peer and run it on its own task.
    pub fn spawn(
        transport: T,
        transport_rx: UnboundedReceiver<TransportEvent>,
        factory: Box<dyn CaptureFactory>,
        clock: Arc<dyn MonotonicClock>,
        options: SessionOptions,
    ) -> Result<SpawnedSession> {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let mut machine = RecordingMachine::new(
            options.room.clone(),
            options.capture,
            factory,
            ClockAligner::new(clock),
            capture_tx,
            events_tx,
        )?;
        if let Some(domain) = options.domain {
            machine = machine.with_domain(domain);
        }

        let status = SessionStatusHandle::default();
        let session = PeerSession {
            coordinator: Coordinator::new(transport, machine, options.protocol),
            status: status.clone(),
            tick_interval: options.tick_interval,
        };

        let task = tokio::spawn(session.run(transport_rx, capture_rx, control_rx));

        Ok(SpawnedSession {
            handle: PeerSessionHandle {
                tx: control_tx,
                status,
            },
            events: events_rx,
            task,
        })
    }

    async fn run(
        mut self,
        mut transport_rx: UnboundedReceiver<TransportEvent>,
        mut capture_rx: UnboundedReceiver<CaptureEvent>,
        mut control_rx: UnboundedReceiver<SessionCommand>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let local = self.coordinator.transport().local_peer();
        debug!("Peer session {} running", local);

        loop {
            tokio::select! {
                event = transport_rx.recv() => match event {
                    Some(event) => self.coordinator.handle_transport_event(event),
                    None => {
                        info!("Transport for {} closed", local);
                        break;
                    }
                },
                Some(event) = capture_rx.recv() => self.coordinator.handle_capture_event(event),
                command = control_rx.recv() => match command {
                    Some(SessionCommand::Broadcast { kind, ts, reply }) => {
                        let _ = reply.send(self.coordinator.broadcast_command(kind, ts));
                    }
                    Some(SessionCommand::Shutdown) | None => {
                        info!("Peer session {} shutting down", local);
                        break;
                    }
                },
                _ = ticker.tick() => self.coordinator.tick(),
            }

            self.status.publish(self.coordinator.status()).await;
        }

        self.status.publish(self.coordinator.status()).await;
    }
}
