//! Session-wide recording state machine.
//!
//! IDLE → RECORDING → STOPPING → EXPORTED, with ERROR reachable from any
//! non-terminal state. Only the command protocol drives transitions; capture
//! reports arrive as [`CaptureEvent`]s on the same serialized event loop.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::naming::FileNamer;
use super::sidecar::{self, SidecarExport};
use super::track::{CaptureContext, ExportedArtifact, TrackEntry, TrackSnapshot, TrackState};
use crate::capture::{CaptureEvent, CaptureEventKind, CaptureFactory};
use crate::clock::{ClockAligner, LogicalMs};
use crate::transport::{MediaKind, TrackDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Stopping,
    Exported,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Exported => "exported",
            SessionState::Error => "error",
        }
    }
}

/// Notifications for observers of the recording (UI, exporters).
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    StateChanged {
        state: SessionState,
        start_ts: Option<LogicalMs>,
        stop_ts: Option<LogicalMs>,
    },
    TrackUpdated(TrackSnapshot),
    ExportReady(ExportedArtifact),
    SidecarReady(SidecarExport),
}

/// How tracks are captured.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub timeslice: Duration,
    pub audio_codecs: Vec<String>,
    pub video_codecs: Vec<String>,
    pub capture_video: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            timeslice: Duration::from_millis(2000),
            audio_codecs: vec![
                "audio/webm;codecs=opus".to_string(),
                "audio/webm".to_string(),
            ],
            video_codecs: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm;codecs=h264,opus".to_string(),
                "video/webm".to_string(),
            ],
            capture_video: false,
        }
    }
}

pub struct RecordingMachine {
    room: String,
    domain: Option<String>,
    settings: CaptureSettings,
    factory: Box<dyn CaptureFactory>,
    capture_tx: UnboundedSender<CaptureEvent>,
    events: UnboundedSender<RecordingEvent>,
    aligner: ClockAligner,
    namer: FileNamer,
    tracks: Vec<TrackEntry>,
    state: SessionState,
    start_ts: Option<LogicalMs>,
    stop_ts: Option<LogicalMs>,
    sidecar: Option<SidecarExport>,
    last_error: Option<String>,
}

impl RecordingMachine {
    pub fn new(
        room: impl Into<String>,
        settings: CaptureSettings,
        factory: Box<dyn CaptureFactory>,
        aligner: ClockAligner,
        capture_tx: UnboundedSender<CaptureEvent>,
        events: UnboundedSender<RecordingEvent>,
    ) -> Result<Self> {
        Ok(Self {
            room: room.into(),
            domain: None,
            settings,
            factory,
            capture_tx,
            events,
            aligner,
            namer: FileNamer::new()?,
            tracks: Vec::new(),
            state: SessionState::Idle,
            start_ts: None,
            stop_ts: None,
            sidecar: None,
            last_error: None,
        })
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn start_ts(&self) -> Option<LogicalMs> {
        self.start_ts
    }

    pub fn stop_ts(&self) -> Option<LogicalMs> {
        self.stop_ts
    }

    pub fn tracks(&self) -> &[TrackEntry] {
        &self.tracks
    }

    pub fn track(&self, track_id: &str) -> Option<&TrackEntry> {
        self.tracks.iter().find(|t| t.track_id() == track_id)
    }

    pub fn sidecar(&self) -> Option<&SidecarExport> {
        self.sidecar.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current time on the logical timeline.
    pub fn now(&self) -> LogicalMs {
        self.aligner.now()
    }

    pub fn register_track(&mut self, descriptor: TrackDescriptor) {
        if descriptor.kind == MediaKind::Video && !self.settings.capture_video {
            debug!("Skipping video track {}", descriptor.track_id);
            return;
        }
        if self.track(&descriptor.track_id).is_some() {
            return;
        }

        info!(
            "Registered {} track {} ({}, {})",
            descriptor.kind.as_str(),
            descriptor.track_id,
            descriptor.display_name,
            if descriptor.is_local { "local" } else { "remote" }
        );
        self.tracks.push(TrackEntry::new(descriptor));

        let index = self.tracks.len() - 1;
        if self.state == SessionState::Recording {
            // late joiners share the session start so all tracks line up
            let ts = self.start_ts.unwrap_or_else(|| self.aligner.now());
            self.start_track(index, ts);
        }
        self.emit_track(index);
    }

    pub fn unregister_track(&mut self, track_id: &str) {
        let Some(index) = self.index_of(track_id) else {
            return;
        };

        let mut entry = self.tracks.remove(index);
        entry.abort();
        info!("Unregistered track {}", track_id);

        self.maybe_complete();
    }

    pub fn start_recording(&mut self, reference: Option<LogicalMs>) {
        if self.state == SessionState::Recording {
            return;
        }

        self.aligner.align(reference);
        let ts = reference.unwrap_or_else(|| self.aligner.now());

        self.state = SessionState::Recording;
        self.start_ts = Some(ts);
        self.stop_ts = None;
        self.sidecar = None;
        self.last_error = None;
        info!(
            "Recording started at {} with {} tracks",
            ts,
            self.tracks.len()
        );
        self.emit_state();

        for index in 0..self.tracks.len() {
            self.start_track(index, ts);
            self.emit_track(index);
        }
    }

    pub fn stop_recording(&mut self, reference: Option<LogicalMs>) {
        if self.state != SessionState::Recording {
            return;
        }

        let ts = reference.unwrap_or_else(|| self.aligner.now());
        self.state = SessionState::Stopping;
        self.stop_ts = Some(ts);
        info!("Recording stopping at {}", ts);
        self.emit_state();

        for index in 0..self.tracks.len() {
            if self.tracks[index].stop_capture(ts) {
                self.emit_track(index);
            }
        }

        self.maybe_complete();
    }

    /// Drop every track and return to IDLE.
    pub fn reset(&mut self) {
        for entry in &mut self.tracks {
            entry.abort();
        }
        self.tracks.clear();
        self.state = SessionState::Idle;
        self.start_ts = None;
        self.stop_ts = None;
        self.sidecar = None;
        self.last_error = None;
        self.aligner.align(None);
        info!("Recording state reset");
        self.emit_state();
    }

    pub fn handle_capture_event(&mut self, event: CaptureEvent) {
        let Some(index) = self.index_of(&event.track_id) else {
            debug!("Capture event for unknown track {}", event.track_id);
            return;
        };
        if self.tracks[index].generation() != event.generation {
            debug!(
                "Stale capture event for {} (generation {} != {})",
                event.track_id,
                event.generation,
                self.tracks[index].generation()
            );
            return;
        }

        let now = self.aligner.now();
        match event.kind {
            CaptureEventKind::Chunk(payload) => {
                self.tracks[index].on_chunk(payload, now);
            }
            CaptureEventKind::Stopped => {
                let artifact = self.tracks[index].finalize(now, &self.room, &self.namer);
                self.emit_track(index);
                if let Some(artifact) = artifact {
                    self.emit(RecordingEvent::ExportReady(artifact));
                }
                self.maybe_complete();
            }
            CaptureEventKind::Failed(reason) => {
                if self.tracks[index].fail(&reason) {
                    self.emit_track(index);
                    self.maybe_complete();
                }
            }
        }
    }

    fn start_track(&mut self, index: usize, ts: LogicalMs) {
        let codecs = match self.tracks[index].descriptor().kind {
            MediaKind::Audio => &self.settings.audio_codecs,
            MediaKind::Video => &self.settings.video_codecs,
        };
        let ctx = CaptureContext {
            factory: &*self.factory,
            events: &self.capture_tx,
            timeslice: self.settings.timeslice,
            codecs,
        };
        self.tracks[index].start_capture(ts, &ctx);
    }

    /// Emit the sidecar once every participating track has exported.
    fn maybe_complete(&mut self) {
        if self.sidecar.is_some() {
            return;
        }
        if self.state != SessionState::Stopping {
            return;
        }

        let participating: Vec<&TrackEntry> = self
            .tracks
            .iter()
            .filter(|t| t.is_participating())
            .collect();
        if participating
            .iter()
            .any(|t| t.state() != TrackState::Exported)
        {
            return;
        }

        if participating.is_empty() {
            self.finish_without_sidecar();
            return;
        }

        match sidecar::assemble(
            &self.room,
            self.domain.as_deref(),
            self.start_ts,
            self.stop_ts,
            participating,
            &self.namer,
        ) {
            Ok(export) => {
                info!(
                    "Session exported: {} ({} tracks)",
                    export.file_name,
                    export.record.tracks.len()
                );
                self.sidecar = Some(export.clone());
                self.state = SessionState::Exported;
                self.emit(RecordingEvent::SidecarReady(export));
                self.emit_state();
            }
            Err(e) => {
                error!("Failed to render sidecar: {}", e);
                self.fail_session(format!("sidecar: {e}"));
            }
        }
    }

    fn finish_without_sidecar(&mut self) {
        if self.tracks.iter().any(|t| t.state() == TrackState::Error) {
            warn!("Recording stopped but no track produced data");
            self.fail_session("no track produced data".to_string());
        } else {
            info!("Recording stopped with no tracks to export");
            self.state = SessionState::Idle;
            self.emit_state();
        }
    }

    fn fail_session(&mut self, reason: String) {
        self.last_error = Some(reason);
        self.state = SessionState::Error;
        self.emit_state();
    }

    fn index_of(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.track_id() == track_id)
    }

    fn emit_track(&self, index: usize) {
        self.emit(RecordingEvent::TrackUpdated(self.tracks[index].snapshot()));
    }

    fn emit_state(&self) {
        self.emit(RecordingEvent::StateChanged {
            state: self.state,
            start_ts: self.start_ts,
            stop_ts: self.stop_ts,
        });
    }

    fn emit(&self, event: RecordingEvent) {
        // observers are optional; a closed channel just means nobody listens
        let _ = self.events.send(event);
    }
}
