//! Per-track capture pipeline.
//!
//! A [`TrackEntry`] owns at most one running capture backend, buffers the
//! encoded chunks it reports, and turns them into an [`ExportedArtifact`] once
//! the backend signals completion.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::naming::FileNamer;
use crate::capture::{self, CaptureBackend, CaptureEvent, CaptureFactory, CaptureSink};
use crate::clock::LogicalMs;
use crate::error::CaptureError;
use crate::transport::{MediaKind, PeerId, TrackDescriptor};

pub const NO_DATA_REASON: &str = "no data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Idle,
    Recording,
    Stopping,
    Exported,
    Error,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::Idle => "idle",
            TrackState::Recording => "recording",
            TrackState::Stopping => "stopping",
            TrackState::Exported => "exported",
            TrackState::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub payload: Bytes,
    pub logical_ts: LogicalMs,
}

/// Finished recording of one track, ready to be written out.
#[derive(Debug, Clone)]
pub struct ExportedArtifact {
    pub track_id: String,
    pub participant_id: PeerId,
    pub file_name: String,
    pub mime_type: String,
    pub duration_ms: LogicalMs,
    pub data: Bytes,
}

/// Read-only view of a track for observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    pub track_id: String,
    pub participant_id: PeerId,
    pub display_name: String,
    pub kind: MediaKind,
    pub is_local: bool,
    pub state: TrackState,
    pub codec_hint: Option<String>,
    pub start_ts: Option<LogicalMs>,
    pub stop_ts: Option<LogicalMs>,
    pub sequence: u64,
    pub file_name: Option<String>,
    pub error: Option<String>,
}

/// What a track needs from its owner to start a capture.
pub struct CaptureContext<'a> {
    pub factory: &'a dyn CaptureFactory,
    pub events: &'a UnboundedSender<CaptureEvent>,
    pub timeslice: Duration,
    pub codecs: &'a [String],
}

pub struct TrackEntry {
    descriptor: TrackDescriptor,
    metadata_id: Uuid,
    state: TrackState,
    codec_hint: Option<String>,
    chunks: Vec<Chunk>,
    start_logical: Option<LogicalMs>,
    stop_logical: Option<LogicalMs>,
    sequence_count: u64,
    generation: u64,
    backend: Option<Box<dyn CaptureBackend>>,
    artifact: Option<ExportedArtifact>,
    last_error: Option<String>,
}

impl TrackEntry {
    pub fn new(descriptor: TrackDescriptor) -> Self {
        Self {
            descriptor,
            metadata_id: Uuid::new_v4(),
            state: TrackState::Idle,
            codec_hint: None,
            chunks: Vec::new(),
            start_logical: None,
            stop_logical: None,
            sequence_count: 0,
            generation: 0,
            backend: None,
            artifact: None,
            last_error: None,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.descriptor.track_id
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    pub fn metadata_id(&self) -> Uuid {
        self.metadata_id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn codec_hint(&self) -> Option<&str> {
        self.codec_hint.as_deref()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn sequence_count(&self) -> u64 {
        self.sequence_count
    }

    pub fn start_logical(&self) -> Option<LogicalMs> {
        self.start_logical
    }

    pub fn stop_logical(&self) -> Option<LogicalMs> {
        self.stop_logical
    }

    pub fn duration_ms(&self) -> LogicalMs {
        match (self.start_logical, self.stop_logical) {
            (Some(start), Some(stop)) => stop.saturating_sub(start),
            _ => 0,
        }
    }

    pub fn artifact(&self) -> Option<&ExportedArtifact> {
        self.artifact.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether this track is part of the current (or last) recording.
    pub fn is_participating(&self) -> bool {
        matches!(
            self.state,
            TrackState::Recording | TrackState::Stopping | TrackState::Exported
        )
    }

    pub fn is_capturing(&self) -> bool {
        self.state == TrackState::Recording
    }

    /// Begin a fresh capture at `ts`. Returns false when already recording.
    pub fn start_capture(&mut self, ts: LogicalMs, ctx: &CaptureContext<'_>) -> bool {
        if self.state == TrackState::Recording {
            return false;
        }

        if self.state == TrackState::Stopping {
            warn!(
                "Track {}: restarting before previous export completed, discarding it",
                self.track_id()
            );
        }

        self.generation += 1;
        self.chunks.clear();
        self.sequence_count = 0;
        self.start_logical = Some(ts);
        self.stop_logical = None;
        self.artifact = None;
        self.last_error = None;
        self.codec_hint = None;
        self.backend = None;

        match self.launch_backend(ctx) {
            Ok((backend, mime)) => {
                info!(
                    "Track {} recording from {} ({})",
                    self.track_id(),
                    ts,
                    mime.as_deref().unwrap_or("default codec")
                );
                self.backend = Some(backend);
                self.codec_hint = mime;
                self.state = TrackState::Recording;
            }
            Err(e) => {
                warn!("Track {}: capture could not start: {}", self.track_id(), e);
                self.last_error = Some(e.to_string());
                self.state = TrackState::Error;
            }
        }

        true
    }

    fn launch_backend(
        &self,
        ctx: &CaptureContext<'_>,
    ) -> Result<(Box<dyn CaptureBackend>, Option<String>), CaptureError> {
        let sink = CaptureSink::new(self.track_id(), self.generation, ctx.events.clone());
        let mut backend = ctx.factory.create(&self.descriptor, sink)?;
        let preferred = capture::select_codec(ctx.codecs, ctx.factory);

        match backend.start(preferred.as_deref(), ctx.timeslice) {
            Ok(()) => {
                let mime = backend.mime_type().or(preferred);
                Ok((backend, mime))
            }
            Err(first) if preferred.is_some() => {
                warn!(
                    "Track {}: capture rejected {:?} ({}), retrying without codec hint",
                    self.track_id(),
                    preferred,
                    first
                );
                backend.start(None, ctx.timeslice)?;
                let mime = backend.mime_type();
                Ok((backend, mime))
            }
            Err(e) => Err(e),
        }
    }

    /// Buffer one encoded chunk. Zero-length payloads are dropped.
    pub fn on_chunk(&mut self, payload: Bytes, now: LogicalMs) -> bool {
        if payload.is_empty() {
            return false;
        }
        if !matches!(self.state, TrackState::Recording | TrackState::Stopping) {
            debug!(
                "Track {}: ignoring chunk while {}",
                self.track_id(),
                self.state.as_str()
            );
            return false;
        }

        self.chunks.push(Chunk {
            payload,
            logical_ts: now,
        });
        self.sequence_count += 1;
        true
    }

    /// Flush and stop the backend; completion arrives as a later event.
    pub fn stop_capture(&mut self, ts: LogicalMs) -> bool {
        if self.state != TrackState::Recording {
            return false;
        }

        self.stop_logical = Some(ts);
        self.halt_backend();
        self.state = TrackState::Stopping;
        info!("Track {} stopping at {}", self.track_id(), ts);
        true
    }

    fn halt_backend(&mut self) {
        let track_id = self.descriptor.track_id.clone();
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.request_data() {
                warn!("Track {}: failed to request final data: {}", track_id, e);
            }
            if let Err(e) = backend.stop() {
                warn!("Track {}: failed to stop capture: {}", track_id, e);
            }
        }
    }

    /// Best-effort stop before the entry is discarded.
    pub fn abort(&mut self) {
        if self.state == TrackState::Recording {
            self.halt_backend();
        }
        self.backend = None;
    }

    /// Handle the backend's completion signal.
    ///
    /// Returns the artifact when the track reached `Exported`.
    pub fn finalize(
        &mut self,
        now: LogicalMs,
        room: &str,
        namer: &FileNamer,
    ) -> Option<ExportedArtifact> {
        if !matches!(self.state, TrackState::Recording | TrackState::Stopping) {
            debug!(
                "Track {}: completion while {}, ignoring",
                self.track_id(),
                self.state.as_str()
            );
            return None;
        }

        self.backend = None;
        if self.stop_logical.is_none() {
            self.stop_logical = Some(now);
        }

        if self.chunks.is_empty() {
            warn!("Track {}: capture finished without data", self.track_id());
            self.last_error = Some(NO_DATA_REASON.to_string());
            self.state = TrackState::Error;
            return None;
        }

        let size: usize = self.chunks.iter().map(|c| c.payload.len()).sum();
        let mut data = BytesMut::with_capacity(size);
        for chunk in &self.chunks {
            data.extend_from_slice(&chunk.payload);
        }

        let start = self.start_logical.unwrap_or(now);
        let file_name = namer.artifact_name(
            room,
            self.descriptor.participant_id.as_str(),
            &self.descriptor.display_name,
            start,
            capture::extension_for(self.codec_hint.as_deref()),
        );

        let artifact = ExportedArtifact {
            track_id: self.descriptor.track_id.clone(),
            participant_id: self.descriptor.participant_id.clone(),
            file_name,
            mime_type: self
                .codec_hint
                .clone()
                .unwrap_or_else(|| format!("{}/webm", self.descriptor.kind.as_str())),
            duration_ms: self.duration_ms(),
            data: data.freeze(),
        };

        info!(
            "Track {} exported {} ({} chunks, {} bytes, {}ms)",
            self.track_id(),
            artifact.file_name,
            self.sequence_count,
            size,
            artifact.duration_ms
        );

        self.artifact = Some(artifact.clone());
        self.state = TrackState::Exported;
        Some(artifact)
    }

    /// Record a backend failure. Only affects a track that is capturing.
    pub fn fail(&mut self, reason: &str) -> bool {
        if !matches!(self.state, TrackState::Recording | TrackState::Stopping) {
            return false;
        }
        warn!("Track {} failed: {}", self.track_id(), reason);
        self.backend = None;
        self.last_error = Some(reason.to_string());
        self.state = TrackState::Error;
        true
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.descriptor.track_id.clone(),
            participant_id: self.descriptor.participant_id.clone(),
            display_name: self.descriptor.display_name.clone(),
            kind: self.descriptor.kind,
            is_local: self.descriptor.is_local,
            state: self.state,
            codec_hint: self.codec_hint.clone(),
            start_ts: self.start_logical,
            stop_ts: self.stop_logical,
            sequence: self.sequence_count,
            file_name: self.artifact.as_ref().map(|a| a.file_name.clone()),
            error: self.last_error.clone(),
        }
    }
}
