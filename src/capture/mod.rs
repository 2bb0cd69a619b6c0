//! Capture primitive abstraction.
//!
//! A capture backend encodes one live media track and reports back through a
//! [`CaptureSink`]: encoded chunks on a timer, then a completion signal once
//! stopped. Reports are plain messages, so the recording state machine can
//! consume them on its own serialized event loop.

pub mod synthetic;
#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::CaptureError;
use crate::transport::TrackDescriptor;

pub use synthetic::{SyntheticCapture, SyntheticCaptureFactory};

/// Report from a capture backend, tagged with the capture incarnation.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub track_id: String,
    pub generation: u64,
    pub kind: CaptureEventKind,
}

#[derive(Debug, Clone)]
pub enum CaptureEventKind {
    Chunk(Bytes),
    Stopped,
    Failed(String),
}

/// Where a backend posts its reports.
#[derive(Clone)]
pub struct CaptureSink {
    track_id: String,
    generation: u64,
    tx: UnboundedSender<CaptureEvent>,
}

impl CaptureSink {
    pub fn new(track_id: impl Into<String>, generation: u64, tx: UnboundedSender<CaptureEvent>) -> Self {
        Self {
            track_id: track_id.into(),
            generation,
            tx,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Returns false once the receiving side is gone.
    pub fn chunk(&self, payload: Bytes) -> bool {
        self.post(CaptureEventKind::Chunk(payload))
    }

    pub fn stopped(&self) -> bool {
        self.post(CaptureEventKind::Stopped)
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.post(CaptureEventKind::Failed(reason.into()))
    }

    fn post(&self, kind: CaptureEventKind) -> bool {
        self.tx
            .send(CaptureEvent {
                track_id: self.track_id.clone(),
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// One running encoder for one track.
pub trait CaptureBackend: Send {
    /// Begin emitting chunks every `timeslice`. A `codec` the backend cannot
    /// honor is reported as [`CaptureError::UnsupportedCodec`].
    fn start(&mut self, codec: Option<&str>, timeslice: Duration) -> Result<(), CaptureError>;

    /// Ask for whatever is buffered to be emitted as a chunk now.
    fn request_data(&mut self) -> Result<(), CaptureError>;

    /// Stop encoding. Completion is reported later through the sink.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Container and codec actually in use, once started.
    fn mime_type(&self) -> Option<String>;
}

/// Builds capture backends for tracks.
pub trait CaptureFactory: Send {
    fn is_supported(&self, mime: &str) -> bool;

    fn create(
        &self,
        track: &TrackDescriptor,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureBackend>, CaptureError>;
}

/// First candidate the factory can encode, if any.
pub fn select_codec(candidates: &[String], factory: &dyn CaptureFactory) -> Option<String> {
    candidates
        .iter()
        .find(|mime| factory.is_supported(mime))
        .cloned()
}

/// File extension for a negotiated mime type.
pub fn extension_for(mime: Option<&str>) -> &'static str {
    let container = mime
        .and_then(|m| m.split(';').next())
        .and_then(|m| m.split('/').nth(1))
        .map(|c| c.trim().to_ascii_lowercase());

    match container.as_deref() {
        Some("ogg") => "ogg",
        Some("mp4") => "mp4",
        Some("wav") | Some("wave") => "wav",
        _ => "webm",
    }
}
