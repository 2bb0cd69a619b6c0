//! Scripted capture backend for unit tests.
//!
//! Records every call it receives and never spawns anything, so tests drive
//! chunk and completion events by hand.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{CaptureBackend, CaptureFactory, CaptureSink};
use crate::error::CaptureError;
use crate::transport::TrackDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartBehavior {
    #[default]
    Accept,
    /// Fail any start that carries a codec hint.
    RejectCodec,
    /// Fail every start.
    Fail,
}

#[derive(Clone, Default)]
pub struct ScriptedFactory {
    behavior: StartBehavior,
    calls: Arc<Mutex<Vec<String>>>,
    sinks: Arc<Mutex<Vec<CaptureSink>>>,
}

impl ScriptedFactory {
    pub fn new(behavior: StartBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Sink handed to the most recent backend created for `track_id`.
    pub fn sink(&self, track_id: &str) -> Option<CaptureSink> {
        self.sinks
            .lock()
            .iter()
            .rev()
            .find(|s| s.track_id() == track_id)
            .cloned()
    }
}

impl CaptureFactory for ScriptedFactory {
    fn is_supported(&self, _mime: &str) -> bool {
        true
    }

    fn create(
        &self,
        _track: &TrackDescriptor,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        self.sinks.lock().push(sink.clone());
        Ok(Box::new(ScriptedBackend {
            track_id: sink.track_id().to_string(),
            behavior: self.behavior,
            calls: self.calls.clone(),
            mime: None,
        }))
    }
}

struct ScriptedBackend {
    track_id: String,
    behavior: StartBehavior,
    calls: Arc<Mutex<Vec<String>>>,
    mime: Option<String>,
}

impl CaptureBackend for ScriptedBackend {
    fn start(&mut self, codec: Option<&str>, _timeslice: Duration) -> Result<(), CaptureError> {
        self.calls
            .lock()
            .push(format!("start {} {:?}", self.track_id, codec));

        match (self.behavior, codec) {
            (StartBehavior::Fail, _) => Err(CaptureError::StartFailed("scripted".to_string())),
            (StartBehavior::RejectCodec, Some(codec)) => {
                Err(CaptureError::UnsupportedCodec(codec.to_string()))
            }
            _ => {
                self.mime = Some(codec.unwrap_or("audio/webm").to_string());
                Ok(())
            }
        }
    }

    fn request_data(&mut self) -> Result<(), CaptureError> {
        self.calls.lock().push(format!("flush {}", self.track_id));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.calls.lock().push(format!("stop {}", self.track_id));
        Ok(())
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.clone()
    }
}
