//! Timer-driven stand-in encoder.
//!
//! Emits fixed-size payloads on every timeslice. Used by the simulation and
//! the integration tests in place of a real media encoder.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use super::{CaptureBackend, CaptureFactory, CaptureSink};
use crate::error::CaptureError;
use crate::transport::TrackDescriptor;

const DEFAULT_CHUNK_BYTES: usize = 1024;

#[derive(Debug)]
enum Control {
    Flush,
    Stop,
}

pub struct SyntheticCaptureFactory {
    supported: Vec<String>,
    chunk_bytes: usize,
}

impl SyntheticCaptureFactory {
    pub fn new(supported: Vec<String>) -> Self {
        Self {
            supported,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }
}

impl Default for SyntheticCaptureFactory {
    fn default() -> Self {
        Self::new(vec![
            "audio/webm;codecs=opus".to_string(),
            "audio/webm".to_string(),
            "video/webm;codecs=vp8,opus".to_string(),
            "video/webm".to_string(),
        ])
    }
}

impl CaptureFactory for SyntheticCaptureFactory {
    fn is_supported(&self, mime: &str) -> bool {
        self.supported.iter().any(|s| s == mime)
    }

    fn create(
        &self,
        track: &TrackDescriptor,
        sink: CaptureSink,
    ) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        let fallback = format!("{}/webm", track.kind.as_str());
        Ok(Box::new(SyntheticCapture {
            sink,
            supported: self.supported.clone(),
            fallback_mime: fallback,
            mime: None,
            chunk_bytes: self.chunk_bytes,
            control: None,
        }))
    }
}

pub struct SyntheticCapture {
    sink: CaptureSink,
    supported: Vec<String>,
    fallback_mime: String,
    mime: Option<String>,
    chunk_bytes: usize,
    control: Option<UnboundedSender<Control>>,
}

impl CaptureBackend for SyntheticCapture {
    fn start(&mut self, codec: Option<&str>, timeslice: Duration) -> Result<(), CaptureError> {
        if self.control.is_some() {
            return Err(CaptureError::StartFailed("already started".to_string()));
        }

        if let Some(codec) = codec {
            if !self.supported.iter().any(|s| s == codec) {
                return Err(CaptureError::UnsupportedCodec(codec.to_string()));
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CaptureError::StartFailed(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = self.sink.clone();
        let chunk_bytes = self.chunk_bytes;
        let timeslice = timeslice.max(Duration::from_millis(1));

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(timeslice);
            // interval fires immediately; the first chunk is due one slice later
            ticker.tick().await;
            let mut seq: u8 = 0;
            let mut next_payload = move || {
                seq = seq.wrapping_add(1);
                Bytes::from(vec![seq; chunk_bytes])
            };

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !sink.chunk(next_payload()) {
                            break;
                        }
                    }
                    control = rx.recv() => match control {
                        Some(Control::Flush) => {
                            sink.chunk(next_payload());
                        }
                        Some(Control::Stop) | None => {
                            debug!("Synthetic capture for {} stopped", sink.track_id());
                            sink.stopped();
                            break;
                        }
                    },
                }
            }
        });

        self.mime = Some(codec.map(str::to_string).unwrap_or_else(|| self.fallback_mime.clone()));
        self.control = Some(tx);
        Ok(())
    }

    fn request_data(&mut self) -> Result<(), CaptureError> {
        self.control
            .as_ref()
            .ok_or(CaptureError::NotRunning)?
            .send(Control::Flush)
            .map_err(|_| CaptureError::Closed)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let control = self.control.take().ok_or(CaptureError::NotRunning)?;
        control.send(Control::Stop).map_err(|_| CaptureError::Closed)
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.clone()
    }
}
