//! Writing finished artifacts and sidecars to durable storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::recording::{ExportedArtifact, FileNamer, RecordingEvent, SidecarExport};

/// Destination for a session's exported files.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write_artifact(&self, artifact: &ExportedArtifact) -> Result<PathBuf>;

    async fn write_sidecar(&self, sidecar: &SidecarExport) -> Result<PathBuf>;
}

/// Writes everything into `<output_dir>/<room>/`.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(output_dir: &Path, room: &str) -> Result<Self> {
        let namer = FileNamer::new()?;
        Ok(Self {
            dir: output_dir.join(namer.sanitize(room)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create export directory {:?}", self.dir))?;

        let path = self.dir.join(file_name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn write_artifact(&self, artifact: &ExportedArtifact) -> Result<PathBuf> {
        let path = self.write(&artifact.file_name, &artifact.data).await?;
        info!(
            "Wrote {} ({} bytes, {})",
            path.display(),
            artifact.data.len(),
            artifact.mime_type
        );
        Ok(path)
    }

    async fn write_sidecar(&self, sidecar: &SidecarExport) -> Result<PathBuf> {
        let path = self.write(&sidecar.file_name, sidecar.json.as_bytes()).await?;
        info!("Wrote session metadata {}", path.display());
        Ok(path)
    }
}

/// Paths written by an exporter over its lifetime.
#[derive(Debug, Default, Clone)]
pub struct ExportReport {
    pub artifacts: Vec<PathBuf>,
    pub sidecars: Vec<PathBuf>,
    pub failures: usize,
}

/// Drain recording events and persist every finished artifact and sidecar.
///
/// The task ends once the event channel closes.
pub fn spawn_exporter(
    mut events: UnboundedReceiver<RecordingEvent>,
    sink: Arc<dyn ArtifactSink>,
) -> JoinHandle<ExportReport> {
    tokio::spawn(async move {
        let mut report = ExportReport::default();

        while let Some(event) = events.recv().await {
            match event {
                RecordingEvent::ExportReady(artifact) => {
                    match sink.write_artifact(&artifact).await {
                        Ok(path) => report.artifacts.push(path),
                        Err(e) => {
                            error!("Failed to export track {}: {:#}", artifact.track_id, e);
                            report.failures += 1;
                        }
                    }
                }
                RecordingEvent::SidecarReady(sidecar) => match sink.write_sidecar(&sidecar).await {
                    Ok(path) => report.sidecars.push(path),
                    Err(e) => {
                        error!("Failed to export {}: {:#}", sidecar.file_name, e);
                        report.failures += 1;
                    }
                },
                RecordingEvent::StateChanged { state, .. } => {
                    debug!("Session state: {}", state.as_str());
                }
                RecordingEvent::TrackUpdated(track) => {
                    debug!("Track {} is {}", track.track_id, track.state.as_str());
                }
            }
        }

        report
    })
}
