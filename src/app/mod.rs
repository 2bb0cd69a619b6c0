//! In-process multi-peer recording over the loopback transport.

use crate::capture::SyntheticCaptureFactory;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::export::{spawn_exporter, DirectorySink, ExportReport};
use crate::recording::{FileNamer, SessionState, SessionStatus};
use crate::session::{PeerSession, PeerSessionHandle};
use crate::transport::{LoopbackNetwork, LoopbackTransport, MediaKind};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub room: String,
    pub guests: usize,
    pub duration: Duration,
    pub drop_rate: f64,
    pub late_guest: bool,
    pub output_dir: PathBuf,
    /// How long to wait for every peer to finish exporting after STOP.
    pub settle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PeerReport {
    pub name: String,
    pub status: SessionStatus,
    pub export: ExportReport,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub room: String,
    pub peers: Vec<PeerReport>,
    pub dropped_messages: u64,
}

impl SimulationReport {
    pub fn all_exported(&self) -> bool {
        self.peers
            .iter()
            .all(|p| p.status.state == SessionState::Exported && !p.export.sidecars.is_empty())
    }
}

struct SimPeer {
    name: String,
    transport: LoopbackTransport,
    handle: PeerSessionHandle,
    task: JoinHandle<()>,
    exporter: JoinHandle<ExportReport>,
}

pub async fn run_simulation(config: &Config, options: SimulationOptions) -> Result<SimulationReport> {
    info!(
        "Simulating room '{}' with 1 host and {} guests for {:?}",
        options.room, options.guests, options.duration
    );

    let namer = FileNamer::new()?;
    let network = LoopbackNetwork::new().with_drop_rate(options.drop_rate);
    let mut peers = Vec::new();

    peers.push(join_peer(&network, config, &options, &namer, &config.session.display_name, true)?);
    for i in 1..=options.guests {
        peers.push(join_peer(&network, config, &options, &namer, &format!("Guest {i}"), false)?);
    }

    let guests_ready = wait_until(&peers[1..], options.settle_timeout, |s| s.host.is_some()).await;
    if !guests_ready {
        warn!("Not every guest discovered the host before recording started");
    }

    let host = peers[0].handle.clone();
    let start = host.start_recording(None).await?;
    info!("Host issued {} (seq {})", start.kind.as_str(), start.seq);

    if options.late_guest {
        let half = options.duration / 2;
        tokio::time::sleep(half).await;
        peers.push(join_peer(&network, config, &options, &namer, "Late Guest", false)?);
        tokio::time::sleep(options.duration - half).await;
    } else {
        tokio::time::sleep(options.duration).await;
    }

    let stop = host.stop_recording(None).await?;
    info!("Host issued {} (seq {})", stop.kind.as_str(), stop.seq);

    if !wait_until(&peers, options.settle_timeout, SessionStatus::is_settled).await {
        warn!(
            "Some peers did not finish within {:?}",
            options.settle_timeout
        );
    }

    // snapshot everyone before anybody leaves; a departing host resets guests
    let mut statuses = Vec::with_capacity(peers.len());
    for peer in &peers {
        statuses.push(peer.handle.status().await);
    }

    let mut reports = Vec::with_capacity(peers.len());
    for (peer, status) in peers.into_iter().zip(statuses) {
        peer.handle.shutdown();
        peer.task
            .await
            .map_err(|e| anyhow!("peer session {} panicked: {e}", peer.name))?;
        peer.transport.leave();
        let export = peer.exporter.await.unwrap_or_default();
        reports.push(PeerReport {
            name: peer.name,
            status,
            export,
        });
    }

    Ok(SimulationReport {
        room: options.room,
        peers: reports,
        dropped_messages: network.dropped_messages(),
    })
}

fn join_peer(
    network: &LoopbackNetwork,
    config: &Config,
    options: &SimulationOptions,
    namer: &FileNamer,
    name: &str,
    moderator: bool,
) -> Result<SimPeer> {
    let mut kinds = vec![MediaKind::Audio];
    if config.recording.capture_video {
        kinds.push(MediaKind::Video);
    }

    let (transport, events) = network.join(name, moderator, &kinds);
    let spawned = PeerSession::spawn(
        transport.clone(),
        events,
        Box::new(SyntheticCaptureFactory::default()),
        Arc::new(SystemClock::new()),
        config.session_options(&options.room),
    )?;

    let sink = DirectorySink::new(&options.output_dir.join(namer.sanitize(name)), &options.room)?;
    let exporter = spawn_exporter(spawned.events, Arc::new(sink));

    Ok(SimPeer {
        name: name.to_string(),
        transport,
        handle: spawned.handle,
        task: spawned.task,
        exporter,
    })
}

/// Poll peer statuses until `done` holds for all of them or `timeout` passes.
async fn wait_until<F>(peers: &[SimPeer], timeout: Duration, done: F) -> bool
where
    F: Fn(&SessionStatus) -> bool,
{
    let poll = async {
        loop {
            let mut all = true;
            for peer in peers {
                if !done(&peer.handle.status().await) {
                    all = false;
                    break;
                }
            }
            if all {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

pub fn print_report(report: &SimulationReport) {
    println!();
    println!("Simulation: {}", report.room);
    println!("====================");
    for peer in &report.peers {
        let status = &peer.status;
        println!(
            "{:<12} {:<6} state={:<9} seq={} tracks={}/{} files={}",
            peer.name,
            status.role.as_str(),
            status.state.as_str(),
            status.last_applied,
            status.exported_tracks(),
            status.tracks.len(),
            peer.export.artifacts.len() + peer.export.sidecars.len()
        );
        if let Some(sidecar) = peer.export.sidecars.first() {
            println!("             sidecar: {}", sidecar.display());
        }
        if let Some(error) = &status.last_error {
            println!("             error: {}", error);
        }
    }
    println!();
    println!("Dropped messages: {}", report.dropped_messages);
    println!(
        "Result: {}",
        if report.all_exported() {
            "all peers exported"
        } else {
            "incomplete"
        }
    );
}
