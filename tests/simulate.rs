//! End-to-end run of the in-process simulation in real time.

use hotpod::app::{run_simulation, SimulationOptions};
use hotpod::config::Config;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_simulation_exports_every_peer() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.recording.timeslice_ms = 50;

    let report = run_simulation(
        &config,
        SimulationOptions {
            room: "Pilot Episode".to_string(),
            guests: 2,
            duration: Duration::from_millis(400),
            drop_rate: 0.0,
            late_guest: true,
            output_dir: temp.path().to_path_buf(),
            settle_timeout: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();

    assert_eq!(report.peers.len(), 4);
    assert!(report.all_exported(), "{report:#?}");
    for peer in &report.peers {
        assert_eq!(peer.status.tracks.len(), 4, "{}", peer.name);
        assert_eq!(peer.export.artifacts.len(), 4, "{}", peer.name);
        for path in peer.export.artifacts.iter().chain(&peer.export.sidecars) {
            assert!(path.exists(), "{}", path.display());
            assert!(path.starts_with(temp.path()));
        }
    }

    let sidecar = &report.peers[0].export.sidecars[0];
    let name = sidecar.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("podcast_pilot_episode_"), "{name}");
    assert!(name.ends_with("_metadata.json"), "{name}");
}
