pub mod machine;
pub mod naming;
pub mod sidecar;
pub mod status;
pub mod track;

pub use machine::{CaptureSettings, RecordingEvent, RecordingMachine, SessionState};
pub use naming::FileNamer;
pub use sidecar::{SidecarExport, SidecarRecord, SidecarTrack};
pub use status::{PeerRole, SessionStatus, SessionStatusHandle};
pub use track::{ExportedArtifact, TrackEntry, TrackSnapshot, TrackState};
