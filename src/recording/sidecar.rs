//! Session-wide metadata document emitted once every track has exported.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::naming::FileNamer;
use super::track::TrackEntry;
use crate::clock::LogicalMs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarTrack {
    pub id: String,
    pub participant_id: String,
    pub display_name: String,
    pub track_type: String,
    pub codec_hint: Option<String>,
    pub start_ts: Option<LogicalMs>,
    pub stop_ts: Option<LogicalMs>,
    pub duration_ms: LogicalMs,
    pub sequence: u64,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRecord {
    pub room: String,
    pub start_ts: Option<LogicalMs>,
    pub stop_ts: Option<LogicalMs>,
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub tracks: Vec<SidecarTrack>,
}

/// Rendered sidecar, ready to be written next to the artifacts.
#[derive(Debug, Clone)]
pub struct SidecarExport {
    pub file_name: String,
    pub record: SidecarRecord,
    pub json: String,
}

impl SidecarTrack {
    pub fn from_entry(entry: &TrackEntry) -> Self {
        let descriptor = entry.descriptor();
        Self {
            id: entry.metadata_id().to_string(),
            participant_id: descriptor.participant_id.to_string(),
            display_name: descriptor.display_name.clone(),
            track_type: descriptor.kind.as_str().to_string(),
            codec_hint: entry.codec_hint().map(str::to_string),
            start_ts: entry.start_logical(),
            stop_ts: entry.stop_logical(),
            duration_ms: entry.duration_ms(),
            sequence: entry.sequence_count(),
            file_name: entry.artifact().map(|a| a.file_name.clone()),
        }
    }
}

/// Build the sidecar for the exported `tracks` of a finished session.
pub fn assemble<'a>(
    room: &str,
    domain: Option<&str>,
    start_ts: Option<LogicalMs>,
    stop_ts: Option<LogicalMs>,
    tracks: impl IntoIterator<Item = &'a TrackEntry>,
    namer: &FileNamer,
) -> Result<SidecarExport, serde_json::Error> {
    let record = SidecarRecord {
        room: room.to_string(),
        start_ts,
        stop_ts,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        domain: domain.map(str::to_string),
        tracks: tracks.into_iter().map(SidecarTrack::from_entry).collect(),
    };

    let json = serde_json::to_string_pretty(&record)?;
    let file_name = namer.sidecar_name(room, start_ts.unwrap_or_default());

    Ok(SidecarExport {
        file_name,
        record,
        json,
    })
}
