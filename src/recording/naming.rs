//! Deterministic, filesystem-safe names for exported artifacts.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat};
use regex::Regex;

use crate::clock::LogicalMs;

/// Substituted for components that sanitize to nothing.
pub const PLACEHOLDER: &str = "anon";

const FILE_PREFIX: &str = "podcast";

pub struct FileNamer {
    unsafe_run: Regex,
    repeated_separator: Regex,
}

impl FileNamer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            unsafe_run: Regex::new(r"[^a-z0-9\-_]+")?,
            repeated_separator: Regex::new(r"_{2,}")?,
        })
    }

    /// Lowercase, map unsafe runs to `_`, collapse and trim separators.
    pub fn sanitize(&self, input: &str) -> String {
        let lowered = input.to_lowercase();
        let replaced = self.unsafe_run.replace_all(&lowered, "_");
        let collapsed = self.repeated_separator.replace_all(&replaced, "_");
        let trimmed = collapsed.trim_matches('_');

        if trimmed.is_empty() {
            PLACEHOLDER.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// `podcast_<room>_<participant>_<display>_<iso>.<ext>`
    pub fn artifact_name(
        &self,
        room: &str,
        participant_id: &str,
        display_name: &str,
        start: LogicalMs,
        extension: &str,
    ) -> String {
        format!(
            "{}_{}_{}_{}_{}.{}",
            FILE_PREFIX,
            self.sanitize(room),
            self.sanitize(participant_id),
            self.sanitize(display_name),
            iso_stamp(start),
            extension
        )
    }

    /// `podcast_<room>_<iso>_metadata.json`
    pub fn sidecar_name(&self, room: &str, start: LogicalMs) -> String {
        format!(
            "{}_{}_{}_metadata.json",
            FILE_PREFIX,
            self.sanitize(room),
            iso_stamp(start)
        )
    }
}

/// ISO-8601 rendering of a logical timestamp with `:` replaced by `-`.
pub fn iso_stamp(ms: LogicalMs) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "-"),
        None => PLACEHOLDER.to_string(),
    }
}
