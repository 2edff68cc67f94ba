use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::session::SessionCounters;

/// Periodic motion report sent to the viewer as a text message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub motion: bool,
    /// Unix time in seconds
    pub timestamp: u64,
    pub frames_analyzed: u64,
    pub motion_frames: u64,
}

impl TelemetryMessage {
    pub fn from_counters(counters: &SessionCounters, wall_clock: SystemTime) -> Self {
        let timestamp = wall_clock
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            motion: counters.motion_detected,
            timestamp,
            frames_analyzed: counters.frames_analyzed,
            motion_frames: counters.motion_frames,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
