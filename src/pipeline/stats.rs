use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the capture/detect/publish pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_accepted: u64,
    pub frames_invalid: u64,
    pub frames_rate_limited: u64,
    pub frames_analyzed: u64,
    pub motion_frames: u64,
    pub telemetry_sent: u64,
    pub frames_sent: u64,
    pub sends_skipped: u64,
    pub sessions: u64,
}

/// Lock-free counters, independent of the pipeline lock
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub frames_received: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_invalid: AtomicU64,
    pub frames_rate_limited: AtomicU64,
    pub frames_analyzed: AtomicU64,
    pub motion_frames: AtomicU64,
    pub telemetry_sent: AtomicU64,
    pub frames_sent: AtomicU64,
    pub sends_skipped: AtomicU64,
    pub sessions: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            frames_rate_limited: self.frames_rate_limited.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            motion_frames: self.motion_frames.load(Ordering::Relaxed),
            telemetry_sent: self.telemetry_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sends_skipped: self.sends_skipped.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

impl PipelineStats {
    /// Frames dropped at intake for any reason
    pub fn frames_dropped(&self) -> u64 {
        self.frames_invalid + self.frames_rate_limited
    }
}
