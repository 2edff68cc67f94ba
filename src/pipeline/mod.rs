//! Capture/detect/publish pipeline
//!
//! All state shared between the camera thread and the service loop (frame
//! store, session counters, pending flag) sits behind one lock owned by
//! [`SharedPipeline`]. Every access goes through a scoped closure, so the lock
//! is released on every exit path and never held across a send or a decode.

mod intake;
mod publisher;
mod session;
mod stats;
mod telemetry;

pub use intake::{CaptureIntake, DropReason, IntakeOutcome};
pub use publisher::{PublishOutcome, Publisher};
pub use session::{ActiveSession, SessionCounters, SessionState, Transition};
pub use stats::PipelineStats;
pub use telemetry::TelemetryMessage;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::frame::FrameStore;
use crate::transport::{SessionHandle, SessionId};
use stats::StatsCounters;

/// Timing and decimation derived from the pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub capture_interval: Duration,
    pub frame_interval: Duration,
    pub motion_check_interval: Duration,
    pub telemetry_interval: Duration,
    pub analyze_every_nth: u32,
    pub frame_counter_period: u32,
}

impl From<&PipelineConfig> for Cadence {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            capture_interval: config.capture_interval(),
            frame_interval: config.frame_interval(),
            motion_check_interval: config.motion_check_interval(),
            telemetry_interval: config.telemetry_interval(),
            analyze_every_nth: config.analyze_every_nth.max(1),
            frame_counter_period: config.frame_counter_period.max(1),
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// State guarded by the pipeline lock
#[derive(Debug, Default)]
pub struct PipelineState {
    pub(crate) frames: FrameStore,
    pub(crate) session: SessionState,
    /// Output is due and a wake-up has been issued
    pub(crate) send_pending: bool,
    /// Bumped on every lifecycle transition
    pub(crate) generation: u64,
}

impl PipelineState {
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FrameStore {
        &mut self.frames
    }

    pub fn send_pending(&self) -> bool {
        self.send_pending
    }

    /// True if telemetry or a preview frame is due at `now`
    pub(crate) fn output_due(&self, cadence: &Cadence, now: Instant) -> bool {
        let Some(session) = self.session.active() else {
            return false;
        };
        let counters = &session.counters;

        now.saturating_duration_since(counters.last_telemetry_sent) >= cadence.telemetry_interval
            || (self.frames.frame_available()
                && now.saturating_duration_since(counters.last_frame_sent)
                    >= cadence.frame_interval)
    }

    fn connect(&mut self, handle: SessionHandle, now: Instant) -> Transition {
        if self.session.is_connected() {
            return Transition::Rejected;
        }

        self.generation = self.generation.wrapping_add(1);
        self.frames.clear();
        // request the first writable opportunity
        self.send_pending = true;
        self.session = SessionState::Connected(ActiveSession::new(handle, now));
        Transition::Connected
    }

    fn disconnect(&mut self, id: SessionId) -> Transition {
        match &self.session {
            SessionState::Connected(active) if active.id() == id => {}
            _ => return Transition::Ignored,
        }

        let previous = std::mem::take(&mut self.session);
        self.generation = self.generation.wrapping_add(1);
        self.frames.clear();
        self.send_pending = false;

        match previous {
            SessionState::Connected(active) => Transition::Disconnected(active.counters),
            SessionState::Disconnected => Transition::Ignored,
        }
    }
}

/// Shared pipeline context, constructed once and handed to both the camera
/// thread and the service loop.
#[derive(Debug)]
pub struct SharedPipeline {
    state: Mutex<PipelineState>,
    /// Mirrors `state.session` for the lock-free idle check at intake
    connected: AtomicBool,
    cadence: Cadence,
    stats: StatsCounters,
}

impl SharedPipeline {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            state: Mutex::new(PipelineState::default()),
            connected: AtomicBool::new(false),
            cadence,
            stats: StatsCounters::default(),
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    /// Runs `f` with the lock held
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    /// Installs a new viewer session, resetting counters and the frame store
    pub fn connect(&self, handle: SessionHandle, now: Instant) -> Transition {
        let id = handle.id();
        let peer = handle.peer();
        let transition = self.with_state(|state| {
            let transition = state.connect(handle, now);
            if transition == Transition::Connected {
                self.connected.store(true, Ordering::Release);
            }
            transition
        });

        match transition {
            Transition::Connected => {
                StatsCounters::incr(&self.stats.sessions);
                info!(session_id = id, peer = %peer, "Session started");
            }
            Transition::Rejected => {
                warn!(session_id = id, "Session already active, ignoring connect");
            }
            _ => {}
        }
        transition
    }

    /// Tears down the session with the given id, if it is the active one
    pub fn disconnect(&self, id: SessionId, now: Instant) -> Transition {
        let (transition, connected_at) = self.with_state(|state| {
            let connected_at = state.session.active().map(|s| s.connected_at);
            let transition = state.disconnect(id);
            if transition.changed() {
                self.connected.store(false, Ordering::Release);
            }
            (transition, connected_at)
        });

        match &transition {
            Transition::Disconnected(counters) => {
                let duration = connected_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                info!(
                    session_id = id,
                    duration_s = duration.as_secs(),
                    frames_analyzed = counters.frames_analyzed,
                    motion_frames = counters.motion_frames,
                    "Session ended"
                );
            }
            _ => debug!(session_id = id, "Close for inactive session ignored"),
        }
        transition
    }

    /// Cheap, lock-free check used by the capture thread
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn send_pending(&self) -> bool {
        self.with_state(|state| state.send_pending)
    }

    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.with_state(|state| state.session.active().map(|s| s.handle.clone()))
    }

    pub fn counters(&self) -> Option<SessionCounters> {
        self.with_state(|state| state.session.active().map(|s| s.counters))
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub(crate) fn stats_counters(&self) -> &StatsCounters {
        &self.stats
    }
}

impl Default for SharedPipeline {
    fn default() -> Self {
        Self::new(Cadence::default())
    }
}
