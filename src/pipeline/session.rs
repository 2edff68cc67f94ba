use std::time::Instant;

use crate::transport::{SessionHandle, SessionId};

/// Per-session activity counters and send timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounters {
    pub frames_analyzed: u64,
    pub motion_frames: u64,
    /// Sticky until the next telemetry send
    pub motion_detected: bool,
    pub last_frame_sent: Instant,
    pub last_telemetry_sent: Instant,
    pub last_motion_check: Instant,
    pub last_motion: Option<Instant>,
}

impl SessionCounters {
    pub fn new(now: Instant) -> Self {
        Self {
            frames_analyzed: 0,
            motion_frames: 0,
            motion_detected: false,
            last_frame_sent: now,
            last_telemetry_sent: now,
            last_motion_check: now,
            last_motion: None,
        }
    }

    /// Starts a new telemetry window
    pub fn reset_window(&mut self, now: Instant) {
        self.motion_detected = false;
        self.frames_analyzed = 0;
        self.motion_frames = 0;
        self.last_telemetry_sent = now;
    }

    pub fn record_analysis(&mut self, motion: bool, now: Instant) {
        self.frames_analyzed += 1;
        if motion {
            self.motion_detected = true;
            self.motion_frames += 1;
            self.last_motion = Some(now);
        }
    }
}

/// Capture-side rate gate state
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CaptureGate {
    pub last_accepted: Option<Instant>,
    /// Rolling counter of accepted frames, wraps at the configured period
    pub frame_counter: u32,
}

#[derive(Debug)]
pub struct ActiveSession {
    pub(crate) handle: SessionHandle,
    pub(crate) counters: SessionCounters,
    pub(crate) gate: CaptureGate,
    pub(crate) connected_at: Instant,
}

impl ActiveSession {
    pub(crate) fn new(handle: SessionHandle, now: Instant) -> Self {
        Self {
            handle,
            counters: SessionCounters::new(now),
            gate: CaptureGate::default(),
            connected_at: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }
}

/// Whether a viewer is currently attached
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected(ActiveSession),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected(_))
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            SessionState::Connected(session) => Some(session),
            SessionState::Disconnected => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        match self {
            SessionState::Connected(session) => Some(session),
            SessionState::Disconnected => None,
        }
    }
}

/// Result of a lifecycle event applied to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Disconnected -> Connected
    Connected,
    /// Connected -> Disconnected, with the counters frozen at close
    Disconnected(SessionCounters),
    /// A session is already active; the new one was not installed
    Rejected,
    /// Event did not apply to the current state
    Ignored,
}

impl Transition {
    pub fn changed(&self) -> bool {
        matches!(self, Transition::Connected | Transition::Disconnected(_))
    }
}
