use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::stats::StatsCounters;
use super::telemetry::TelemetryMessage;
use super::SharedPipeline;
use crate::transport::OutboundMessage;

/// Result of one writable opportunity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    NotConnected,
    Telemetry(TelemetryMessage),
    Frame { bytes: usize },
    /// Nothing was due
    Idle,
    /// The viewer queue is full; retried on the next opportunity
    Backpressure,
    /// The viewer queue is gone; a close event is on its way
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Telemetry,
    Frame,
}

/// Decides what to send to the viewer each time it is invoked.
///
/// Telemetry is checked first and unconditionally so a busy preview cadence
/// can never starve it. A send that cannot be queued leaves every timestamp
/// untouched.
pub struct Publisher {
    pipeline: Arc<SharedPipeline>,
}

impl Publisher {
    pub fn new(pipeline: Arc<SharedPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn on_writable(&self, now: Instant) -> PublishOutcome {
        let cadence = *self.pipeline.cadence();
        let stats = self.pipeline.stats_counters();

        let decision = self.pipeline.with_state(|state| {
            state.send_pending = false;
            let generation = state.generation;
            let session = state.session.active()?;
            let counters = &session.counters;

            let due = if now.saturating_duration_since(counters.last_telemetry_sent)
                >= cadence.telemetry_interval
            {
                Some(Due::Telemetry)
            } else if state.frames.frame_available()
                && now.saturating_duration_since(counters.last_frame_sent)
                    >= cadence.frame_interval
            {
                Some(Due::Frame)
            } else {
                None
            };

            Some((session.handle.clone(), generation, due))
        });

        let Some((handle, generation, due)) = decision else {
            return PublishOutcome::NotConnected;
        };
        let Some(due) = due else {
            return PublishOutcome::Idle;
        };

        let permit = match handle.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                StatsCounters::incr(&stats.sends_skipped);
                debug!(session_id = handle.id(), due = ?due, "Viewer queue full, skipping send");
                return PublishOutcome::Backpressure;
            }
            Err(TrySendError::Closed(())) => {
                debug!(session_id = handle.id(), "Viewer queue closed");
                return PublishOutcome::Closed;
            }
        };

        let prepared = self.pipeline.with_state(|state| {
            if state.generation != generation {
                return None;
            }
            let session = state.session.active_mut()?;

            match due {
                Due::Telemetry => {
                    let counters = session.counters;
                    let msg = TelemetryMessage::from_counters(&counters, SystemTime::now());
                    let text = match msg.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode telemetry");
                            return None;
                        }
                    };
                    session.counters.reset_window(now);
                    Some((
                        OutboundMessage::Telemetry(text),
                        PublishOutcome::Telemetry(msg),
                        counters,
                        None,
                    ))
                }
                Due::Frame => {
                    let frame = state.frames.take_for_send()?;
                    session.counters.last_frame_sent = now;
                    Some((
                        OutboundMessage::Frame(frame.data().clone()),
                        PublishOutcome::Frame { bytes: frame.len() },
                        session.counters,
                        Some(frame.captured_at()),
                    ))
                }
            }
        });

        // the permit is released unused when the session moved on
        let Some((message, outcome, counters, captured_at)) = prepared else {
            return PublishOutcome::Idle;
        };

        permit.send(message);

        match &outcome {
            PublishOutcome::Telemetry(msg) => {
                StatsCounters::incr(&stats.telemetry_sent);
                info!(
                    session_id = handle.id(),
                    motion = msg.motion,
                    frames_analyzed = msg.frames_analyzed,
                    motion_frames = msg.motion_frames,
                    window_ms = now
                        .saturating_duration_since(counters.last_telemetry_sent)
                        .as_millis() as u64,
                    last_motion_s = counters
                        .last_motion
                        .map(|at| now.saturating_duration_since(at).as_secs()),
                    "Telemetry sent"
                );
            }
            PublishOutcome::Frame { bytes } => {
                StatsCounters::incr(&stats.frames_sent);
                let age_ms =
                    captured_at.map(|at| now.saturating_duration_since(at).as_millis() as u64);
                debug!(session_id = handle.id(), bytes, age_ms = ?age_ms, "Frame sent");
            }
            _ => {}
        }

        outcome
    }
}
