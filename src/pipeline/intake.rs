use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::stats::StatsCounters;
use super::SharedPipeline;
use crate::camera::FrameSink;
use crate::config::CameraConfig;
use crate::frame::{self, Frame};
use crate::motion::MotionDetector;
use crate::service::ServiceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    Oversized,
    BadMarker,
    RateLimited,
}

/// What happened to one delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Nobody is watching; the frame was not looked at
    Idle,
    Dropped(DropReason),
    Accepted { analyzed: bool, motion: bool },
}

/// Frame callback invoked on the camera thread.
///
/// Validates and rate-gates incoming frames, stores them, runs motion
/// detection on a throttled subset and wakes the service loop when output is
/// due.
pub struct CaptureIntake {
    pipeline: Arc<SharedPipeline>,
    detector: MotionDetector,
    waker: ServiceHandle,
    max_frame_size: usize,
    require_jpeg_marker: bool,
}

enum Stored {
    Idle,
    RateLimited,
    Kept { wake: bool },
    Analyze(AnalysisJob),
}

/// Frames handed to the detector, taken under the lock
struct AnalysisJob {
    current: Bytes,
    previous: Option<Bytes>,
    generation: u64,
}

impl CaptureIntake {
    pub fn new(
        pipeline: Arc<SharedPipeline>,
        detector: MotionDetector,
        waker: ServiceHandle,
        camera: &CameraConfig,
    ) -> Self {
        Self {
            pipeline,
            detector,
            waker,
            max_frame_size: camera.max_frame_size,
            require_jpeg_marker: camera.require_jpeg_marker,
        }
    }

    pub fn accept(&self, data: &[u8], now: Instant) -> IntakeOutcome {
        let stats = self.pipeline.stats_counters();
        StatsCounters::incr(&stats.frames_received);

        if !self.pipeline.is_connected() {
            return IntakeOutcome::Idle;
        }

        if let Some(reason) = self.validate(data) {
            StatsCounters::incr(&stats.frames_invalid);
            debug!(reason = ?reason, bytes = data.len(), "Dropping invalid frame");
            return IntakeOutcome::Dropped(reason);
        }

        let stored = self.store(data, now);

        let job = match stored {
            Stored::Idle => return IntakeOutcome::Idle,
            Stored::RateLimited => {
                StatsCounters::incr(&stats.frames_rate_limited);
                trace!("Frame rate-limited");
                return IntakeOutcome::Dropped(DropReason::RateLimited);
            }
            Stored::Kept { wake } => {
                StatsCounters::incr(&stats.frames_accepted);
                if wake {
                    self.waker.wake();
                }
                return IntakeOutcome::Accepted {
                    analyzed: false,
                    motion: false,
                };
            }
            Stored::Analyze(job) => {
                StatsCounters::incr(&stats.frames_accepted);
                job
            }
        };

        let motion = self
            .detector
            .detect(&job.current, job.previous.as_deref());

        let (committed, wake) = self.commit(&job, motion, now);

        if wake {
            self.waker.wake();
        }

        if !committed {
            debug!("Session changed during analysis, discarding result");
            return IntakeOutcome::Accepted {
                analyzed: false,
                motion: false,
            };
        }

        StatsCounters::incr(&stats.frames_analyzed);
        if motion {
            StatsCounters::incr(&stats.motion_frames);
            debug!(bytes = job.current.len(), "Motion detected");
        }

        IntakeOutcome::Accepted {
            analyzed: true,
            motion,
        }
    }

    /// Applies the rate gate and stores the frame; returns the frames to
    /// analyze when a motion check is due.
    fn store(&self, data: &[u8], now: Instant) -> Stored {
        let cadence = *self.pipeline.cadence();

        self.pipeline.with_state(|state| {
            let generation = state.generation;
            let Some(session) = state.session.active_mut() else {
                return Stored::Idle;
            };

            if let Some(last) = session.gate.last_accepted {
                if now.saturating_duration_since(last) < cadence.capture_interval {
                    return Stored::RateLimited;
                }
            }

            session.gate.last_accepted = Some(now);
            session.gate.frame_counter =
                (session.gate.frame_counter + 1) % cadence.frame_counter_period;

            let analyze = session.gate.frame_counter % cadence.analyze_every_nth == 0
                && now.saturating_duration_since(session.counters.last_motion_check)
                    >= cadence.motion_check_interval;
            if analyze {
                session.counters.last_motion_check = now;
            }

            let frame = Frame::copy_from_slice(data, now);
            let current = frame.data().clone();
            let previous = state.frames.current().map(|f| f.data().clone());
            state.frames.store(frame);

            if analyze {
                Stored::Analyze(AnalysisJob {
                    current,
                    previous,
                    generation,
                })
            } else {
                Stored::Kept {
                    wake: self.mark_pending(state, now),
                }
            }
        })
    }

    /// Records a detection result for the session the job was taken from.
    ///
    /// A result from a previous session is discarded. A telemetry window that
    /// closed while detection ran does not discard it: the result counts
    /// toward the window it is committed in, so motion near a window boundary
    /// is reported late rather than lost. Returns `(committed, wake)`.
    fn commit(&self, job: &AnalysisJob, motion: bool, now: Instant) -> (bool, bool) {
        self.pipeline.with_state(|state| {
            if state.generation != job.generation {
                return (false, false);
            }
            let Some(session) = state.session.active_mut() else {
                return (false, false);
            };
            session.counters.record_analysis(motion, now);
            (true, self.mark_pending(state, now))
        })
    }

    fn validate(&self, data: &[u8]) -> Option<DropReason> {
        if data.is_empty() {
            Some(DropReason::Empty)
        } else if data.len() > self.max_frame_size {
            Some(DropReason::Oversized)
        } else if self.require_jpeg_marker && !frame::has_jpeg_marker(data) {
            Some(DropReason::BadMarker)
        } else {
            None
        }
    }

    /// Sets the pending flag if output is due; returns true if a wake-up
    /// should be issued.
    fn mark_pending(&self, state: &mut super::PipelineState, now: Instant) -> bool {
        if state.send_pending || !state.output_due(self.pipeline.cadence(), now) {
            return false;
        }
        state.send_pending = true;
        true
    }
}

impl FrameSink for CaptureIntake {
    fn on_frame(&self, data: &[u8]) {
        let outcome = self.accept(data, Instant::now());
        trace!(outcome = ?outcome, bytes = data.len(), "Frame delivered");
    }
}
