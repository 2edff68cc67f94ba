//! Service loop: waits for transport events with an adaptive timeout, applies
//! session transitions, keeps the camera streaming exactly while a viewer is
//! connected and gives the publisher a writable opportunity each iteration.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::camera::CameraDriver;
use crate::config::ServiceConfig;
use crate::pipeline::{PublishOutcome, Publisher, SharedPipeline, Transition};
use crate::transport::{SessionHandle, SessionId};

/// Events delivered to the service loop
#[derive(Debug)]
pub enum ServiceEvent {
    Connected(SessionHandle),
    Closed(SessionId),
    /// Output became due; only interrupts the wait
    Wake,
    Shutdown,
}

/// Cloneable sender side of the service loop's event queue
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: Sender<ServiceEvent>,
}

impl ServiceHandle {
    pub fn send(&self, event: ServiceEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = ?e.into_inner(), "Service loop gone, event dropped");
        }
    }

    pub fn wake(&self) {
        self.send(ServiceEvent::Wake);
    }

    pub fn shutdown(&self) {
        self.send(ServiceEvent::Shutdown);
    }
}

/// Creates the event queue feeding a [`ServiceLoop`]
pub fn channel() -> (ServiceHandle, Receiver<ServiceEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ServiceHandle { tx }, rx)
}

/// Wait durations chosen by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub pending: Duration,
    pub idle: Duration,
    pub disconnected: Duration,
}

impl From<&ServiceConfig> for Timeouts {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            pending: Duration::from_millis(config.pending_timeout_ms),
            idle: Duration::from_millis(config.idle_timeout_ms),
            disconnected: Duration::from_millis(config.disconnected_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

pub struct ServiceLoop<C: CameraDriver> {
    pipeline: Arc<SharedPipeline>,
    publisher: Publisher,
    camera: C,
    events: Receiver<ServiceEvent>,
    stop: Arc<AtomicBool>,
    timeouts: Timeouts,
    stats_interval: Option<Duration>,
    last_stats: Instant,
}

impl<C: CameraDriver> ServiceLoop<C> {
    pub fn new(
        pipeline: Arc<SharedPipeline>,
        camera: C,
        events: Receiver<ServiceEvent>,
        stop: Arc<AtomicBool>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            publisher: Publisher::new(Arc::clone(&pipeline)),
            pipeline,
            camera,
            events,
            stop,
            timeouts: Timeouts::from(config),
            stats_interval: (config.stats_interval_s > 0)
                .then(|| Duration::from_secs(config.stats_interval_s)),
            last_stats: Instant::now(),
        }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn is_streaming(&self) -> bool {
        self.camera.is_streaming()
    }

    /// Timeout for the next wait, based on session state
    pub fn next_timeout(&self) -> Duration {
        let (connected, pending) = self
            .pipeline
            .with_state(|state| (state.session().is_connected(), state.send_pending()));

        match (connected, pending) {
            (true, true) => self.timeouts.pending,
            (true, false) => self.timeouts.idle,
            (false, _) => self.timeouts.disconnected,
        }
    }

    /// Runs until the stop flag is set or a shutdown event arrives
    pub fn run(&mut self) {
        info!("Service loop started");
        while self.step() == LoopControl::Continue {}

        if self.camera.is_streaming() {
            if let Err(e) = self.camera.stop() {
                warn!(error = %e, "Failed to stop camera on shutdown");
            }
        }
        let stats = self.pipeline.stats();
        info!(stats = ?stats, "Service loop stopped");
    }

    /// One iteration: wait, drain events, reconcile the camera, publish
    pub fn step(&mut self) -> LoopControl {
        if self.stop.load(Ordering::Acquire) {
            return LoopControl::Stop;
        }

        let timeout = self.next_timeout();
        let first = match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("All event senders dropped, stopping");
                return LoopControl::Stop;
            }
        };

        let mut control = LoopControl::Continue;
        for event in first.into_iter().chain(self.events.try_iter()) {
            if self.handle_event(event) == LoopControl::Stop {
                control = LoopControl::Stop;
            }
        }
        if control == LoopControl::Stop || self.stop.load(Ordering::Acquire) {
            return LoopControl::Stop;
        }

        self.reconcile_camera();

        let outcome = self.publisher.on_writable(Instant::now());
        if outcome == PublishOutcome::Closed {
            debug!("Publisher found viewer queue closed");
        }

        self.maybe_log_stats();
        LoopControl::Continue
    }

    fn handle_event(&self, event: ServiceEvent) -> LoopControl {
        match event {
            ServiceEvent::Connected(handle) => {
                let id = handle.id();
                if self.pipeline.connect(handle, Instant::now()) == Transition::Rejected {
                    warn!(session_id = id, "Connect while a session is active");
                }
            }
            ServiceEvent::Closed(id) => {
                self.pipeline.disconnect(id, Instant::now());
            }
            ServiceEvent::Wake => {}
            ServiceEvent::Shutdown => {
                info!("Shutdown requested");
                return LoopControl::Stop;
            }
        }
        LoopControl::Continue
    }

    /// Starts streaming while connected, stops it otherwise. A failed start
    /// is retried on the next iteration.
    fn reconcile_camera(&mut self) {
        let connected = self.pipeline.is_connected();
        let streaming = self.camera.is_streaming();

        if connected && !streaming {
            match self.camera.start() {
                Ok(()) => info!("Camera streaming started"),
                Err(e) => error!(error = %e, "Failed to start camera streaming, will retry"),
            }
        } else if !connected && streaming {
            match self.camera.stop() {
                Ok(()) => info!("Camera streaming stopped"),
                Err(e) => error!(error = %e, "Failed to stop camera streaming"),
            }
        }
    }

    fn maybe_log_stats(&mut self) {
        let Some(interval) = self.stats_interval else {
            return;
        };
        if self.last_stats.elapsed() < interval {
            return;
        }
        self.last_stats = Instant::now();

        let stats = self.pipeline.stats();
        info!(
            received = stats.frames_received,
            accepted = stats.frames_accepted,
            dropped = stats.frames_dropped(),
            analyzed = stats.frames_analyzed,
            motion = stats.motion_frames,
            telemetry_sent = stats.telemetry_sent,
            frames_sent = stats.frames_sent,
            skipped = stats.sends_skipped,
            sessions = stats.sessions,
            streaming = self.camera.is_streaming(),
            "Pipeline stats"
        );
    }
}
