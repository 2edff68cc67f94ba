mod common;

use cam_motion_streamer::camera::{CameraDriver, CameraError};
use cam_motion_streamer::config::{CameraConfig, PipelineConfig, ServiceConfig};
use cam_motion_streamer::motion::{MotionDetector, MotionParams};
use cam_motion_streamer::pipeline::{
    Cadence, CaptureIntake, IntakeOutcome, PublishOutcome, Publisher, SharedPipeline,
};
use cam_motion_streamer::service::{self, ServiceEvent, ServiceHandle, ServiceLoop};
use cam_motion_streamer::transport::{OutboundMessage, SessionHandle};
use common::jpeg_frame;
use crossbeam_channel::Receiver;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeCamera {
    streaming: bool,
}

impl CameraDriver for FakeCamera {
    fn start(&mut self) -> Result<(), CameraError> {
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}

fn pipeline_config(telemetry_ms: u64) -> PipelineConfig {
    PipelineConfig {
        capture_fps: 10,
        preview_fps: 5,
        motion_check_fps: 10,
        analyze_every_nth: 1,
        frame_counter_period: 30,
        telemetry_interval_ms: telemetry_ms,
    }
}

fn intake(pipeline: &Arc<SharedPipeline>, waker: ServiceHandle) -> CaptureIntake {
    let detector = MotionDetector::new(MotionParams::default()).unwrap();
    CaptureIntake::new(
        Arc::clone(pipeline),
        detector,
        waker,
        &CameraConfig::default(),
    )
}

fn viewer(id: u64) -> (SessionHandle, mpsc::Receiver<OutboundMessage>) {
    SessionHandle::channel(id, "127.0.0.1:8000".parse().unwrap(), 4)
}

struct Sends {
    telemetry: Vec<(Instant, u64, bool)>,
    frames: Vec<Instant>,
}

/// Feeds one frame every 100ms for `duration` and offers the publisher a
/// writable opportunity after each frame.
fn drive(
    intake: &CaptureIntake,
    publisher: &Publisher,
    rx: &mut mpsc::Receiver<OutboundMessage>,
    start: Instant,
    duration: Duration,
    frame: &[u8],
    accepted: &mut u64,
) -> Sends {
    let mut sends = Sends {
        telemetry: Vec::new(),
        frames: Vec::new(),
    };
    let steps = duration.as_millis() as u64 / 100;

    for k in 1..=steps {
        let now = start + Duration::from_millis(k * 100);
        if let IntakeOutcome::Accepted { .. } = intake.accept(frame, now) {
            *accepted += 1;
        }

        match publisher.on_writable(now) {
            PublishOutcome::Telemetry(msg) => {
                assert_eq!(msg.frames_analyzed, *accepted);
                sends.telemetry.push((now, msg.frames_analyzed, msg.motion));
                *accepted = 0;
            }
            PublishOutcome::Frame { .. } => sends.frames.push(now),
            _ => {}
        }
        while rx.try_recv().is_ok() {}
    }
    sends
}

#[test]
fn test_single_telemetry_in_quiet_twelve_seconds() {
    let pipeline = Arc::new(SharedPipeline::new(Cadence::from(&pipeline_config(10_000))));
    let (waker, _events) = service::channel();
    let intake = intake(&pipeline, waker);
    let publisher = Publisher::new(Arc::clone(&pipeline));

    let (handle, mut rx) = viewer(1);
    let start = Instant::now();
    pipeline.connect(handle, start);

    let still = jpeg_frame(None);
    let mut accepted = 0;
    let sends = drive(
        &intake,
        &publisher,
        &mut rx,
        start,
        Duration::from_secs(12),
        &still,
        &mut accepted,
    );

    assert_eq!(sends.telemetry.len(), 1);
    let (at, analyzed, motion) = sends.telemetry[0];
    assert_eq!(at, start + Duration::from_secs(10));
    assert_eq!(analyzed, 100);
    assert!(!motion);
}

#[test]
fn test_send_spacing_within_a_session() {
    let pipeline = Arc::new(SharedPipeline::new(Cadence::from(&pipeline_config(2_000))));
    let (waker, _events) = service::channel();
    let intake = intake(&pipeline, waker);
    let publisher = Publisher::new(Arc::clone(&pipeline));

    let (handle, mut rx) = viewer(1);
    let start = Instant::now();
    pipeline.connect(handle, start);

    let frame = jpeg_frame(None);
    let mut accepted = 0;
    let sends = drive(
        &intake,
        &publisher,
        &mut rx,
        start,
        Duration::from_secs(7),
        &frame,
        &mut accepted,
    );

    assert_eq!(sends.telemetry.len(), 3);
    for pair in sends.telemetry.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(2));
    }

    assert!(sends.frames.len() > 10);
    for pair in sends.frames.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(200));
    }
}

#[test]
fn test_motion_is_reported_and_cleared() {
    let pipeline = Arc::new(SharedPipeline::new(Cadence::from(&pipeline_config(1_000))));
    let (waker, _events) = service::channel();
    let intake = intake(&pipeline, waker);
    let publisher = Publisher::new(Arc::clone(&pipeline));

    let (handle, mut rx) = viewer(1);
    let start = Instant::now();
    pipeline.connect(handle, start);

    let still = jpeg_frame(None);
    let moved = jpeg_frame(Some((50, 30, 50)));

    intake.accept(&still, start + Duration::from_millis(100));
    let outcome = intake.accept(&moved, start + Duration::from_millis(200));
    assert_eq!(
        outcome,
        IntakeOutcome::Accepted {
            analyzed: true,
            motion: true
        }
    );

    let PublishOutcome::Telemetry(first) = publisher.on_writable(start + Duration::from_secs(1))
    else {
        panic!("telemetry expected");
    };
    assert!(first.motion);
    assert_eq!(first.motion_frames, 1);
    assert_eq!(first.frames_analyzed, 2);
    assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Telemetry(_))));

    let PublishOutcome::Telemetry(second) = publisher.on_writable(start + Duration::from_secs(2))
    else {
        panic!("telemetry expected");
    };
    assert!(!second.motion);
    assert_eq!(second.motion_frames, 0);
}

fn service_loop(
    pipeline: &Arc<SharedPipeline>,
) -> (ServiceLoop<FakeCamera>, ServiceHandle, Receiver<ServiceEvent>) {
    let (handle, rx) = service::channel();
    let config = ServiceConfig {
        pending_timeout_ms: 1,
        idle_timeout_ms: 5,
        disconnected_timeout_ms: 10,
        stats_interval_s: 0,
    };
    let svc = ServiceLoop::new(
        Arc::clone(pipeline),
        FakeCamera::default(),
        rx.clone(),
        Arc::new(AtomicBool::new(false)),
        &config,
    );
    (svc, handle, rx)
}

#[test]
fn test_reconnect_starts_from_clean_counters() {
    let pipeline = Arc::new(SharedPipeline::new(Cadence::from(&pipeline_config(5_000))));
    let (mut svc, events, _rx) = service_loop(&pipeline);
    let intake = intake(&pipeline, events.clone());

    let (first, _first_rx) = viewer(1);
    events.send(ServiceEvent::Connected(first));
    svc.step();
    assert!(svc.is_streaming());

    let base = Instant::now();
    intake.accept(&jpeg_frame(None), base + Duration::from_secs(1));
    intake.accept(
        &jpeg_frame(Some((50, 30, 50))),
        base + Duration::from_millis(1200),
    );
    let counters = pipeline.counters().unwrap();
    assert!(counters.motion_detected);
    assert_eq!(counters.motion_frames, 1);

    // camera stops within one polling cycle after the close
    events.send(ServiceEvent::Closed(1));
    svc.step();
    assert!(!svc.is_streaming());
    assert!(pipeline.counters().is_none());

    let (second, mut second_rx) = viewer(2);
    events.send(ServiceEvent::Connected(second));
    svc.step();
    assert!(svc.is_streaming());

    let counters = pipeline.counters().unwrap();
    assert!(!counters.motion_detected);
    assert_eq!(counters.motion_frames, 0);
    assert_eq!(counters.frames_analyzed, 0);
    assert!(pipeline.with_state(|s| !s.frames().has_previous()));

    let publisher = Publisher::new(Arc::clone(&pipeline));
    let PublishOutcome::Telemetry(msg) = publisher.on_writable(Instant::now() + Duration::from_secs(6))
    else {
        panic!("telemetry expected");
    };
    assert!(!msg.motion);
    assert_eq!(msg.motion_frames, 0);
    assert!(matches!(
        second_rx.try_recv(),
        Ok(OutboundMessage::Telemetry(_))
    ));
}

#[test]
fn test_idle_camera_while_nobody_watches() {
    let pipeline = Arc::new(SharedPipeline::default());
    let (mut svc, _events, _rx) = service_loop(&pipeline);

    svc.step();
    svc.step();
    assert!(!svc.is_streaming());
}
