use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::{
    buffer::Type,
    io::{mmap::Stream as MmapStream, traits::CaptureStream},
    video::Capture,
    Device, Format, FourCC,
};

use super::{CameraDriver, CameraError, FrameSink};
use crate::config::CameraConfig;

const BUFFER_COUNT: u32 = 4;
/// Bounds how long `stop` waits for a blocked dequeue
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// V4L2 capture of MJPEG frames through memory-mapped buffers
pub struct V4l2Camera {
    device: Arc<Device>,
    path: String,
    sink: Arc<dyn FrameSink>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Camera {
    pub fn open(config: &CameraConfig, sink: Arc<dyn FrameSink>) -> Result<Self, CameraError> {
        let device = Device::with_path(&config.device).map_err(|source| CameraError::Open {
            device: config.device.clone(),
            source,
        })?;

        let wanted = Format::new(config.width, config.height, FourCC::new(b"MJPG"));
        let fmt = device
            .set_format(&wanted)
            .map_err(|e| CameraError::Format(e.to_string()))?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(CameraError::Format(format!(
                "device does not deliver MJPG, got {}",
                fmt.fourcc
            )));
        }
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                requested = %format!("{}x{}", config.width, config.height),
                actual = %format!("{}x{}", fmt.width, fmt.height),
                "Camera adjusted resolution"
            );
        }

        if let Err(e) = device.set_params(&v4l::video::capture::Parameters::with_fps(config.fps)) {
            warn!(fps = config.fps, error = %e, "Failed to set frame rate, using driver default");
        }

        info!(device = %config.device, format = %fmt, "Camera configured");

        Ok(Self {
            device: Arc::new(device),
            path: config.device.clone(),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

impl CameraDriver for V4l2Camera {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.is_streaming() {
            return Ok(());
        }
        // reap a worker that stopped on a dequeue error
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let device = Arc::clone(&self.device);
        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        running.store(true, Ordering::Release);
        let worker = thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
                        Ok(stream) => stream,
                        Err(e) => {
                            running.store(false, Ordering::Release);
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                stream.set_timeout(DEQUEUE_TIMEOUT);
                let _ = ready_tx.send(Ok(()));

                capture_loop(&mut stream, sink.as_ref(), &running);
            })?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("capture thread exited".to_string()));

        match ready {
            Ok(()) => {
                self.worker = Some(worker);
                info!(device = %self.path, "Capture started");
                Ok(())
            }
            Err(e) => {
                let _ = worker.join();
                Err(CameraError::Start(e))
            }
        }
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(device = %self.path, "Capture thread panicked");
            }
            info!(device = %self.path, "Capture stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn capture_loop(stream: &mut MmapStream<'_>, sink: &dyn FrameSink, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                sink.on_frame(&buf[..used]);
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                debug!("No frame within dequeue timeout");
            }
            Err(e) => {
                warn!(error = %e, "Frame dequeue failed, stopping capture");
                running.store(false, Ordering::Release);
            }
        }
    }
}
