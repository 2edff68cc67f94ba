//! Camera boundary: the driver pushes compressed frames into a [`FrameSink`]
//! from its own thread and is started/stopped by the service loop.

#[cfg(target_os = "linux")]
mod v4l2;

#[cfg(target_os = "linux")]
pub use v4l2::V4l2Camera;

use std::sync::Arc;
use thiserror::Error;

use crate::config::CameraConfig;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("format negotiation failed: {0}")]
    Format(String),

    #[error("failed to start streaming: {0}")]
    Start(String),

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("camera capture is not supported on this platform")]
    Unsupported,
}

/// Receives every frame the driver delivers, on the driver's thread
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, data: &[u8]);
}

/// Hardware capture control
pub trait CameraDriver: Send {
    fn start(&mut self) -> Result<(), CameraError>;
    fn stop(&mut self) -> Result<(), CameraError>;
    fn is_streaming(&self) -> bool;
}

impl<T: CameraDriver + ?Sized> CameraDriver for Box<T> {
    fn start(&mut self) -> Result<(), CameraError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        (**self).stop()
    }

    fn is_streaming(&self) -> bool {
        (**self).is_streaming()
    }
}

/// Opens and configures the platform camera. Streaming is not started.
#[cfg(target_os = "linux")]
pub fn open(
    config: &CameraConfig,
    sink: Arc<dyn FrameSink>,
) -> Result<Box<dyn CameraDriver>, CameraError> {
    Ok(Box::new(V4l2Camera::open(config, sink)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open(
    _config: &CameraConfig,
    _sink: Arc<dyn FrameSink>,
) -> Result<Box<dyn CameraDriver>, CameraError> {
    Err(CameraError::Unsupported)
}
