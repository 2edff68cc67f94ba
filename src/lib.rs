//! Single-camera motion streamer
//!
//! Captures MJPEG frames, checks consecutive frames for motion and pushes
//! preview frames plus periodic motion telemetry to one WebSocket viewer.
//! The camera only streams while a viewer is connected.

pub mod camera;
pub mod config;
pub mod frame;
pub mod motion;
pub mod pipeline;
pub mod service;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use frame::{Frame, FrameStore};
pub use motion::{MotionDetector, MotionParams};
pub use pipeline::{CaptureIntake, Publisher, SharedPipeline};
pub use service::{ServiceEvent, ServiceHandle, ServiceLoop};
pub use transport::WsServer;
