//! Configuration management for the camera motion streamer

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::motion::MotionParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// WebSocket endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Outbound messages queued per viewer before sends are skipped
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Camera device negotiation and frame validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// V4L2 device path, e.g. "/dev/video0"
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Rate requested from the driver
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Frames above this size are rejected
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Drop frames that do not begin with the JPEG start-of-image marker
    #[serde(default = "default_true")]
    pub require_jpeg_marker: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            width: default_width(),
            height: default_height(),
            fps: default_camera_fps(),
            max_frame_size: default_max_frame_size(),
            require_jpeg_marker: true,
        }
    }
}

/// Cadences of the capture/detect/publish pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_capture_fps")]
    pub capture_fps: u32,

    #[serde(default = "default_preview_fps")]
    pub preview_fps: u32,

    #[serde(default = "default_motion_check_fps")]
    pub motion_check_fps: u32,

    #[serde(default = "default_analyze_every_nth")]
    pub analyze_every_nth: u32,

    #[serde(default = "default_frame_counter_period")]
    pub frame_counter_period: u32,

    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_fps: default_capture_fps(),
            preview_fps: default_preview_fps(),
            motion_check_fps: default_motion_check_fps(),
            analyze_every_nth: default_analyze_every_nth(),
            frame_counter_period: default_frame_counter_period(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
        }
    }
}

impl PipelineConfig {
    /// Minimum spacing between accepted frames
    pub fn capture_interval(&self) -> Duration {
        per_second(self.capture_fps)
    }

    /// Minimum spacing between preview frames sent to the viewer
    pub fn frame_interval(&self) -> Duration {
        per_second(self.preview_fps)
    }

    pub fn motion_check_interval(&self) -> Duration {
        per_second(self.motion_check_fps)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }
}

fn per_second(fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(fps.max(1)))
}

/// Motion sensitivity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_threshold")]
    pub threshold: i32,

    #[serde(default = "default_min_area")]
    pub min_area: u32,

    /// Gaussian kernel size, odd
    #[serde(default = "default_blur_kernel")]
    pub blur_kernel: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_area: default_min_area(),
            blur_kernel: default_blur_kernel(),
        }
    }
}

impl MotionConfig {
    pub fn params(&self) -> MotionParams {
        MotionParams {
            threshold: self.threshold,
            min_area: self.min_area,
            blur_kernel: self.blur_kernel,
        }
    }
}

/// Service loop wait timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Wait used when a send is pending for a connected viewer
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,

    /// Wait used when connected but nothing is due
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Wait used while nobody is watching
    #[serde(default = "default_disconnected_timeout_ms")]
    pub disconnected_timeout_ms: u64,

    /// Statistics reporting interval (seconds, 0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_s: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: default_pending_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            disconnected_timeout_ms: default_disconnected_timeout_ms(),
            stats_interval_s: default_stats_interval(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    2138
}
fn default_outbound_queue() -> usize {
    4
}
fn default_device() -> String {
    "/dev/video0".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_camera_fps() -> u32 {
    30
}
fn default_max_frame_size() -> usize {
    4 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_capture_fps() -> u32 {
    30
}
fn default_preview_fps() -> u32 {
    5
}
fn default_motion_check_fps() -> u32 {
    10
}
fn default_analyze_every_nth() -> u32 {
    1
}
fn default_frame_counter_period() -> u32 {
    30
}
fn default_telemetry_interval_ms() -> u64 {
    5000
}
fn default_threshold() -> i32 {
    20
}
fn default_min_area() -> u32 {
    200
}
fn default_blur_kernel() -> u32 {
    21
}
fn default_pending_timeout_ms() -> u64 {
    5
}
fn default_idle_timeout_ms() -> u64 {
    100
}
fn default_disconnected_timeout_ms() -> u64 {
    250
}
fn default_stats_interval() -> u64 {
    60
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Loads configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".to_string()));
        }

        if self.server.outbound_queue == 0 {
            return Err(ConfigError::Invalid(
                "server.outbound_queue must be > 0".to_string(),
            ));
        }

        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(
                "camera: width and height must be > 0".to_string(),
            ));
        }

        if cam.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "camera.max_frame_size must be > 0".to_string(),
            ));
        }

        let p = &self.pipeline;
        for (name, fps) in [
            ("camera.fps", cam.fps),
            ("pipeline.capture_fps", p.capture_fps),
            ("pipeline.preview_fps", p.preview_fps),
            ("pipeline.motion_check_fps", p.motion_check_fps),
        ] {
            if fps == 0 || fps > 120 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and 120, got {}",
                    name, fps
                )));
            }
        }

        if p.analyze_every_nth == 0 || p.frame_counter_period == 0 {
            return Err(ConfigError::Invalid(
                "pipeline: analyze_every_nth and frame_counter_period must be > 0".to_string(),
            ));
        }

        if p.telemetry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.telemetry_interval_ms must be > 0".to_string(),
            ));
        }

        let blur = self.motion.blur_kernel;
        if blur == 0 || blur % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "motion.blur_kernel must be odd and positive, got {}",
                blur
            )));
        }

        let s = &self.service;
        if s.pending_timeout_ms > s.idle_timeout_ms
            || s.idle_timeout_ms > s.disconnected_timeout_ms
        {
            return Err(ConfigError::Invalid(format!(
                "service timeouts must satisfy pending <= idle <= disconnected ({} / {} / {})",
                s.pending_timeout_ms, s.idle_timeout_ms, s.disconnected_timeout_ms
            )));
        }

        Ok(())
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
