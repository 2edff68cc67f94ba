//! Single-camera motion streamer

use anyhow::{Context, Result};
use cam_motion_streamer::camera::{self, FrameSink};
use cam_motion_streamer::config::Config;
use cam_motion_streamer::motion::MotionDetector;
use cam_motion_streamer::pipeline::{Cadence, CaptureIntake, SharedPipeline};
use cam_motion_streamer::service::{self, ServiceLoop};
use cam_motion_streamer::transport::WsServer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cam-motion-streamer")]
#[command(about = "Streams camera preview frames and motion telemetry to one WebSocket viewer")]
#[command(version)]
struct Cli {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the camera device path
    #[arg(short, long)]
    device: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Fatal error");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => fmt().with_env_filter(filter).with_target(false).init(),
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            Config::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(device) = &cli.device {
        config.camera.device = device.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    info!("Camera motion streamer starting");
    let config = load_config(&cli)?;

    info!(
        device = %config.camera.device,
        resolution = %format!("{}x{}", config.camera.width, config.camera.height),
        capture_fps = config.pipeline.capture_fps,
        preview_fps = config.pipeline.preview_fps,
        telemetry_ms = config.pipeline.telemetry_interval_ms,
        threshold = config.motion.threshold,
        min_area = config.motion.min_area,
        blur_kernel = config.motion.blur_kernel,
        "Configuration loaded"
    );

    let detector =
        MotionDetector::new(config.motion.params()).context("failed to initialize motion detector")?;

    let pipeline = Arc::new(SharedPipeline::new(Cadence::from(&config.pipeline)));
    let (events, event_rx) = service::channel();

    let intake: Arc<dyn FrameSink> = Arc::new(CaptureIntake::new(
        Arc::clone(&pipeline),
        detector,
        events.clone(),
        &config.camera,
    ));
    let camera = camera::open(&config.camera, intake).context("failed to open camera")?;

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let server = WsServer::bind(&addr, events.clone(), config.server.outbound_queue)
        .await
        .context("failed to start WebSocket server")?;
    info!(addr = %server.local_addr()?, "Listening for viewer");

    let server_task = tokio::spawn(server.run());

    let stop = Arc::new(AtomicBool::new(false));
    let mut service_loop = ServiceLoop::new(
        Arc::clone(&pipeline),
        camera,
        event_rx,
        Arc::clone(&stop),
        &config.service,
    );
    let mut loop_task = tokio::task::spawn_blocking(move || service_loop.run());

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutting down");
            stop.store(true, Ordering::Release);
            events.shutdown();
            if let Err(e) = (&mut loop_task).await {
                warn!(error = %e, "Service loop task failed");
            }
        }
        result = &mut loop_task => {
            if let Err(e) = result {
                warn!(error = %e, "Service loop task failed");
            }
        }
    }

    server_task.abort();
    info!(stats = ?pipeline.stats(), "Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
