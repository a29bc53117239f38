mod camera;
mod detector;
mod overlay;

use anyhow::{Context, Result};
use camera::OpenCvSource;
use clap::Parser;
use detector::YoloDetector;
use isolation_watch::{AppConfig, SessionControl, Supervisor};
use isolation_watch_visualizer::{start_server, FrameBus, ServerConfig};
use overlay::OverlayRenderer;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "isolation_watch=info,isolation_watch_visualizer=info,live_tester=info,ort=warn";

#[derive(Parser, Debug)]
#[command(name = "live_tester", about = "Live isolation tracking from a camera or video file")]
struct Args {
    /// TOML config file; every section is optional.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Camera device index.
    #[arg(long, conflicts_with = "file")]
    camera: Option<i32>,
    /// Replay a video file instead of a camera.
    #[arg(long, value_name = "PATH")]
    file: Option<String>,
    /// YOLOv8 ONNX model.
    #[arg(long, value_name = "PATH")]
    model: Option<String>,
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
    #[arg(long)]
    distance: Option<u32>,
    /// Start streaming immediately instead of waiting for the dashboard.
    #[arg(long)]
    autostart: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };

    if let Some(index) = args.camera {
        config.camera.index = index;
        config.camera.file = None;
    }
    if let Some(file) = &args.file {
        config.camera.file = Some(file.clone());
    }
    if let Some(model) = &args.model {
        config.detector.model_path = model.clone();
    }
    if let Some(bind) = &args.bind {
        config.server.bind_addr = bind.clone();
    }
    if let Some(distance) = args.distance {
        config.engine.distance_threshold = distance;
    }

    config.engine.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        distance_threshold = config.engine.distance_threshold,
        isolation_time_secs = config.engine.isolation_time_secs,
        model = %config.detector.model_path,
        "Isolation Watch starting"
    );

    // --- 1. Shared Session State ---
    let control = SessionControl::new(&config.engine);
    let bus = FrameBus::new(2);

    // --- 2. Frame Loop ---
    let detector = YoloDetector::new(&config.detector)?;
    info!("✓ Detection model loaded");
    let renderer = OverlayRenderer::new(bus.clone(), config.server.jpeg_quality);
    let camera = config.camera.clone();
    let supervisor = Supervisor::new(
        control.clone(),
        config.engine.clone(),
        move || OpenCvSource::open(&camera),
        detector,
        renderer,
    );
    let frame_loop = tokio::task::spawn_blocking(move || supervisor.run());

    // --- 3. Control Surface ---
    let server = start_server(bus, ServerConfig { bind_addr: config.server.bind_addr.clone() }, control.clone()).await?;
    if args.autostart {
        control.start();
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
        _ = server => info!("web server exited, shutting down"),
    }

    control.shutdown();
    frame_loop.await.context("frame loop panicked")??;
    Ok(())
}
