use anyhow::{Context, Result};
use rollcall_core::{FaceAnalyzer, OnnxFaceAnalyzer};
use rollcall_hw::{Camera, FrameSource, StillImageSource};
use rollcall_store::{EmbeddingCipher, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod kiosk;
mod session;

use config::{BusKind, Config};
use dbus_interface::{KioskService, BUS_NAME, OBJECT_PATH};
use engine::{spawn_engine, CaptureSettings};
use kiosk::{Kiosk, KioskSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let cipher = EmbeddingCipher::load_or_create(&config.key_path)
        .context("failed to load embedding key")?;
    let store = Store::open(&config.db_path, cipher)
        .await
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    let source = open_source(&config)?;
    tracing::info!(source = %source.describe(), "frame source ready");

    let analyzer: Box<dyn FaceAnalyzer + Send> = Box::new(
        OnnxFaceAnalyzer::load(
            &config.scrfd_model_path(),
            &config.arcface_model_path(),
            config.detection_threshold,
            config.quality_gate(),
        )
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?,
    );
    tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");

    let engine = spawn_engine(
        source,
        analyzer,
        CaptureSettings {
            frames_per_capture: config.frames_per_capture,
            timeout: Duration::from_secs(config.capture_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        },
        config.warmup_frames,
    )?;

    let kiosk = Arc::new(Kiosk::new(
        store,
        engine,
        KioskSettings {
            match_threshold: config.match_threshold,
            top_k: config.top_k,
            result_hold: Duration::from_millis(config.result_hold_ms),
        },
    ));

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, KioskService::new(Arc::clone(&kiosk)))?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(
        bus = ?config.bus,
        name = BUS_NAME,
        threshold = config.match_threshold,
        "rollcalld ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Still photos when `image_dir` is set, otherwise the V4L2 camera.
fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &config.image_dir {
        let source = StillImageSource::open(dir)
            .with_context(|| format!("failed to load images from {}", dir.display()))?;
        return Ok(Box::new(source));
    }
    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    Ok(Box::new(camera))
}
