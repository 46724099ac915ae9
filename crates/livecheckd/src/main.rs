use anyhow::Result;
use livecheck_core::{FaceDetector, ScrfdDetector, Verifier};
use livecheck_hw::V4lCamera;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod sink;

use config::Config;
use dbus_interface::{VerifierService, BUS_NAME, OBJECT_PATH};
use sink::DirectorySink;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("livecheckd starting");

    let config = Config::from_env();
    let liveness = config.liveness()?;
    tracing::info!(
        device = %config.camera_device,
        model = %config.scrfd_model_path().display(),
        captures = %config.capture_dir.display(),
        "configuration loaded"
    );

    let engine = {
        let config = config.clone();
        engine::spawn_engine(move |scheduler| {
            let mut detector = ScrfdDetector::new(config.scrfd_model_path());
            // Retried by every Start.
            if let Err(e) = detector.prepare() {
                tracing::warn!(error = %e, "detector not loaded yet");
            }
            let camera = V4lCamera::new(
                config.camera_device.clone(),
                config.frame_width,
                config.frame_height,
            );
            Verifier::new(
                liveness,
                detector,
                camera,
                scheduler,
                DirectorySink::new(config.capture_dir.clone()),
            )
        })?
    };

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, VerifierService::new(engine))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, session_bus = config.session_bus, "livecheckd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("livecheckd shutting down");

    Ok(())
}
