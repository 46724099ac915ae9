use std::path::PathBuf;

use livecheck_core::{ConfigError, LivenessConfig};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Where saved photos and their sidecars go.
    pub capture_dir: PathBuf,
    /// Optional TOML file with pipeline thresholds and timings.
    pub tuning_path: Option<PathBuf>,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `LIVECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("livecheck");

        Self {
            camera_device: std::env::var("LIVECHECK_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            frame_width: env_u32("LIVECHECK_FRAME_WIDTH", 640),
            frame_height: env_u32("LIVECHECK_FRAME_HEIGHT", 480),
            model_dir: env_path("LIVECHECK_MODEL_DIR").unwrap_or_else(|| data_dir.join("models")),
            capture_dir: env_path("LIVECHECK_CAPTURE_DIR")
                .unwrap_or_else(|| data_dir.join("captures")),
            tuning_path: env_path("LIVECHECK_TUNING"),
            session_bus: std::env::var("LIVECHECK_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_500m.onnx")
    }

    /// Pipeline tuning: the TOML file when configured, defaults otherwise.
    pub fn liveness(&self) -> Result<LivenessConfig, ConfigError> {
        match &self.tuning_path {
            Some(path) => LivenessConfig::load(path),
            None => Ok(LivenessConfig::default()),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
