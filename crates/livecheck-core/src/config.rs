//! Pipeline tuning.
//!
//! Every threshold and timing constant of the liveness pipeline lives here.
//! Defaults reproduce the empirically tuned values; a TOML file may override
//! any subset of them.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::blink::BlinkThresholds;
use crate::detector::{DetectOptions, FaceSelection};
use crate::movement::MovementThresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read tuning file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid tuning file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid tuning value: {0}")]
    Invalid(String),
}

/// Timer periods and countdown lengths.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Period of the detection loop.
    pub tick_interval_ms: u64,
    /// Period of countdown decrements.
    pub countdown_step_ms: u64,
    /// Seconds before manual blink confirmation is offered.
    pub blink_countdown: u32,
    /// Seconds before manual movement confirmation is offered.
    pub move_countdown: u32,
    /// Seconds between "take photo" and the capture.
    pub capture_countdown: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            countdown_step_ms: 1000,
            blink_countdown: 5,
            move_countdown: 5,
            capture_countdown: 3,
        }
    }
}

impl Timing {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn countdown_step(&self) -> Duration {
        Duration::from_millis(self.countdown_step_ms)
    }
}

/// Complete tuning for one verification session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub blink: BlinkThresholds,
    pub movement: MovementThresholds,
    pub timing: Timing,
    pub detect: DetectOptions,
    pub face_selection: FaceSelection,
    /// Width of the downscaled analysis canvas; frames narrower than this
    /// are analysed at full size.
    pub analysis_width: u32,
    /// Padding around the face box when cropping the captured photo.
    pub crop_padding: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            blink: BlinkThresholds::default(),
            movement: MovementThresholds::default(),
            timing: Timing::default(),
            detect: DetectOptions::default(),
            face_selection: FaceSelection::default(),
            analysis_width: 320,
            crop_padding: 50,
        }
    }
}

impl LivenessConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), "loaded tuning file");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.tick_interval_ms == 0 || self.timing.countdown_step_ms == 0 {
            return Err(ConfigError::Invalid("timer periods must be non-zero".into()));
        }
        if self.detect.input_size == 0 || self.detect.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "detect.input_size must be a positive multiple of 32, got {}",
                self.detect.input_size
            )));
        }
        if !(0.0..=1.0).contains(&self.detect.score_threshold) {
            return Err(ConfigError::Invalid(format!(
                "detect.score_threshold must be in [0, 1], got {}",
                self.detect.score_threshold
            )));
        }
        if self.blink.min_samples < 5 {
            // the drop-then-rise pattern reads offset −5
            return Err(ConfigError::Invalid("blink.min_samples must be at least 5".into()));
        }
        if self.movement.min_samples < 2 {
            return Err(ConfigError::Invalid("movement.min_samples must be at least 2".into()));
        }
        Ok(())
    }
}
