//! Blink detection over the eye metric history.
//!
//! Four independent signals are OR-combined: brightness variance,
//! edge-density variance, the latest brightness derivative, and a
//! drop-then-rise shape sampled at offsets −5, −3 and −1. A positive result
//! is only accepted once per debounce interval.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::history::{MetricHistory, RollingWindow};

/// Tunable thresholds for the blink signals.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlinkThresholds {
    pub brightness_variance: f32,
    pub edge_variance: f32,
    pub brightness_derivative: f32,
    /// The middle sample must fall below this fraction of the first.
    pub pattern_drop: f32,
    /// The last sample must rise above this multiple of the middle one.
    pub pattern_rise: f32,
    /// Samples required before any signal is evaluated.
    pub min_samples: usize,
    /// Minimum time between two accepted blinks.
    pub debounce_ms: u64,
}

impl Default for BlinkThresholds {
    fn default() -> Self {
        Self {
            brightness_variance: 0.0008,
            edge_variance: 0.01,
            brightness_derivative: 0.02,
            pattern_drop: 0.9,
            pattern_rise: 1.05,
            min_samples: 5,
            debounce_ms: 1000,
        }
    }
}

impl BlinkThresholds {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Cumulative blink state for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlinkState {
    pub count: u32,
    pub last_blink: Option<Instant>,
    pub confirmed: bool,
}

/// Individual signal outcomes for one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlinkSignals {
    pub brightness_variance: bool,
    pub edge_variance: bool,
    pub brightness_derivative: bool,
    pub pattern: bool,
}

impl BlinkSignals {
    pub fn any(&self) -> bool {
        self.brightness_variance || self.edge_variance || self.brightness_derivative || self.pattern
    }
}

/// Evaluate every signal. All false when the history is too short.
pub fn signals(history: &MetricHistory, thresholds: &BlinkThresholds) -> BlinkSignals {
    if history.len() < thresholds.min_samples {
        return BlinkSignals::default();
    }

    BlinkSignals {
        brightness_variance: history.brightness.variance() > thresholds.brightness_variance,
        edge_variance: history.edge_density.variance() > thresholds.edge_variance,
        brightness_derivative: history.brightness.derivative().abs()
            > thresholds.brightness_derivative,
        pattern: drop_then_rise(&history.brightness, thresholds)
            || drop_then_rise(&history.edge_density, thresholds),
    }
}

fn drop_then_rise(window: &RollingWindow<f32>, thresholds: &BlinkThresholds) -> bool {
    let (Some(&early), Some(&mid), Some(&late)) = (window.back(5), window.back(3), window.back(1))
    else {
        return false;
    };
    mid < thresholds.pattern_drop * early && late > thresholds.pattern_rise * mid
}

/// Returns true when a blink is newly detected at `now`.
///
/// A firing signal inside the debounce interval of the previous accepted
/// blink is ignored and leaves `state` untouched.
pub fn evaluate(
    history: &MetricHistory,
    state: &mut BlinkState,
    now: Instant,
    thresholds: &BlinkThresholds,
) -> bool {
    let fired = signals(history, thresholds);
    if !fired.any() {
        return false;
    }

    if let Some(last) = state.last_blink {
        if now.saturating_duration_since(last) <= thresholds.debounce() {
            tracing::trace!(?fired, "blink signal inside debounce window");
            return false;
        }
    }

    state.count += 1;
    state.last_blink = Some(now);
    state.confirmed = true;
    tracing::debug!(count = state.count, ?fired, "blink detected");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FrameMetrics;

    fn sample(brightness: f32, edge_density: f32) -> FrameMetrics {
        FrameMetrics { brightness, edge_density, contrast: 0.1 }
    }

    fn history_of(brightness: &[f32]) -> MetricHistory {
        let mut h = MetricHistory::new();
        for &b in brightness {
            h.push(sample(b, 0.2));
        }
        h
    }

    #[test]
    fn test_constant_frames_never_blink() {
        let thresholds = BlinkThresholds::default();
        let mut state = BlinkState::default();
        let mut history = MetricHistory::new();
        let start = Instant::now();

        for i in 0..20 {
            history.push(sample(0.5, 0.2));
            let now = start + Duration::from_millis(100 * i);
            assert!(!evaluate(&history, &mut state, now, &thresholds));
        }
        assert_eq!(state, BlinkState::default());
    }

    #[test]
    fn test_too_few_samples() {
        let history = history_of(&[0.5, 0.1, 0.9, 0.1]);
        let s = signals(&history, &BlinkThresholds::default());
        assert_eq!(s, BlinkSignals::default());
    }

    #[test]
    fn test_drop_then_rise_detected_once() {
        let thresholds = BlinkThresholds::default();
        let mut state = BlinkState::default();
        // offsets: −5 = 0.5, −3 = 0.4 (20% drop), −1 = 0.45 (12.5% rise)
        let mut history = history_of(&[0.5, 0.45, 0.4, 0.42, 0.45]);

        let s = signals(&history, &thresholds);
        assert!(s.pattern);

        let now = Instant::now();
        assert!(evaluate(&history, &mut state, now, &thresholds));
        assert_eq!(state.count, 1);
        assert!(state.confirmed);

        // Next frame at the same timestamp is debounced.
        history.push(sample(0.45, 0.2));
        assert!(!evaluate(&history, &mut state, now, &thresholds));
        assert_eq!(state.count, 1);
    }

    #[test]
    fn test_pattern_in_edge_density() {
        let thresholds = BlinkThresholds {
            edge_variance: 1.0,
            ..BlinkThresholds::default()
        };
        let mut h = MetricHistory::new();
        for e in [0.30, 0.30, 0.20, 0.25, 0.25] {
            h.push(sample(0.5, e));
        }
        let s = signals(&h, &thresholds);
        assert!(s.pattern);
        assert!(!s.brightness_variance);
        assert!(!s.brightness_derivative);
    }

    #[test]
    fn test_derivative_signal() {
        let thresholds = BlinkThresholds::default();
        let history = history_of(&[0.5, 0.5, 0.5, 0.5, 0.53]);
        let s = signals(&history, &thresholds);
        assert!(s.brightness_derivative);
        assert!(!s.pattern);
    }

    #[test]
    fn test_variance_signal() {
        let thresholds = BlinkThresholds::default();
        // Alternating 0.45 / 0.55: variance 0.0025 > 0.0008
        let history = history_of(&[0.45, 0.55, 0.45, 0.55, 0.45, 0.55]);
        assert!(signals(&history, &thresholds).brightness_variance);
    }

    #[test]
    fn test_debounce_window() {
        let thresholds = BlinkThresholds::default();
        let mut state = BlinkState::default();
        let history = history_of(&[0.45, 0.55, 0.45, 0.55, 0.45, 0.55]);
        let t0 = Instant::now();

        assert!(evaluate(&history, &mut state, t0, &thresholds));
        for ms in [0, 1, 500, 999, 1000] {
            assert!(
                !evaluate(&history, &mut state, t0 + Duration::from_millis(ms), &thresholds),
                "accepted at +{ms}ms"
            );
        }
        assert!(evaluate(&history, &mut state, t0 + Duration::from_millis(1001), &thresholds));
        assert_eq!(state.count, 2);
        assert_eq!(state.last_blink, Some(t0 + Duration::from_millis(1001)));
    }
}
