//! Head movement detection over the face position history.
//!
//! Three signals (path length, maximum excursion from the window start, and
//! direction changes) are OR-combined per tick. A tick where any signal
//! fires bumps the movement score; movement is confirmed once the score
//! reaches the required number of corroborating ticks.

use serde::Deserialize;

use crate::history::PositionHistory;
use crate::types::Point;

/// Tunable thresholds for the movement signals.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MovementThresholds {
    pub total_movement: f32,
    pub max_displacement: f32,
    pub direction_changes: u32,
    pub min_samples: usize,
    /// Ticks with a firing signal needed to confirm movement.
    pub required_score: u32,
}

impl Default for MovementThresholds {
    fn default() -> Self {
        Self {
            total_movement: 15.0,
            max_displacement: 10.0,
            direction_changes: 1,
            min_samples: 3,
            required_score: 3,
        }
    }
}

/// Cumulative movement state for one session. `score` never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementState {
    pub score: u32,
    pub confirmed: bool,
}

/// Raw statistics of a position window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovementAnalysis {
    /// Path length through consecutive samples.
    pub total_movement: f32,
    /// Largest distance from the first sample to any later one.
    pub max_displacement: f32,
    /// Direction changes of the x-deltas plus those of the y-deltas.
    pub direction_changes: u32,
}

impl MovementAnalysis {
    pub fn fires(&self, thresholds: &MovementThresholds) -> bool {
        self.total_movement > thresholds.total_movement
            || self.max_displacement > thresholds.max_displacement
            || self.direction_changes >= thresholds.direction_changes
    }
}

/// Statistics of the whole window.
///
/// Each axis starts with no direction, so the first non-zero delta on an
/// axis already counts as a change.
pub fn analyze(history: &PositionHistory) -> MovementAnalysis {
    let points: Vec<Point> = history.iter().copied().collect();
    let Some(first) = points.first() else {
        return MovementAnalysis::default();
    };

    let total_movement = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
    let max_displacement = points
        .iter()
        .skip(1)
        .map(|p| first.distance(p))
        .fold(0.0f32, f32::max);

    let dx = points.windows(2).map(|w| w[1].x - w[0].x);
    let dy = points.windows(2).map(|w| w[1].y - w[0].y);

    MovementAnalysis {
        total_movement,
        max_displacement,
        direction_changes: sign_changes(dx) + sign_changes(dy),
    }
}

/// Count sign changes in a delta sequence against a last direction that
/// starts at 0. Zero deltas carry no direction and leave the last seen
/// direction unchanged.
fn sign_changes(deltas: impl Iterator<Item = f32>) -> u32 {
    let mut last = 0i8;
    let mut changes = 0;
    for d in deltas {
        if d == 0.0 {
            continue;
        }
        let sign = if d > 0.0 { 1 } else { -1 };
        if sign != last {
            changes += 1;
        }
        last = sign;
    }
    changes
}

/// Push `position` and returns true when movement is newly confirmed.
///
/// Once confirmed the state is terminal: later calls return false and leave
/// both the history and the state untouched.
pub fn evaluate(
    position: Point,
    history: &mut PositionHistory,
    state: &mut MovementState,
    thresholds: &MovementThresholds,
) -> bool {
    if state.confirmed {
        return false;
    }

    history.push(position);
    if history.len() < thresholds.min_samples {
        return false;
    }

    let analysis = analyze(history);
    if analysis.fires(thresholds) {
        state.score += 1;
        tracing::debug!(
            score = state.score,
            total = analysis.total_movement,
            max = analysis.max_displacement,
            changes = analysis.direction_changes,
            "movement signal"
        );
    }

    if state.score >= thresholds.required_score {
        state.confirmed = true;
        tracing::info!(score = state.score, "movement confirmed");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::position_history;

    #[test]
    fn test_scenario_l_shaped_path() {
        let thresholds = MovementThresholds::default();
        let mut history = position_history();
        let mut state = MovementState::default();

        assert!(!evaluate(Point::new(0.0, 0.0), &mut history, &mut state, &thresholds));
        assert!(!evaluate(Point::new(20.0, 0.0), &mut history, &mut state, &thresholds));
        assert_eq!(state.score, 0);
        assert!(!evaluate(Point::new(20.0, 20.0), &mut history, &mut state, &thresholds));

        let analysis = analyze(&history);
        assert!((analysis.total_movement - 40.0).abs() < 1e-4);
        assert!(analysis.direction_changes >= 1);
        assert_eq!(analysis.direction_changes, 2);
        assert!((analysis.max_displacement - 800.0f32.sqrt()).abs() < 1e-3);
        assert_eq!(state.score, 1);
        assert!(!state.confirmed);
    }

    #[test]
    fn test_confirmed_after_three_corroborating_ticks() {
        let thresholds = MovementThresholds::default();
        let mut history = position_history();
        let mut state = MovementState::default();
        let path = [(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0), (0.0, 0.0)];

        let results: Vec<bool> = path
            .iter()
            .map(|&(x, y)| evaluate(Point::new(x, y), &mut history, &mut state, &thresholds))
            .collect();

        assert_eq!(results, vec![false, false, false, false, true]);
        assert_eq!(state.score, 3);
        assert!(state.confirmed);
    }

    #[test]
    fn test_confirmation_is_terminal() {
        let thresholds = MovementThresholds { required_score: 1, ..Default::default() };
        let mut history = position_history();
        let mut state = MovementState::default();
        for p in [(0.0, 0.0), (30.0, 0.0)] {
            evaluate(Point::new(p.0, p.1), &mut history, &mut state, &thresholds);
        }
        assert!(evaluate(Point::new(60.0, 0.0), &mut history, &mut state, &thresholds));
        let len = history.len();
        assert!(!evaluate(Point::new(90.0, 0.0), &mut history, &mut state, &thresholds));
        assert_eq!(history.len(), len);
        assert_eq!(state.score, 1);
    }

    #[test]
    fn test_still_face_never_scores() {
        let thresholds = MovementThresholds::default();
        let mut history = position_history();
        let mut state = MovementState::default();
        for _ in 0..30 {
            let p = Point::new(100.0, 80.0);
            assert!(!evaluate(p, &mut history, &mut state, &thresholds));
        }
        assert_eq!(analyze(&history), MovementAnalysis::default());
        assert_eq!(state.score, 0);
    }

    #[test]
    fn test_first_step_counts_as_direction_change() {
        let mut history = position_history();
        for x in [0.0, 0.5, 1.0] {
            history.push(Point::new(x, 0.0));
        }
        let analysis = analyze(&history);
        assert_eq!(analysis.direction_changes, 1);
        assert!(analysis.total_movement < 15.0);
        assert!(analysis.fires(&MovementThresholds::default()));
    }

    #[test]
    fn test_score_is_monotonic() {
        let thresholds = MovementThresholds { required_score: 100, ..Default::default() };
        let mut history = position_history();
        let mut state = MovementState::default();
        let mut previous = 0;
        for i in 0..50 {
            let x = if i % 7 < 3 { 0.0 } else { 12.0 };
            evaluate(Point::new(x, 0.0), &mut history, &mut state, &thresholds);
            assert!(state.score >= previous);
            assert!(state.score - previous <= 1);
            previous = state.score;
        }
        assert!(state.score > 0);
    }

    #[test]
    fn test_direction_changes_skip_zero_deltas() {
        let mut history = position_history();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (0.0, 0.0), (0.0, 1.0), (0.0, 0.0)] {
            history.push(Point::new(x, y));
        }
        // x: +1, 0, -1, 0, 0 → two changes; y: 0, 0, 0, +1, -1 → two changes
        assert_eq!(analyze(&history).direction_changes, 4);
    }

    #[test]
    fn test_analyze_empty() {
        assert_eq!(analyze(&position_history()), MovementAnalysis::default());
    }
}
