//! Verification session state.
//!
//! [`VerificationSession`] is the whole mutable state of one liveness check.
//! It is owned by the [`Verifier`](crate::verifier::Verifier) and handed by
//! reference to the detectors; nothing lives in module-level state.

use serde::Serialize;

use crate::blink::BlinkState;
use crate::capture::{CapturedImage, SaveReceipt};
use crate::history::{position_history, MetricHistory, PositionHistory};
use crate::movement::MovementState;
use crate::scheduler::TimerId;
use crate::types::FaceBox;

/// Verification steps, in their only legal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    Face,
    Blink,
    Move,
    Complete,
    Capture,
}

impl Step {
    /// The step that follows this one, if any.
    pub fn next(self) -> Option<Step> {
        match self {
            Step::Idle => Some(Step::Face),
            Step::Face => Some(Step::Blink),
            Step::Blink => Some(Step::Move),
            Step::Move => Some(Step::Complete),
            Step::Complete => Some(Step::Capture),
            Step::Capture => None,
        }
    }

    /// Steps during which the detection loop runs.
    pub fn is_sampling(self) -> bool {
        matches!(self, Step::Face | Step::Blink | Step::Move | Step::Complete)
    }

    pub fn guidance(self) -> &'static str {
        match self {
            Step::Idle => "Press start to begin the liveness check",
            Step::Face => "Position your face inside the frame",
            Step::Blink => "Blink naturally",
            Step::Move => "Slowly turn your head left and right",
            Step::Complete => "Verification complete, take your photo",
            Step::Capture => "Hold still",
        }
    }
}

/// Running countdown owned by the step that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub remaining: u32,
    pub timer: Option<TimerId>,
    pub started_in: Step,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSession {
    step: Step,
    pub(crate) face: Option<FaceBox>,
    pub(crate) face_lost: bool,
    /// Dimensions of the most recently analysed frame.
    pub(crate) frame_size: Option<(u32, u32)>,
    pub(crate) metrics: MetricHistory,
    pub(crate) positions: PositionHistory,
    pub(crate) blink: BlinkState,
    pub(crate) movement: MovementState,
    pub(crate) countdown: Option<Countdown>,
    pub(crate) sampling: Option<TimerId>,
    pub(crate) captured: Option<CapturedImage>,
    pub(crate) last_error: Option<String>,
}

impl Default for VerificationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationSession {
    pub fn new() -> Self {
        Self {
            step: Step::Idle,
            face: None,
            face_lost: false,
            frame_size: None,
            metrics: MetricHistory::new(),
            positions: position_history(),
            blink: BlinkState::default(),
            movement: MovementState::default(),
            countdown: None,
            sampling: None,
            captured: None,
            last_error: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn face(&self) -> Option<&FaceBox> {
        self.face.as_ref()
    }

    pub fn metrics(&self) -> &MetricHistory {
        &self.metrics
    }

    pub fn positions(&self) -> &PositionHistory {
        &self.positions
    }

    pub fn blink(&self) -> &BlinkState {
        &self.blink
    }

    pub fn movement(&self) -> &MovementState {
        &self.movement
    }

    pub fn countdown(&self) -> Option<&Countdown> {
        self.countdown.as_ref()
    }

    pub fn captured(&self) -> Option<&CapturedImage> {
        self.captured.as_ref()
    }

    /// Back to a freshly created session. Timers recorded here must already
    /// have been cancelled by the caller.
    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    /// Move from `from` to the following step.
    ///
    /// Returns false, changing nothing, when the session is no longer in
    /// `from`. This makes racing manual and automatic transitions harmless.
    pub(crate) fn advance(&mut self, from: Step) -> bool {
        if self.step != from {
            return false;
        }
        let Some(to) = from.next() else {
            return false;
        };
        tracing::info!(?from, ?to, "verification step");
        self.step = to;
        true
    }

    /// Record this tick's detection result.
    pub(crate) fn observe_face(&mut self, face: Option<FaceBox>, frame_size: (u32, u32)) {
        let had_face = self.face.is_some() || self.step > Step::Face;
        self.face_lost = face.is_none() && had_face;
        if self.face_lost && self.face.is_some() {
            tracing::debug!(step = ?self.step, "face lost");
        }
        self.face = face;
        self.frame_size = Some(frame_size);
    }

    /// Manual confirmation is offered once the step's countdown ran out.
    pub fn manual_confirm_available(&self) -> bool {
        matches!(self.step, Step::Blink | Step::Move)
            && self
                .countdown
                .is_some_and(|c| c.started_in == self.step && c.remaining == 0)
    }

    pub fn status(&self) -> Status {
        Status {
            step: self.step,
            face_detected: self.face.is_some(),
            face_lost: self.face_lost,
            blink_count: self.blink.count,
            blink_confirmed: self.blink.confirmed,
            movement_score: self.movement.score,
            movement_confirmed: self.movement.confirmed,
            countdown: self.countdown.map(|c| c.remaining),
            manual_confirm_available: self.manual_confirm_available(),
            message: self.message(),
            error: self.last_error.clone(),
            pending_capture: self.captured.as_ref().map(|c| c.id.to_string()),
            saved: None,
        }
    }

    fn message(&self) -> String {
        if self.face_lost {
            return "Face lost, look back at the camera".to_string();
        }
        if self.manual_confirm_available() {
            return match self.step {
                Step::Blink => "No blink detected yet. Confirm once you have blinked",
                _ => "No movement detected yet. Confirm once you have moved your head",
            }
            .to_string();
        }
        match (self.step, self.countdown) {
            (Step::Capture, Some(c)) if c.remaining > 0 => format!("Photo in {}", c.remaining),
            (step, _) => step.guidance().to_string(),
        }
    }
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub step: Step,
    pub face_detected: bool,
    pub face_lost: bool,
    pub blink_count: u32,
    pub blink_confirmed: bool,
    pub movement_score: u32,
    pub movement_confirmed: bool,
    pub countdown: Option<u32>,
    pub manual_confirm_available: bool,
    pub message: String,
    pub error: Option<String>,
    /// Id of a capture that still awaits a successful save.
    pub pending_capture: Option<String>,
    /// Receipt of the capture saved by the operation that produced this
    /// snapshot.
    pub saved: Option<SaveReceipt>,
}
