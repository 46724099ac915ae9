//! Verification state machine.
//!
//! Drives a [`VerificationSession`] through face → blink → move → complete →
//! capture. Every input is an event: a fired timer or a user action. Each
//! event is handled to completion before the next, so detection ticks never
//! overlap.
//!
//! Error policy:
//! - acquisition failures (camera start, detector load, still capture) are
//!   fatal: the session is reset to idle and the error returned;
//! - anything that goes wrong inside a detection tick only skips that tick,
//!   including a panic raised by the detector;
//! - a failed save keeps the photo for [`Verifier::retry_save`].

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use image::{imageops, imageops::FilterType, RgbaImage};
use thiserror::Error;

use crate::blink;
use crate::capture::{CaptureSink, CapturedImage, SaveReceipt};
use crate::config::LivenessConfig;
use crate::detector::{select_face, DetectorError, FaceDetector};
use crate::metrics::FrameMetrics;
use crate::movement;
use crate::regions::sample_eye_regions;
use crate::scheduler::{Scheduler, TimerId, TimerKind};
use crate::session::{Countdown, Status, Step, VerificationSession};
use crate::source::{FrameSource, SourceError};
use crate::types::FaceBox;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("camera error: {0}")]
    Camera(#[from] SourceError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no captured photo awaiting save")]
    NothingToSave,
}

pub struct Verifier<D, S, K, P>
where
    D: FaceDetector,
    S: FrameSource,
    K: Scheduler,
    P: CaptureSink,
{
    config: LivenessConfig,
    session: VerificationSession,
    detector: D,
    source: S,
    scheduler: K,
    sink: P,
    generation: u64,
    last_saved: Option<SaveReceipt>,
}

impl<D, S, K, P> Verifier<D, S, K, P>
where
    D: FaceDetector,
    S: FrameSource,
    K: Scheduler,
    P: CaptureSink,
{
    pub fn new(config: LivenessConfig, detector: D, source: S, scheduler: K, sink: P) -> Self {
        Self {
            config,
            session: VerificationSession::new(),
            detector,
            source,
            scheduler,
            sink,
            generation: 0,
            last_saved: None,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    pub fn scheduler(&self) -> &K {
        &self.scheduler
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    pub fn status(&self) -> Status {
        let mut status = self.session.status();
        status.saved = self.last_saved.clone();
        status
    }

    /// Start (or restart) a scan: reset, acquire the detector and camera,
    /// then begin sampling.
    pub fn start(&mut self) -> Result<Status, VerifyError> {
        self.reset();

        if let Err(e) = self.acquire() {
            return Err(self.fail(e));
        }

        self.session.advance(Step::Idle);
        let id = self.start_timer(TimerKind::Sampling, self.config.timing.tick_interval());
        self.session.sampling = Some(id);
        tracing::info!("verification started");
        Ok(self.status())
    }

    fn acquire(&mut self) -> Result<(), VerifyError> {
        self.detector.prepare()?;
        self.source.start()?;
        Ok(())
    }

    /// Abort everything and return to idle. Idempotent.
    pub fn reset(&mut self) -> Status {
        self.release();
        self.session.clear();
        self.last_saved = None;
        self.status()
    }

    /// Cancel all timers and stop the camera.
    fn release(&mut self) {
        if let Some(id) = self.session.sampling.take() {
            self.scheduler.cancel(id);
        }
        self.cancel_countdown();
        self.source.stop();
    }

    /// Reset after a fatal error, leaving the message for the user.
    fn fail(&mut self, err: VerifyError) -> VerifyError {
        tracing::warn!(error = %err, step = ?self.session.step(), "verification aborted");
        self.reset();
        self.session.last_error = Some(err.to_string());
        err
    }

    /// Handle a fired timer. Fires of cancelled or superseded timers are
    /// ignored.
    pub fn on_timer(&mut self, id: TimerId, now: Instant) -> Result<Status, VerifyError> {
        match id.kind {
            TimerKind::Sampling if self.session.sampling == Some(id) => self.tick(now),
            TimerKind::Countdown
                if self.session.countdown.and_then(|c| c.timer) == Some(id) =>
            {
                self.countdown_step()?;
            }
            _ => tracing::trace!(?id, "ignoring stale timer"),
        }
        Ok(self.status())
    }

    /// User confirms a blink after the automatic check timed out.
    pub fn confirm_blink(&mut self) -> Status {
        self.manual_advance(Step::Blink);
        self.status()
    }

    /// User confirms head movement after the automatic check timed out.
    pub fn confirm_movement(&mut self) -> Status {
        self.manual_advance(Step::Move);
        self.status()
    }

    fn manual_advance(&mut self, step: Step) {
        if self.session.step() == step && self.session.manual_confirm_available() {
            tracing::info!(?step, "manual confirmation");
            self.advance_from(step);
        } else {
            tracing::debug!(?step, current = ?self.session.step(), "manual confirmation ignored");
        }
    }

    /// Begin the capture countdown once verification is complete.
    pub fn take_photo(&mut self) -> Result<Status, VerifyError> {
        if self.advance_from(Step::Complete) && self.countdown_expired() {
            self.capture()?;
        }
        Ok(self.status())
    }

    /// Resubmit a retained photo whose save failed.
    pub fn retry_save(&mut self) -> Result<Status, VerifyError> {
        self.save()?;
        Ok(self.status())
    }

    /// One detection cycle.
    fn tick(&mut self, now: Instant) {
        let step = self.session.step();
        if !step.is_sampling() {
            return;
        }

        let frame = match self.source.frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "frame unavailable, skipping tick");
                return;
            }
        };

        // A panicking detector must not take the sampling loop down with it.
        let detector = &mut self.detector;
        let options = &self.config.detect;
        let detect = AssertUnwindSafe(|| detector.detect(&frame, options));
        let faces = match panic::catch_unwind(detect) {
            Ok(Ok(faces)) => faces,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "detection failed, skipping tick");
                return;
            }
            Err(payload) => {
                tracing::warn!(reason = panic_reason(&*payload), "detector panicked, skipping tick");
                return;
            }
        };

        let (width, height) = frame.dimensions();
        let face = select_face(&faces, self.config.face_selection, width, height);
        self.session.observe_face(face, (width, height));
        let Some(face) = face else {
            return;
        };

        let sample = self.sample_eyes(&frame, &face);
        if let Some(sample) = sample {
            self.session.metrics.push(sample);
        }

        match step {
            Step::Face => {
                self.advance_from(Step::Face);
            }
            Step::Blink if sample.is_some() => {
                let session = &mut self.session;
                if blink::evaluate(&session.metrics, &mut session.blink, now, &self.config.blink) {
                    self.advance_from(Step::Blink);
                }
            }
            Step::Move => {
                let session = &mut self.session;
                if movement::evaluate(
                    face.center(),
                    &mut session.positions,
                    &mut session.movement,
                    &self.config.movement,
                ) {
                    self.advance_from(Step::Move);
                }
            }
            _ => {}
        }
    }

    /// Average eye metrics on the analysis canvas. `None` when either eye
    /// region is empty.
    fn sample_eyes(&self, frame: &RgbaImage, face: &FaceBox) -> Option<FrameMetrics> {
        let canvas = analysis_canvas(frame, self.config.analysis_width);
        let (cw, ch) = canvas.dimensions();
        let regions = sample_eye_regions(Some(face), cw, frame.width(), frame.height());

        let left = regions.left.to_pixel_rect(cw, ch);
        let right = regions.right.to_pixel_rect(cw, ch);
        if left.is_empty() || right.is_empty() {
            tracing::debug!(?left, ?right, "empty eye region, skipping sample");
            return None;
        }

        Some(FrameMetrics::mean(
            &FrameMetrics::from_canvas(&canvas, left),
            &FrameMetrics::from_canvas(&canvas, right),
        ))
    }

    /// Guarded transition plus the timer bookkeeping of the new step.
    fn advance_from(&mut self, from: Step) -> bool {
        if !self.session.advance(from) {
            return false;
        }
        self.cancel_countdown();

        let timing = &self.config.timing;
        match self.session.step() {
            Step::Blink => self.start_countdown(timing.blink_countdown),
            Step::Move => self.start_countdown(timing.move_countdown),
            Step::Capture => {
                if let Some(id) = self.session.sampling.take() {
                    self.scheduler.cancel(id);
                }
                self.start_countdown(timing.capture_countdown);
            }
            _ => {}
        }
        true
    }

    fn start_timer(&mut self, kind: TimerKind, period: std::time::Duration) -> TimerId {
        self.generation += 1;
        let id = TimerId { kind, generation: self.generation };
        self.scheduler.start(id, period);
        id
    }

    fn start_countdown(&mut self, seconds: u32) {
        let timer = (seconds > 0)
            .then(|| self.start_timer(TimerKind::Countdown, self.config.timing.countdown_step()));
        self.session.countdown = Some(Countdown {
            remaining: seconds,
            timer,
            started_in: self.session.step(),
        });
    }

    fn cancel_countdown(&mut self) {
        if let Some(countdown) = self.session.countdown.take() {
            if let Some(id) = countdown.timer {
                self.scheduler.cancel(id);
            }
        }
    }

    fn countdown_expired(&self) -> bool {
        self.session.countdown.is_some_and(|c| c.remaining == 0)
    }

    fn countdown_step(&mut self) -> Result<(), VerifyError> {
        let Some(mut countdown) = self.session.countdown else {
            return Ok(());
        };
        countdown.remaining = countdown.remaining.saturating_sub(1);
        if countdown.remaining == 0 {
            if let Some(id) = countdown.timer.take() {
                self.scheduler.cancel(id);
            }
            tracing::debug!(step = ?self.session.step(), "countdown finished");
        }
        self.session.countdown = Some(countdown);

        if countdown.remaining == 0 && self.session.step() == Step::Capture {
            self.capture()?;
        }
        Ok(())
    }

    /// Take the still, crop it to the face and hand it to persistence.
    fn capture(&mut self) -> Result<(), VerifyError> {
        let still = match self.source.still() {
            Ok(still) => still,
            Err(e) => return Err(self.fail(e.into())),
        };

        let face = self.session.face.map(|face| {
            match self.session.frame_size {
                Some((fw, _)) if fw > 0 && fw != still.width() => {
                    face.scaled(still.width() as f32 / fw as f32)
                }
                _ => face,
            }
        });

        let captured = CapturedImage::from_still(&still, face, self.config.crop_padding);
        tracing::info!(
            id = %captured.id,
            crop = ?captured.crop,
            face = face.is_some(),
            "photo captured"
        );
        self.session.captured = Some(captured);
        self.source.stop();

        self.save()
    }

    fn save(&mut self) -> Result<(), VerifyError> {
        let captured = self.session.captured.as_ref().ok_or(VerifyError::NothingToSave)?;
        match self.sink.save(captured) {
            Ok(receipt) => {
                tracing::info!(id = %receipt.id, location = ?receipt.location, "photo saved");
                self.reset();
                self.last_saved = Some(receipt);
            }
            Err(e) => {
                tracing::warn!(error = %e, "saving photo failed; keeping it for retry");
                self.session.last_error = Some(format!("could not save photo: {e}"));
            }
        }
        Ok(())
    }
}

impl<D, S, K, P> Drop for Verifier<D, S, K, P>
where
    D: FaceDetector,
    S: FrameSource,
    K: Scheduler,
    P: CaptureSink,
{
    fn drop(&mut self) {
        self.release();
    }
}

/// Downscale `frame` to `width` columns, keeping the aspect ratio. Frames
/// already that narrow are used as is.
fn analysis_canvas(frame: &RgbaImage, width: u32) -> Cow<'_, RgbaImage> {
    let (w, h) = frame.dimensions();
    if width == 0 || w <= width {
        return Cow::Borrowed(frame);
    }
    let height = ((h as f32 * width as f32 / w as f32).round() as u32).max(1);
    Cow::Owned(imageops::resize(frame, width, height, FilterType::Triangle))
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}
