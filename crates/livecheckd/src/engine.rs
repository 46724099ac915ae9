use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use livecheck_core::{
    CaptureSink, FaceDetector, FrameSource, Scheduler, Status, TimerId, TimerKind,
    Verifier, VerifyError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// User-facing operations on the verification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    ConfirmBlink,
    ConfirmMovement,
    TakePhoto,
    RetrySave,
    Reset,
    Status,
}

/// Messages delivered to the engine thread, in arrival order.
enum EngineRequest {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Status, EngineError>>,
    },
    Timer(TimerId),
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call(&self, command: Command) -> Result<Status, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Command {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Begin a new verification, discarding any session in progress.
    pub async fn start(&self) -> Result<Status, EngineError> {
        self.call(Command::Start).await
    }

    pub async fn confirm_blink(&self) -> Result<Status, EngineError> {
        self.call(Command::ConfirmBlink).await
    }

    pub async fn confirm_movement(&self) -> Result<Status, EngineError> {
        self.call(Command::ConfirmMovement).await
    }

    pub async fn take_photo(&self) -> Result<Status, EngineError> {
        self.call(Command::TakePhoto).await
    }

    pub async fn retry_save(&self) -> Result<Status, EngineError> {
        self.call(Command::RetrySave).await
    }

    pub async fn reset(&self) -> Result<Status, EngineError> {
        self.call(Command::Reset).await
    }

    pub async fn status(&self) -> Result<Status, EngineError> {
        self.call(Command::Status).await
    }
}

/// Timers as tokio interval tasks that post [`EngineRequest::Timer`] back to
/// the engine thread.
///
/// A sampling fire is dropped while the previous fire of the same timer is
/// still queued, so a slow detector never builds a backlog of ticks. Each
/// sampling timer has its own pending flag, and only a consumed fire of that
/// timer clears it.
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
    tx: mpsc::WeakSender<EngineRequest>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    pending: HashMap<TimerId, Arc<AtomicBool>>,
}

impl TokioScheduler {
    fn new(runtime: tokio::runtime::Handle, tx: mpsc::WeakSender<EngineRequest>) -> Self {
        Self {
            runtime,
            tx,
            tasks: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Mark a fire of `id` as taken off the queue. Fires of cancelled timers
    /// have no flag left and change nothing.
    fn consumed(&self, id: TimerId) {
        if let Some(flag) = self.pending.get(&id) {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Scheduler for TokioScheduler {
    fn start(&mut self, id: TimerId, period: Duration) {
        self.cancel(id);

        let tx = self.tx.clone();
        let pending = (id.kind == TimerKind::Sampling).then(|| {
            let flag = Arc::new(AtomicBool::new(false));
            self.pending.insert(id, flag.clone());
            flag
        });
        let task = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(pending) = &pending {
                    if pending.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                }
                let Some(tx) = tx.upgrade() else {
                    break;
                };
                if tx.send(EngineRequest::Timer(id)).await.is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(id, task);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
        self.pending.remove(&id);
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `build` runs on that thread and assembles the verifier around the
/// provided scheduler, so detector and camera never cross threads. The
/// thread exits once every [`EngineHandle`] is dropped, releasing the
/// camera on the way out.
pub fn spawn_engine<D, S, P, B>(build: B) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + 'static,
    S: FrameSource + 'static,
    P: CaptureSink + 'static,
    B: FnOnce(TokioScheduler) -> Verifier<D, S, TokioScheduler, P> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()?;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let scheduler = TokioScheduler::new(runtime, tx.downgrade());

    std::thread::Builder::new()
        .name("livecheck-engine".into())
        .spawn(move || {
            let mut verifier = build(scheduler);
            tracing::info!("engine thread started");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Timer(id) => {
                        verifier.scheduler().consumed(id);
                        if let Err(e) = verifier.on_timer(id, Instant::now()) {
                            tracing::warn!(error = %e, "verification failed");
                        }
                    }
                    EngineRequest::Command { command, reply } => {
                        tracing::debug!(?command, "engine request");
                        let _ = reply.send(run_command(&mut verifier, command));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_command<D, S, K, P>(
    verifier: &mut Verifier<D, S, K, P>,
    command: Command,
) -> Result<Status, EngineError>
where
    D: FaceDetector,
    S: FrameSource,
    K: Scheduler,
    P: CaptureSink,
{
    let status = match command {
        Command::Start => verifier.start()?,
        Command::ConfirmBlink => verifier.confirm_blink(),
        Command::ConfirmMovement => verifier.confirm_movement(),
        Command::TakePhoto => verifier.take_photo()?,
        Command::RetrySave => verifier.retry_save()?,
        Command::Reset => verifier.reset(),
        Command::Status => verifier.status(),
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DirectorySink;
    use image::{Rgba, RgbaImage};
    use livecheck_core::detector::{DetectOptions, DetectorError};
    use livecheck_core::{FaceBox, LivenessConfig, Step};
    use livecheck_hw::ReplaySource;
    use std::path::Path;

    struct FixedFace;

    impl FaceDetector for FixedFace {
        fn prepare(&mut self) -> Result<(), DetectorError> {
            Ok(())
        }

        fn detect(
            &mut self,
            _frame: &RgbaImage,
            _options: &DetectOptions,
        ) -> Result<Vec<FaceBox>, DetectorError> {
            Ok(vec![FaceBox::new(100.0, 100.0, 200.0, 200.0)])
        }
    }

    fn fast_config() -> LivenessConfig {
        let mut config = LivenessConfig::default();
        config.timing.tick_interval_ms = 10;
        config.timing.countdown_step_ms = 10;
        config.timing.blink_countdown = 1;
        config.timing.move_countdown = 1;
        config.timing.capture_countdown = 1;
        config
    }

    fn spawn(frames: &Path, captures: &Path) -> EngineHandle {
        RgbaImage::from_pixel(640, 480, Rgba([120, 120, 120, 255]))
            .save(frames.join("frame.png"))
            .unwrap();
        let frames = frames.to_path_buf();
        let captures = captures.to_path_buf();
        spawn_engine(move |scheduler| {
            Verifier::new(
                fast_config(),
                FixedFace,
                ReplaySource::new(frames).looping(true),
                scheduler,
                DirectorySink::new(captures),
            )
        })
        .unwrap()
    }

    async fn wait_for(engine: &EngineHandle, done: impl Fn(&Status) -> bool) -> Status {
        for _ in 0..500 {
            let status = engine.status().await.unwrap();
            if done(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for engine");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_session_with_manual_fallbacks() {
        let frames = tempfile::tempdir().unwrap();
        let captures = tempfile::tempdir().unwrap();
        let engine = spawn(frames.path(), captures.path());

        assert_eq!(engine.start().await.unwrap().step, Step::Face);

        wait_for(&engine, |s| s.step == Step::Blink && s.manual_confirm_available).await;
        assert_eq!(engine.confirm_blink().await.unwrap().step, Step::Move);

        wait_for(&engine, |s| s.step == Step::Move && s.manual_confirm_available).await;
        assert_eq!(engine.confirm_movement().await.unwrap().step, Step::Complete);

        assert_eq!(engine.take_photo().await.unwrap().step, Step::Capture);
        let status = wait_for(&engine, |s| s.saved.is_some()).await;
        assert_eq!(status.step, Step::Idle);

        let location = status.saved.unwrap().location.unwrap();
        assert!(location.starts_with(captures.path()));
        assert!(location.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_failure_is_reported() {
        let captures = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let engine = spawn_engine({
            let dir = empty.path().to_path_buf();
            let captures = captures.path().to_path_buf();
            move |scheduler| {
                Verifier::new(
                    fast_config(),
                    FixedFace,
                    ReplaySource::new(dir),
                    scheduler,
                    DirectorySink::new(captures),
                )
            }
        })
        .unwrap();

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Verify(VerifyError::Camera(_))));
        let status = engine.status().await.unwrap();
        assert_eq!(status.step, Step::Idle);
        assert!(status.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_stops_sampling() {
        let frames = tempfile::tempdir().unwrap();
        let captures = tempfile::tempdir().unwrap();
        let engine = spawn(frames.path(), captures.path());

        engine.start().await.unwrap();
        wait_for(&engine, |s| s.step == Step::Blink).await;
        let status = engine.reset().await.unwrap();
        assert_eq!(status.step, Step::Idle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = engine.status().await.unwrap();
        assert_eq!(status.step, Step::Idle);
        assert!(!status.face_detected);
    }

    fn sampling(generation: u64) -> TimerId {
        TimerId {
            kind: TimerKind::Sampling,
            generation,
        }
    }

    fn queued(rx: &mut mpsc::Receiver<EngineRequest>) -> Vec<TimerId> {
        let mut ids = Vec::new();
        while let Ok(req) = rx.try_recv() {
            if let EngineRequest::Timer(id) = req {
                ids.push(id);
            }
        }
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_sampling_fire_is_not_repeated() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = TokioScheduler::new(tokio::runtime::Handle::current(), tx.downgrade());
        scheduler.start(sampling(1), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(95)).await;
        assert_eq!(queued(&mut rx), vec![sampling(1)]);

        scheduler.consumed(sampling(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queued(&mut rx), vec![sampling(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sampling_fire_keeps_new_timer_pending() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = TokioScheduler::new(tokio::runtime::Handle::current(), tx.downgrade());
        scheduler.start(sampling(1), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(15)).await;

        scheduler.cancel(sampling(1));
        scheduler.start(sampling(2), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(15)).await;

        // The engine takes the old generation's fire off the queue first.
        let Ok(EngineRequest::Timer(stale)) = rx.try_recv() else {
            panic!("expected the first generation's fire");
        };
        assert_eq!(stale, sampling(1));
        scheduler.consumed(stale);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queued(&mut rx), vec![sampling(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_fires_are_not_coalesced() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = TokioScheduler::new(tokio::runtime::Handle::current(), tx.downgrade());
        let countdown = TimerId {
            kind: TimerKind::Countdown,
            generation: 1,
        };
        scheduler.start(countdown, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(queued(&mut rx), vec![countdown; 3]);
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let result = spawn_engine(|scheduler| {
            Verifier::new(
                LivenessConfig::default(),
                FixedFace,
                ReplaySource::new("/nonexistent"),
                scheduler,
                DirectorySink::new("/nonexistent"),
            )
        });
        assert!(matches!(result, Err(EngineError::Runtime(_))));
    }
}
