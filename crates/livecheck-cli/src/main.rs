use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use livecheck_core::capture::{CaptureSink, CapturedImage, PersistError, SaveReceipt};
use livecheck_core::{
    LivenessConfig, ManualScheduler, ScrfdDetector, Status, Step, TimerKind, Verifier,
};
use livecheck_hw::ReplaySource;

#[derive(Parser)]
#[command(name = "livecheck", about = "Liveness verification CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new verification
    Start,
    /// Confirm a blink after the automatic check timed out
    ConfirmBlink,
    /// Confirm head movement after the automatic check timed out
    ConfirmMovement,
    /// Take the photo once verification is complete
    Photo,
    /// Retry saving a photo whose save failed
    Retry,
    /// Abort the current verification
    Reset,
    /// Show the current verification status
    Status,
    /// Run the pipeline offline against a directory of recorded frames
    Replay(ReplayArgs),
}

#[derive(Args)]
struct ReplayArgs {
    /// Directory of frames, replayed in file-name order
    dir: PathBuf,
    /// SCRFD detection model
    #[arg(short, long)]
    model: PathBuf,
    /// TOML file overriding thresholds and timings
    #[arg(short, long)]
    tuning: Option<PathBuf>,
    /// Take the photo once verification completes and write it here
    #[arg(short, long)]
    photo: Option<PathBuf>,
}

#[zbus::proxy(
    interface = "org.livecheck.Verifier1",
    default_service = "org.livecheck.Verifier1",
    default_path = "/org/livecheck/Verifier1"
)]
trait LivecheckVerifier {
    fn start(&self) -> zbus::Result<String>;
    fn confirm_blink(&self) -> zbus::Result<String>;
    fn confirm_movement(&self) -> zbus::Result<String>;
    fn take_photo(&self) -> zbus::Result<String>;
    fn retry_save(&self) -> zbus::Result<String>;
    fn reset(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay(args) => replay(args),
        command => request(command, cli.session).await,
    }
}

/// Send one request to livecheckd and print the returned status.
async fn request(command: Commands, session_bus: bool) -> Result<()> {
    let connection = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = LivecheckVerifierProxy::new(&connection).await?;

    let reply = match command {
        Commands::Start => proxy.start().await,
        Commands::ConfirmBlink => proxy.confirm_blink().await,
        Commands::ConfirmMovement => proxy.confirm_movement().await,
        Commands::Photo => proxy.take_photo().await,
        Commands::Retry => proxy.retry_save().await,
        Commands::Reset => proxy.reset().await,
        Commands::Status => proxy.status().await,
        Commands::Replay(_) => anyhow::bail!("replay does not use the daemon"),
    }
    .context("livecheckd request failed")?;

    let status: serde_json::Value = serde_json::from_str(&reply)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Writes the replay photo to a single file.
struct FileSink(Option<PathBuf>);

impl CaptureSink for FileSink {
    fn save(&mut self, capture: &CapturedImage) -> Result<SaveReceipt, PersistError> {
        let path = self
            .0
            .clone()
            .ok_or_else(|| PersistError::Rejected("no photo path given".into()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        capture.image.save(&path)?;
        Ok(SaveReceipt {
            id: capture.id,
            location: Some(path),
        })
    }
}

/// Drive the verifier with a simulated clock: one sampling tick per frame,
/// countdown ticks at their configured ratio.
fn replay(args: ReplayArgs) -> Result<()> {
    let config = match &args.tuning {
        Some(path) => LivenessConfig::load(path)?,
        None => LivenessConfig::default(),
    };
    let timing = config.timing.clone();
    let ticks_per_step = (timing.countdown_step_ms / timing.tick_interval_ms).max(1);

    let mut verifier = Verifier::new(
        config,
        ScrfdDetector::new(&args.model),
        ReplaySource::new(&args.dir),
        ManualScheduler::new(),
        FileSink(args.photo.clone()),
    );
    verifier.start()?;

    let mut now = Instant::now();
    let mut step = verifier.status().step;
    let mut frame = 0u64;
    while !verifier.source().is_exhausted() && step != Step::Complete {
        now += timing.tick_interval();
        frame += 1;

        if let Some(id) = verifier.scheduler().active(TimerKind::Sampling) {
            verifier.on_timer(id, now)?;
        }
        if frame % ticks_per_step == 0 {
            if let Some(id) = verifier.scheduler().active(TimerKind::Countdown) {
                verifier.on_timer(id, now)?;
            }
        }

        let status = verifier.status();
        if status.step != step {
            println!("frame {frame}: {step:?} -> {:?}", status.step);
            step = status.step;
        }
    }

    let status = verifier.status();
    print_summary(frame, &status);

    if step == Step::Complete && args.photo.is_some() {
        let mut status = verifier.take_photo()?;
        while let Some(id) = verifier.scheduler().active(TimerKind::Countdown) {
            now += timing.countdown_step();
            status = verifier.on_timer(id, now)?;
        }
        match (status.saved, status.error) {
            (Some(receipt), _) => {
                if let Some(location) = receipt.location {
                    println!("photo saved to {}", location.display());
                }
            }
            (None, Some(error)) => anyhow::bail!(error),
            (None, None) => anyhow::bail!("photo was not taken"),
        }
    }

    Ok(())
}

fn print_summary(frames: u64, status: &Status) {
    println!("frames replayed:  {frames}");
    println!("final step:       {:?}", status.step);
    println!(
        "blinks:           {} (confirmed: {})",
        status.blink_count, status.blink_confirmed
    );
    println!(
        "movement score:   {} (confirmed: {})",
        status.movement_score, status.movement_confirmed
    );
    println!("face detected:    {}", status.face_detected);
}
