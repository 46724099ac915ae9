//! livecheck-core — Heuristic liveness verification.
//!
//! Confirms a live person in front of the camera with cheap pixel
//! statistics: a face must be present, then blink, then move their head.
//! Face boxes come from an SCRFD model run through ONNX Runtime; everything
//! else is plain arithmetic over small eye regions.

pub mod blink;
pub mod capture;
pub mod config;
pub mod detector;
pub mod history;
pub mod metrics;
pub mod movement;
pub mod regions;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod types;
pub mod verifier;

pub use capture::{CaptureSink, CapturedImage, PersistError, SaveReceipt};
pub use config::{ConfigError, LivenessConfig};
pub use detector::{FaceDetector, ScrfdDetector};
pub use scheduler::{ManualScheduler, Scheduler, TimerId, TimerKind};
pub use session::{Status, Step, VerificationSession};
pub use source::{FrameSource, SourceError};
pub use types::FaceBox;
pub use verifier::{VerifyError, Verifier};
