//! Camera / video collaborator.

use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera not started")]
    NotStarted,
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
}

/// A live RGBA frame source.
///
/// `start` acquires the device and `stop` releases it. `stop` must be safe
/// to call repeatedly and on a source that never started.
pub trait FrameSource {
    fn start(&mut self) -> Result<(), SourceError>;
    fn stop(&mut self);
    fn is_active(&self) -> bool;
    /// Latest frame of the live stream, used by the detection loop.
    fn frame(&mut self) -> Result<RgbaImage, SourceError>;
    /// Single high-resolution shot for the final photo.
    fn still(&mut self) -> Result<RgbaImage, SourceError> {
        self.frame()
    }
}
