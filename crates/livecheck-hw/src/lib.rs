//! livecheck-hw — Frame sources for the liveness pipeline.
//!
//! Provides V4L2-based camera access and a directory replay source, both
//! producing RGBA frames through [`livecheck_core::FrameSource`].

pub mod camera;
pub mod frame;
pub mod replay;

pub use camera::V4lCamera;
pub use frame::{FrameError, PixelFormat};
pub use replay::ReplaySource;
