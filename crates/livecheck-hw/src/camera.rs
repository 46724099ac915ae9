//! V4L2 camera capture via the `v4l` crate.

use std::io;
use std::path::Path;

use image::RgbaImage;
use livecheck_core::source::{FrameSource, SourceError};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::frame::{self, PixelFormat};

/// Dark frames tolerated before a still is taken anyway.
const STILL_ATTEMPTS: usize = 5;
const DARK_THRESHOLD: f32 = 0.95;

/// An open, streaming device.
struct Streaming {
    stream: MmapStream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// V4L2 camera, opened on [`FrameSource::start`] and closed on
/// [`FrameSource::stop`].
pub struct V4lCamera {
    device_path: String,
    width: u32,
    height: u32,
    streaming: Option<Streaming>,
}

impl V4lCamera {
    /// A camera for `device_path` (e.g. "/dev/video0") requesting
    /// `width`×`height`. Nothing is opened yet.
    pub fn new(device_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
            streaming: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Negotiated frame size, while streaming.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.streaming.as_ref().map(|s| (s.width, s.height))
    }

    fn open(&self) -> Result<Streaming, SourceError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(SourceError::Unavailable(format!("{path}: no such device")));
        }

        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| SourceError::Unavailable(format!("{path}: failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(SourceError::Unavailable(format!("{path}: not a capture device")));
        }
        tracing::info!(device = path, driver = %caps.driver, card = %caps.card, "opened camera");

        // Ask for YUYV; IR cameras commonly answer with GREY or Y16.
        let mut fmt = device
            .format()
            .map_err(|e| SourceError::Unavailable(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = self.width;
        fmt.height = self.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| SourceError::Unavailable(format!("failed to set format: {e}")))?;
        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            SourceError::Unavailable(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4)
            .map_err(|e| SourceError::Unavailable(format!("failed to create mmap stream: {e}")))?;

        Ok(Streaming {
            _device: device,
            stream,
            width: negotiated.width,
            height: negotiated.height,
            format,
        })
    }
}

fn open_error(path: &str, e: io::Error) -> SourceError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(format!("{path}: {e}")),
        _ if e.raw_os_error() == Some(16) => SourceError::Unavailable(format!("{path}: device busy")),
        _ => SourceError::Unavailable(format!("{path}: {e}")),
    }
}

impl Streaming {
    fn next_frame(&mut self) -> Result<RgbaImage, SourceError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| SourceError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        tracing::trace!(seq = meta.sequence, bytes = buf.len(), "frame dequeued");

        frame::to_rgba(self.format, buf, self.width, self.height)
            .map_err(|e| SourceError::CaptureFailed(e.to_string()))
    }
}

impl FrameSource for V4lCamera {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.streaming.is_none() {
            self.streaming = Some(self.open()?);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.streaming.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_active(&self) -> bool {
        self.streaming.is_some()
    }

    fn frame(&mut self) -> Result<RgbaImage, SourceError> {
        self.streaming
            .as_mut()
            .ok_or(SourceError::NotStarted)?
            .next_frame()
    }

    /// Skips dark frames left over from IR emitter warm-up; after
    /// [`STILL_ATTEMPTS`] the last frame is used regardless.
    fn still(&mut self) -> Result<RgbaImage, SourceError> {
        let streaming = self.streaming.as_mut().ok_or(SourceError::NotStarted)?;

        let mut still = streaming.next_frame()?;
        for _ in 1..STILL_ATTEMPTS {
            if !frame::is_dark_frame(&still, DARK_THRESHOLD) {
                break;
            }
            tracing::debug!("skipping dark frame");
            still = streaming.next_frame()?;
        }
        Ok(still)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let mut camera = V4lCamera::new("/dev/livecheck-missing", 640, 480);
        let err = camera.start().unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert!(!camera.is_active());
        assert_eq!(camera.resolution(), None);
    }

    #[test]
    fn test_frame_before_start() {
        let mut camera = V4lCamera::new("/dev/video0", 640, 480);
        assert!(matches!(camera.frame(), Err(SourceError::NotStarted)));
        assert!(matches!(camera.still(), Err(SourceError::NotStarted)));
        camera.stop();
        camera.stop();
    }

    #[test]
    fn test_open_error_mapping() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            open_error("/dev/video0", denied),
            SourceError::PermissionDenied(_)
        ));
        let busy = io::Error::from_raw_os_error(16);
        assert!(matches!(open_error("/dev/video0", busy), SourceError::Unavailable(m) if m.contains("busy")));
    }
}
