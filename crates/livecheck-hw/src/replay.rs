//! Frame source that plays back a directory of still images.
//!
//! Used for offline runs of the liveness pipeline and for reproducing
//! field reports from recorded frames.

use std::io;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use livecheck_core::source::{FrameSource, SourceError};

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Replays image files in file-name order.
pub struct ReplaySource {
    dir: PathBuf,
    looping: bool,
    frames: Vec<PathBuf>,
    cursor: usize,
    last: Option<RgbaImage>,
    active: bool,
}

impl ReplaySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            looping: false,
            frames: Vec::new(),
            cursor: 0,
            last: None,
            active: false,
        }
    }

    /// Restart from the first image once the last one was served.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True once every image was served and looping is off.
    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.cursor >= self.frames.len()
    }

    fn scan(&self) -> Result<Vec<PathBuf>, SourceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.read_error(e))?;

        let mut frames = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.read_error(e))?.path();
            let supported = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if supported && path.is_file() {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }

    fn read_error(&self, e: io::Error) -> SourceError {
        let msg = format!("{}: {e}", self.dir.display());
        match e.kind() {
            io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(msg),
            _ => SourceError::Unavailable(msg),
        }
    }
}

impl FrameSource for ReplaySource {
    fn start(&mut self) -> Result<(), SourceError> {
        let frames = self.scan()?;
        if frames.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "{}: no images to replay",
                self.dir.display()
            )));
        }
        tracing::info!(dir = %self.dir.display(), frames = frames.len(), "replay started");

        self.frames = frames;
        self.cursor = 0;
        self.last = None;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
        self.last = None;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn frame(&mut self) -> Result<RgbaImage, SourceError> {
        if !self.active {
            return Err(SourceError::NotStarted);
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Err(SourceError::CaptureFailed("replay exhausted".to_string()));
            }
            self.cursor = 0;
        }

        let path = &self.frames[self.cursor];
        self.cursor += 1;
        let image = image::open(path)
            .map_err(|e| SourceError::CaptureFailed(format!("{}: {e}", path.display())))?
            .into_rgba8();
        tracing::trace!(path = %path.display(), "replayed frame");

        self.last = Some(image.clone());
        Ok(image)
    }

    /// The frame most recently served, as a camera still would show it.
    fn still(&mut self) -> Result<RgbaImage, SourceError> {
        if !self.active {
            return Err(SourceError::NotStarted);
        }
        match &self.last {
            Some(image) => Ok(image.clone()),
            None => self.frame(),
        }
    }
}
