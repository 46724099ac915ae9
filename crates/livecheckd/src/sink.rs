//! Filesystem persistence for captured photos.

use std::path::PathBuf;

use livecheck_core::capture::{CaptureSink, CapturedImage, PersistError, SaveReceipt};
use livecheck_core::types::{FaceBox, PixelRect};
use serde::Serialize;

/// Writes `<id>.png` plus a `<id>.json` sidecar into one directory.
pub struct DirectorySink {
    dir: PathBuf,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    id: String,
    captured_at: String,
    width: u32,
    height: u32,
    crop: &'a PixelRect,
    face: Option<&'a FaceBox>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CaptureSink for DirectorySink {
    fn save(&mut self, capture: &CapturedImage) -> Result<SaveReceipt, PersistError> {
        std::fs::create_dir_all(&self.dir)?;

        let image_path = self.dir.join(format!("{}.png", capture.id));
        capture.image.save(&image_path)?;

        let sidecar = Sidecar {
            id: capture.id.to_string(),
            captured_at: capture.captured_at.to_rfc3339(),
            width: capture.image.width(),
            height: capture.image.height(),
            crop: &capture.crop,
            face: capture.face.as_ref(),
        };
        let json = serde_json::to_vec_pretty(&sidecar).map_err(std::io::Error::other)?;
        std::fs::write(self.dir.join(format!("{}.json", capture.id)), json)?;

        tracing::debug!(path = %image_path.display(), "capture written");
        Ok(SaveReceipt {
            id: capture.id,
            location: Some(image_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_writes_image_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let still = RgbaImage::from_pixel(640, 480, Rgba([90, 90, 90, 255]));
        let capture =
            CapturedImage::from_still(&still, Some(FaceBox::new(100.0, 100.0, 200.0, 200.0)), 50);

        let mut sink = DirectorySink::new(dir.path().join("captures"));
        let receipt = sink.save(&capture).unwrap();
        assert_eq!(receipt.id, capture.id);

        let location = receipt.location.unwrap();
        let saved = image::open(&location).unwrap().into_rgba8();
        assert_eq!(saved.dimensions(), (300, 300));

        let sidecar: serde_json::Value = serde_json::from_slice(
            &std::fs::read(location.with_extension("json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["id"], capture.id.to_string());
        assert_eq!(sidecar["crop"]["x"], 50);
        assert_eq!(sidecar["width"], 300);
        assert_eq!(sidecar["face"]["width"], 200.0);
    }

    #[test]
    fn test_unwritable_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let capture = CapturedImage::from_still(&RgbaImage::new(4, 4), None, 50);
        let mut sink = DirectorySink::new(blocker.join("captures"));
        assert!(matches!(sink.save(&capture), Err(PersistError::Io(_))));
    }
}
