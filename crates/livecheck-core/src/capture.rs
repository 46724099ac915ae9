//! Final photo capture, face crop and hand-off to persistence.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use image::{imageops, RgbaImage};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{FaceBox, PixelRect};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("persistence rejected the capture: {0}")]
    Rejected(String),
}

/// A cropped photo awaiting (or past) persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub id: Uuid,
    pub image: RgbaImage,
    /// Face box in still-image coordinates, when one was known.
    pub face: Option<FaceBox>,
    /// Crop rectangle within the original still.
    pub crop: PixelRect,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    /// Crop `still` around `face` with `padding` pixels on every side.
    pub fn from_still(still: &RgbaImage, face: Option<FaceBox>, padding: u32) -> Self {
        let (w, h) = still.dimensions();
        let crop = crop_rect(face.as_ref(), w, h, padding);
        let image = imageops::crop_imm(still, crop.x, crop.y, crop.width, crop.height).to_image();

        Self {
            id: Uuid::new_v4(),
            image,
            face,
            crop,
            captured_at: Utc::now(),
        }
    }
}

/// Padded face rectangle clamped to a `width`×`height` image; the whole
/// image when there is no face or the face lies entirely outside it.
pub fn crop_rect(face: Option<&FaceBox>, width: u32, height: u32, padding: u32) -> PixelRect {
    let full = PixelRect::full(width, height);
    let Some(face) = face else {
        return full;
    };

    let pad = padding as i64;
    let x0 = face.x.floor() as i64 - pad;
    let y0 = face.y.floor() as i64 - pad;
    let x1 = (face.x + face.width).ceil() as i64 + pad;
    let y1 = (face.y + face.height).ceil() as i64 + pad;

    let rect = PixelRect::clamped(x0, y0, x1, y1, width, height);
    if rect.is_empty() {
        full
    } else {
        rect
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveReceipt {
    pub id: Uuid,
    /// Where the image ended up, for sinks that write files.
    pub location: Option<PathBuf>,
}

/// Persistence collaborator.
pub trait CaptureSink {
    fn save(&mut self, capture: &CapturedImage) -> Result<SaveReceipt, PersistError>;
}
