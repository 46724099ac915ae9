//! Eye region sampling.
//!
//! Approximates where the eyes sit inside a face box, or guesses a
//! canvas-centred position when no face box is available, and maps the
//! result onto the (possibly downscaled) analysis canvas.

use crate::types::{FaceBox, Rect};

// Fractions of the face box.
const EYE_BAND_TOP: f32 = 0.25;
const EYE_BAND_HEIGHT: f32 = 0.20;
const LEFT_EYE_LEFT: f32 = 0.15;
const RIGHT_EYE_LEFT: f32 = 0.55;
const EYE_WIDTH: f32 = 0.30;

/// Left and right eye regions for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRegions {
    pub left: Rect,
    pub right: Rect,
}

/// Compute both eye regions in canvas coordinates.
///
/// Regions are derived in source-frame coordinates, then multiplied by
/// `canvas_width / source_width`. A zero source width yields zero-area
/// regions rather than an error.
pub fn sample_eye_regions(
    face: Option<&FaceBox>,
    canvas_width: u32,
    source_width: u32,
    source_height: u32,
) -> EyeRegions {
    let regions = match face {
        Some(face) => from_face(face),
        None => fallback(source_width as f32, source_height as f32),
    };

    let scale = if source_width > 0 {
        canvas_width as f32 / source_width as f32
    } else {
        0.0
    };

    EyeRegions {
        left: regions.left.scaled(scale),
        right: regions.right.scaled(scale),
    }
}

fn from_face(face: &FaceBox) -> EyeRegions {
    let y = face.y + EYE_BAND_TOP * face.height;
    let height = EYE_BAND_HEIGHT * face.height;
    let width = EYE_WIDTH * face.width;

    EyeRegions {
        left: Rect::new(face.x + LEFT_EYE_LEFT * face.width, y, width, height),
        right: Rect::new(face.x + RIGHT_EYE_LEFT * face.width, y, width, height),
    }
}

/// Canvas-centred guess: each eye a sixth of the width and an eighth of the
/// height, centred at one third of the height and at 1/3 and 2/3 across.
fn fallback(width: f32, height: f32) -> EyeRegions {
    let eye_w = width / 6.0;
    let eye_h = height / 8.0;
    let y = height / 3.0 - eye_h / 2.0;

    EyeRegions {
        left: Rect::new(width / 3.0 - eye_w / 2.0, y, eye_w, eye_h),
        right: Rect::new(2.0 * width / 3.0 - eye_w / 2.0, y, eye_w, eye_h),
    }
}
