//! Per-region frame statistics: brightness, edge density and contrast.

use image::{imageops, RgbaImage};

use crate::types::PixelRect;

/// Neighbour luminance difference (0–255 scale) above which a pixel is an edge.
const EDGE_THRESHOLD: f32 = 20.0;

/// Statistics for one eye region, or the two-eye average for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameMetrics {
    /// Mean normalized luma in [0, 1].
    pub brightness: f32,
    /// Edge pixels per region pixel.
    pub edge_density: f32,
    /// Standard deviation of normalized luma.
    pub contrast: f32,
}

impl FrameMetrics {
    /// Compute metrics over the interior of an RGBA region.
    ///
    /// The 1-pixel border is only read as neighbours. Regions smaller than
    /// 3×3 have no interior and yield all-zero metrics.
    pub fn from_region(region: &RgbaImage) -> Self {
        let (w, h) = region.dimensions();
        if w < 3 || h < 3 {
            return Self::default();
        }

        let channel_mean = |x: u32, y: u32| -> f32 {
            let p = region.get_pixel(x, y).0;
            (p[0] as f32 + p[1] as f32 + p[2] as f32) / 3.0
        };

        let mut lumas = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
        let mut edges = 0usize;

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let [r, g, b, _] = region.get_pixel(x, y).0;
                let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                lumas.push(luma / 255.0);

                let gx = (channel_mean(x + 1, y) - channel_mean(x - 1, y)).abs();
                let gy = (channel_mean(x, y + 1) - channel_mean(x, y - 1)).abs();
                if gx > EDGE_THRESHOLD || gy > EDGE_THRESHOLD {
                    edges += 1;
                }
            }
        }

        let n = lumas.len() as f32;
        let brightness = lumas.iter().sum::<f32>() / n;
        let variance = lumas.iter().map(|l| (l - brightness).powi(2)).sum::<f32>() / n;

        Self {
            brightness,
            edge_density: edges as f32 / (w * h) as f32,
            contrast: variance.sqrt(),
        }
    }

    /// Metrics of `rect` within `canvas`. Empty rectangles yield zeros.
    pub fn from_canvas(canvas: &RgbaImage, rect: PixelRect) -> Self {
        if rect.is_empty() {
            return Self::default();
        }
        let view = imageops::crop_imm(canvas, rect.x, rect.y, rect.width, rect.height);
        Self::from_region(&view.to_image())
    }

    /// Arithmetic mean of two samples (left and right eye).
    pub fn mean(a: &FrameMetrics, b: &FrameMetrics) -> Self {
        Self {
            brightness: (a.brightness + b.brightness) / 2.0,
            edge_density: (a.edge_density + b.edge_density) / 2.0,
            contrast: (a.contrast + b.contrast) / 2.0,
        }
    }
}
