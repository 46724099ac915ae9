use serde::{Deserialize, Serialize};

/// A detected face in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub score: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, score: 1.0 }
    }

    /// Centre of the box, used as the face position sample.
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Same box in a frame scaled by `factor` in both axes.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            score: self.score,
        }
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// A 2D position sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// Floating-point rectangle (eye regions before rasterisation).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Rasterise to whole pixels, clamped to a `width`×`height` image.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> PixelRect {
        PixelRect::clamped(
            self.x.floor() as i64,
            self.y.floor() as i64,
            (self.x + self.width).floor() as i64,
            (self.y + self.height).floor() as i64,
            width,
            height,
        )
    }
}

/// Integer rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    /// Rectangle spanning `[x0, x1) × [y0, y1)` intersected with the image.
    pub fn clamped(x0: i64, y0: i64, x1: i64, y1: i64, width: u32, height: u32) -> Self {
        let cx0 = x0.clamp(0, width as i64);
        let cy0 = y0.clamp(0, height as i64);
        let cx1 = x1.clamp(cx0, width as i64);
        let cy1 = y1.clamp(cy0, height as i64);
        Self {
            x: cx0 as u32,
            y: cy0 as u32,
            width: (cx1 - cx0) as u32,
            height: (cy1 - cy0) as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = FaceBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_center() {
        let face = FaceBox::new(100.0, 50.0, 40.0, 20.0);
        assert_eq!(face.center(), Point::new(120.0, 60.0));
    }

    #[test]
    fn test_pixel_rect_clamps_to_image() {
        let r = PixelRect::clamped(-10, 20, 700, 500, 640, 480);
        assert_eq!(r, PixelRect::new(0, 20, 640, 460));
    }

    #[test]
    fn test_pixel_rect_outside_image_is_empty() {
        let r = PixelRect::clamped(700, 10, 800, 50, 640, 480);
        assert!(r.is_empty());
        assert_eq!(r.x, 640);
    }

    #[test]
    fn test_rect_to_pixel_rect() {
        let r = Rect::new(10.6, 5.2, 20.0, 10.0).to_pixel_rect(100, 100);
        assert_eq!(r, PixelRect::new(10, 5, 20, 10));
    }
}
