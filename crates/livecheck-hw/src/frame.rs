//! Raw V4L2 buffer conversion to RGBA and dark-frame detection.

use image::{Rgba, RgbaImage};

/// Pixel formats the camera can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, chroma shared by pixel pairs).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel, native IR camera output).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Grey => 1,
            Self::Yuyv | Self::Y16 => 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("odd width {0} is not valid for YUYV")]
    OddWidth(u32),
}

/// Convert one raw buffer of `format` to an RGBA image.
pub fn to_rgba(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<RgbaImage, FrameError> {
    let expected = (width * height) as usize * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    let buf = &buf[..expected];

    match format {
        PixelFormat::Yuyv => yuyv_to_rgba(buf, width, height),
        PixelFormat::Grey => Ok(gray_image(width, height, buf.iter().copied())),
        PixelFormat::Y16 => Ok(gray_image(
            width,
            height,
            // Keep the high byte of each little-endian sample.
            buf.chunks_exact(2).map(|px| px[1]),
        )),
    }
}

/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]. Converted with
/// BT.601 limited-range integer coefficients.
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<RgbaImage, FrameError> {
    if width % 2 != 0 {
        return Err(FrameError::OddWidth(width));
    }
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: PixelFormat::Yuyv,
            expected,
            actual: yuyv.len(),
        });
    }

    let mut raw = Vec::with_capacity((width * height * 4) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        raw.extend_from_slice(&yuv_to_rgba(y0, u, v));
        raw.extend_from_slice(&yuv_to_rgba(y1, u, v));
    }

    Ok(RgbaImage::from_raw(width, height, raw).unwrap_or_else(|| RgbaImage::new(width, height)))
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
        255,
    ]
}

fn gray_image(width: u32, height: u32, values: impl Iterator<Item = u8>) -> RgbaImage {
    let mut image = RgbaImage::new(width, height);
    for (px, g) in image.pixels_mut().zip(values) {
        *px = Rgba([g, g, g, 255]);
    }
    image
}

/// True when more than `threshold_pct` of the pixels are in the darkest
/// eighth of the luma range. IR cameras emit such frames while the emitter
/// warms up.
pub fn is_dark_frame(image: &RgbaImage, threshold_pct: f32) -> bool {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return true;
    }
    let dark = image
        .pixels()
        .filter(|p| {
            let [r, g, b, _] = p.0;
            (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) < 32.0
        })
        .count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1 image: [Y0=16, U=128, Y1=235, V=128]
        let image = yuyv_to_rgba(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_yuyv_chroma() {
        // Strong V pushes red up and green down.
        let image = yuyv_to_rgba(&[126, 128, 126, 240], 2, 1).unwrap();
        let [r, g, b, _] = image.get_pixel(0, 0).0;
        assert!(r > g && r > b, "expected reddish pixel, got {r} {g} {b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgba(&[100, 128], 2, 1);
        assert!(matches!(result, Err(FrameError::InvalidLength { expected: 4, .. })));
    }

    #[test]
    fn test_yuyv_odd_width() {
        assert!(matches!(yuyv_to_rgba(&[0; 6], 3, 1), Err(FrameError::OddWidth(3))));
    }

    #[test]
    fn test_grey_to_rgba() {
        let image = to_rgba(PixelFormat::Grey, &[10, 20, 30, 40], 2, 2).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 1), &Rgba([40, 40, 40, 255]));
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let image = to_rgba(PixelFormat::Y16, &[0xff, 0x12, 0x00, 0xab], 2, 1).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgba([0x12, 0x12, 0x12, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([0xab, 0xab, 0xab, 255]));
    }

    #[test]
    fn test_to_rgba_short_buffer() {
        let result = to_rgba(PixelFormat::Y16, &[0; 3], 2, 1);
        assert!(matches!(result, Err(FrameError::InvalidLength { expected: 4, actual: 3, .. })));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"GREY"), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(b"Y16 "), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&RgbaImage::new(10, 10), 0.95));
        assert!(is_dark_frame(&RgbaImage::new(0, 0), 0.95));
        let bright = RgbaImage::from_pixel(10, 10, Rgba([128, 128, 128, 255]));
        assert!(!is_dark_frame(&bright, 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 94% dark, 6% bright → not dark
        let mut image = RgbaImage::from_pixel(100, 10, Rgba([10, 10, 10, 255]));
        for x in 0..60 {
            image.put_pixel(x, 9, Rgba([128, 128, 128, 255]));
        }
        assert!(!is_dark_frame(&image, 0.95));
    }
}
