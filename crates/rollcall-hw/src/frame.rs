//! Frame type and pixel conversion: YUYV/MJPEG to RGB, dark-frame detection.

use image::{ImageFormat, Rgb, RgbImage};

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured RGB frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap an RGB image, computing the dark flag.
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&image, DARK_FRAME_THRESHOLD);
        Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = (self.width() * self.height()) as usize;
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p) as f32).sum::<f32>() / pixels as f32
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish()
    }
}

/// BT.601 luma of an RGB pixel.
pub fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Convert packed YUYV (4:2:2, BT.601 limited range) to RGB.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clip(298 * c + 409 * e),
        clip(298 * c - 100 * d - 208 * e),
        clip(298 * c + 516 * d),
    ]
}

/// Decode one MJPEG buffer into RGB.
pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    let decoded = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?;
    Ok(decoded.to_rgb8())
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = (image.width() * image.height()) as usize;
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p) < 32).count();
    (dark as f32 / total as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2×1: black pixel then white pixel, neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // High V pushes red up, green down
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 200 && g < 50 && b < 50, "got ({r}, {g}, {b})");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_detection() {
        let black = RgbImage::new(10, 10);
        assert!(is_dark_frame(&black, DARK_FRAME_THRESHOLD));

        let grey = RgbImage::from_pixel(10, 10, Rgb([128, 128, 128]));
        assert!(!is_dark_frame(&grey, DARK_FRAME_THRESHOLD));

        assert!(is_dark_frame(&RgbImage::new(0, 0), DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 94 dark pixels of 100 → not dark; 96 → dark
        let mut img = RgbImage::new(10, 10);
        for i in 0..6 {
            img.put_pixel(i, 0, Rgb([200, 200, 200]));
        }
        assert!(!is_dark_frame(&img, DARK_FRAME_THRESHOLD));

        let mut img = RgbImage::new(10, 10);
        for i in 0..4 {
            img.put_pixel(i, 0, Rgb([200, 200, 200]));
        }
        assert!(is_dark_frame(&img, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_frame_brightness() {
        let frame = Frame::new(RgbImage::from_pixel(4, 4, Rgb([100, 100, 100])), 7);
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-3);
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_decode_mjpeg_roundtrip() {
        let img = RgbImage::from_pixel(8, 8, Rgb([40, 160, 220]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let decoded = decode_mjpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        assert!(decode_mjpeg(&[0, 1, 2, 3]).is_err());
    }
}
