//! Face alignment via a least-squares similarity transform.
//!
//! Maps the five detected landmarks onto the ArcFace reference layout and
//! warps the face into a canonical 112×112 RGB crop.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// 4-DOF similarity transform (uniform scale, rotation, translation):
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Closed-form least-squares fit of `src → dst`.
    ///
    /// Degenerate input (all source points coincide) yields the identity.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        let n = src.len() as f32;
        let (smx, smy) = centroid(src);
        let (dmx, dmy) = centroid(dst);

        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (px, py) = (sx - smx, sy - smy);
            let (qx, qy) = (dx - dmx, dy - dmy);
            num_a += px * qx + py * qy;
            num_b += px * qy - py * qx;
            denom += px * px + py * py;
        }

        if denom / n < 1e-9 {
            return Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    pub fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

fn centroid(points: &Landmarks) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Bilinear sample with black outside the image.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (w, h) = (image.width() as i64, image.height() as i64);

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            return [0.0; 3];
        }
        let Rgb(c) = *image.get_pixel(px as u32, py as u32);
        [c[0] as f32, c[1] as f32, c[2] as f32]
    };

    let (ix, iy) = (x0 as i64, y0 as i64);
    let tl = texel(ix, iy);
    let tr = texel(ix + 1, iy);
    let bl = texel(ix, iy + 1);
    let br = texel(ix + 1, iy + 1);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

pub(crate) fn warp(image: &RgbImage, transform: &SimilarityTransform, size: u32) -> RgbImage {
    let mut out = RgbImage::new(size, size);
    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let Some((sx, sy)) = transform.invert((ox as f32, oy as f32)) else {
            continue;
        };
        let [r, g, b] = sample(image, sx, sy);
        *pixel = Rgb([
            r.round().clamp(0.0, 255.0) as u8,
            g.round().clamp(0.0, 255.0) as u8,
            b.round().clamp(0.0, 255.0) as u8,
        ]);
    }
    out
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> RgbImage {
    let transform = SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(image, &transform, ALIGNED_SIZE)
}
