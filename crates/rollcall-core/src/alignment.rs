//! Face alignment via a 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout and
//! resamples the face into the 112×112 crop ArcFace expects.

use image::{GrayImage, Luma};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + [tx; ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit on centered point sets.
    ///
    /// Returns `None` when the source points are degenerate (all coincident).
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut spread = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            spread += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if spread < 1e-12 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
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

/// Bilinear sample; pixels outside the image read as black.
fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |px: i64, py: i64| -> f32 {
        if px >= 0 && px < w && py >= 0 && py < h {
            image.get_pixel(px as u32, py as u32).0[0] as f32
        } else {
            0.0
        }
    };

    px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x0 + 1, y0) * fx * (1.0 - fy)
        + px(x0, y0 + 1) * (1.0 - fx) * fy
        + px(x0 + 1, y0 + 1) * fx * fy
}

/// Align a detected face to a canonical 112×112 crop.
///
/// Degenerate landmarks produce an all-black crop rather than an error.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let Some(transform) = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS) else {
        return GrayImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };

    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let value = transform
            .invert((ox as f32, oy as f32))
            .map(|(sx, sy)| sample_bilinear(image, sx, sy))
            .unwrap_or(0.0);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale -> scale factor ~0.5
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3);
    }

    #[test]
    fn test_rotation_roundtrip() {
        let angle = 0.3f32;
        let (s, c) = angle.sin_cos();
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (c * x - s * y + 10.0, s * x + c * y - 4.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();

        for (p, expected) in src.iter().zip(REFERENCE_LANDMARKS.iter()) {
            let (x, y) = t.apply(*p);
            assert!((x - expected.0).abs() < 1e-2 && (y - expected.1).abs() < 1e-2);
            let (bx, by) = t.invert((x, y)).unwrap();
            assert!((bx - p.0).abs() < 1e-2 && (by - p.1).abs() < 1e-2);
        }
    }

    #[test]
    fn test_degenerate_landmarks() {
        let src = [(5.0, 5.0); 5];
        assert!(Similarity::estimate(&src, &REFERENCE_LANDMARKS).is_none());
        let aligned = align_face(&GrayImage::from_pixel(20, 20, Luma([200])), &src);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert!(aligned.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = GrayImage::from_pixel(640, 480, Luma([128]));
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let mut frame = GrayImage::new(200, 200);
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Luma([255]));
            }
        }

        let aligned = align_face(&frame, &src);

        let rx = REFERENCE_LANDMARKS[0].0.round() as u32;
        let ry = REFERENCE_LANDMARKS[0].1.round() as u32;
        let brightest = (rx - 1..=rx + 1)
            .flat_map(|x| (ry - 1..=ry + 1).map(move |y| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "expected bright patch near ({rx}, {ry}), got {brightest}");
    }
}
