//! Frame preprocessing ahead of detection: histogram equalization and blur.

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

/// Preprocessing options, applied identically to enrollment images and live frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preprocess {
    /// Apply global histogram equalization.
    pub equalize: bool,
    /// Gaussian blur sigma; `0.0` disables blurring.
    pub blur_sigma: f32,
}

impl Default for Preprocess {
    fn default() -> Self {
        Self {
            equalize: true,
            blur_sigma: 1.1,
        }
    }
}

impl Preprocess {
    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let mut out = image.clone();
        if self.equalize {
            equalize_histogram(&mut out);
        }
        if self.blur_sigma > 0.0 {
            out = imageops::blur(&out, self.blur_sigma);
        }
        out
    }
}

/// Global histogram equalization in place.
///
/// Maps each intensity through the normalized cumulative histogram so the
/// output spans the full 0–255 range. Uniform images are left untouched.
pub fn equalize_histogram(image: &mut GrayImage) {
    let total = (image.width() as u64) * (image.height() as u64);
    if total == 0 {
        return;
    }

    let mut hist = [0u64; 256];
    for p in image.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (bin, count) in hist.iter().enumerate() {
        running += count;
        cdf[bin] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let denom = total - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (bin, slot) in lut.iter_mut().enumerate() {
        let scaled = (cdf[bin].saturating_sub(cdf_min) as f64 / denom as f64) * 255.0;
        *slot = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in image.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
}
