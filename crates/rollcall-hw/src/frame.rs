//! Grayscale frames and raw buffer conversion.

use image::GrayImage;
use thiserror::Error;

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// Pixel values below this are treated as black for dark-frame detection.
const DARK_PIXEL_LEVEL: u8 = 32;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("{format:?} buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Pixel format negotiated with the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, reduced to the high byte.
    Y16,
}

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap grayscale bytes, classifying darkness on the way in.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// View as an image; `None` if the buffer does not match the dimensions.
    pub fn into_image(self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data)
    }
}

/// Convert a raw device buffer to 8-bit grayscale.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    let bytes_per_pixel = match format {
        PixelFormat::Grey => 1,
        PixelFormat::Yuyv | PixelFormat::Y16 => 2,
    };
    let expected = pixels * bytes_per_pixel;
    if buf.len() < expected {
        return Err(FrameError::ShortBuffer {
            format,
            expected,
            actual: buf.len(),
        });
    }

    let gray = match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        // [Y0, U, Y1, V]: luma is every even byte.
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        // Little-endian: the high byte sits at the odd offset.
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    };
    Ok(gray)
}

/// True if more than `threshold_pct` of pixels are near-black. Empty frames are dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}
