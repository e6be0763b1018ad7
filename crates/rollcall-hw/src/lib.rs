//! rollcall-hw: camera capture for the attendance loop.
//!
//! Provides V4L2-based camera access, conversion of raw buffers to
//! grayscale frames, and the `FrameSource` seam the capture loop reads from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, FrameStream};
pub use frame::{Frame, FrameError, PixelFormat};
