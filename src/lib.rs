//! capture-v4l2 - single-device V4L2 still capture
//!
//! Negotiates a format with a V4L2 capture device, cycles one memory-mapped
//! buffer through the driver and encodes each frame as a baseline JPEG.

pub mod error;
pub mod video;

pub use error::{CaptureError, Result};
