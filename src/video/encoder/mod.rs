//! JPEG encoding
//!
//! The encoder consumes any [`ScanlineSource`]: packed YUYV, a planar
//! I420 intermediate or decoded RGB.

pub mod jpeg;
pub mod traits;

pub use jpeg::{JpegEncoder, DEFAULT_JPEG_QUALITY};
pub use traits::{EncodedImage, ScanlineSource};
