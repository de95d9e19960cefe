//! MJPEG decoder using TurboJPEG (software) -> RGB24.

use turbojpeg::{Decompressor, Image, PixelFormat as TJPixelFormat};

use crate::error::{CaptureError, Result};
use crate::video::format::Resolution;

/// Decodes MJPEG frames of a fixed, negotiated geometry.
///
/// The RGB output buffer is reused across frames.
pub struct MjpegDecoder {
    decompressor: Decompressor,
    resolution: Resolution,
    rgb: Vec<u8>,
}

impl MjpegDecoder {
    pub fn new(resolution: Resolution) -> Result<Self> {
        let decompressor = Decompressor::new().map_err(|e| {
            CaptureError::Encoding(format!("Failed to create turbojpeg decoder: {}", e))
        })?;
        Ok(Self {
            decompressor,
            resolution,
            rgb: Vec::new(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Geometry declared by the stream's frame header
    pub fn read_resolution(&mut self, mjpeg: &[u8]) -> Result<Resolution> {
        let header = self
            .decompressor
            .read_header(mjpeg)
            .map_err(|e| CaptureError::Encoding(format!("turbojpeg read_header failed: {}", e)))?;
        Ok(Resolution::new(header.width as u32, header.height as u32))
    }

    /// Decode one frame to packed RGB24, `width * height * 3` bytes
    pub fn decode_to_rgb(&mut self, mjpeg: &[u8]) -> Result<&[u8]> {
        let actual = self.read_resolution(mjpeg)?;
        if actual != self.resolution {
            return Err(CaptureError::Encoding(format!(
                "decoded size mismatch: {} (negotiated {})",
                actual, self.resolution
            )));
        }

        let width = actual.width as usize;
        let height = actual.height as usize;
        let pitch = width * 3;
        self.rgb.resize(height * pitch, 0);

        let image = Image {
            pixels: self.rgb.as_mut_slice(),
            width,
            pitch,
            height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(mjpeg, image)
            .map_err(|e| CaptureError::Encoding(format!("turbojpeg decode failed: {}", e)))?;

        Ok(&self.rgb)
    }
}
