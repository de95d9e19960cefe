//! Captured frame data

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// The valid bytes of one dequeued capture buffer, with metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame bytes, copied out of the mapped buffer
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Bytes per line (0 for compressed formats)
    pub stride: u32,
    /// Driver sequence number
    pub sequence: u64,
    /// When the buffer was dequeued
    pub capture_ts: Instant,
}

impl VideoFrame {
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            resolution,
            format,
            stride,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, stride, sequence)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Frame bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Time since the frame was dequeued
    pub fn age(&self) -> std::time::Duration {
        self.capture_ts.elapsed()
    }

    /// Bytes the geometry requires, for uncompressed formats.
    ///
    /// The last row only needs its pixels, not the full stride.
    pub fn expected_len(&self) -> Option<usize> {
        let bpp = self.format.bytes_per_pixel()?;
        let height = self.resolution.height as usize;
        if height == 0 {
            return Some(0);
        }
        let row = self.resolution.width as usize * bpp;
        let stride = (self.stride as usize).max(row);
        Some(stride * (height - 1) + row)
    }

    /// Whether the frame holds at least as many bytes as its geometry needs
    pub fn is_complete(&self) -> bool {
        match self.expected_len() {
            Some(expected) => self.data.len() >= expected,
            None => is_jpeg_stream(&self.data),
        }
    }
}

/// Cheap check for a JPEG stream: SOI at the start, EOI (or padding) at the end
pub fn is_jpeg_stream(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    if data[0] != 0xFF || data[1] != 0xD8 {
        return false;
    }
    let end = data.len();
    let end_marker = ((data[end - 2] as u16) << 8) | data[end - 1] as u16;
    // Some UVC devices pad after EOI
    matches!(end_marker, 0xFFD9 | 0xD900 | 0x0000)
}
