//! Encoder input contract and output type

use bytes::Bytes;
use std::time::Instant;

use crate::video::format::Resolution;
use crate::video::frame::is_jpeg_stream;

/// A frame the encoder can pull one scanline at a time.
///
/// Rows are interleaved `Y Cb Cr` triplets, `width * 3` bytes each.
/// Sources validate their input when constructed, so reading a row
/// in `0..height` cannot fail.
pub trait ScanlineSource {
    fn resolution(&self) -> Resolution;

    /// Write row `row` into `out`, which is exactly `width * 3` bytes
    fn read_scanline(&self, row: u32, out: &mut [u8]);
}

impl<S: ScanlineSource + ?Sized> ScanlineSource for &S {
    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }

    fn read_scanline(&self, row: u32, out: &mut [u8]) {
        (**self).read_scanline(row, out)
    }
}

/// A finished baseline JPEG
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// JPEG byte stream
    pub data: Bytes,
    pub resolution: Resolution,
    /// Sequence number of the source frame
    pub sequence: u64,
    /// Encoding timestamp
    pub timestamp: Instant,
}

impl EncodedImage {
    pub fn new(data: Bytes, resolution: Resolution, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            sequence,
            timestamp: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Starts with SOI and ends with EOI
    pub fn is_valid_jpeg(&self) -> bool {
        is_jpeg_stream(&self.data)
    }
}
