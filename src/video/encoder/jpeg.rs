//! Baseline JPEG encoder
//!
//! Pulls YCbCr scanlines from a [`ScanlineSource`] one row at a time,
//! downsamples them into 4:2:0 planes and hands those to turbojpeg's YUV
//! compressor, which skips its own colour conversion.

use bytes::Bytes;
use tracing::debug;

use super::traits::{EncodedImage, ScanlineSource};
use crate::error::{CaptureError, Result};
use crate::video::convert::PlanarFrame;
use crate::video::format::Resolution;

/// Quality used unless the caller picks another
pub const DEFAULT_JPEG_QUALITY: u32 = 92;

/// JPEG encoder using turbojpeg
///
/// Encoding pipeline:
/// ```text
/// scanlines (Y Cb Cr) ──row-by-row──> I420 ──turbojpeg──> JPEG
/// ```
///
/// Note: This encoder is NOT thread-safe due to turbojpeg limitations.
pub struct JpegEncoder {
    quality: u32,
    compressor: turbojpeg::Compressor,
    /// I420 planes fed to turbojpeg, padded to even dimensions
    planes: Option<PlanarFrame>,
    /// One source scanline
    row: Vec<u8>,
    /// Horizontal chroma sums of the pending even row, Cb/Cr interleaved
    chroma_acc: Vec<u16>,
}

impl JpegEncoder {
    /// Create an encoder at the default quality
    pub fn new() -> Result<Self> {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Create with specific quality (1-100)
    pub fn with_quality(quality: u32) -> Result<Self> {
        let quality = quality.clamp(1, 100);
        let mut compressor = turbojpeg::Compressor::new().map_err(|e| {
            CaptureError::Encoding(format!("Failed to create turbojpeg compressor: {}", e))
        })?;
        compressor
            .set_quality(quality as i32)
            .map_err(|e| CaptureError::Encoding(format!("Failed to set JPEG quality: {}", e)))?;

        Ok(Self {
            quality,
            compressor,
            planes: None,
            row: Vec::new(),
            chroma_acc: Vec::new(),
        })
    }

    pub fn quality(&self) -> u32 {
        self.quality
    }

    /// Encode a full frame pulled from `source`
    pub fn encode<S: ScanlineSource>(&mut self, source: &S, sequence: u64) -> Result<EncodedImage> {
        let resolution = source.resolution();
        if resolution.is_empty() {
            return Err(CaptureError::Encoding(format!(
                "invalid image geometry {}",
                resolution
            )));
        }

        let padded = Resolution::new(
            resolution.width.next_multiple_of(2),
            resolution.height.next_multiple_of(2),
        );
        let width = resolution.width as usize;
        self.row.resize(width * 3, 0);
        self.chroma_acc.resize(width.div_ceil(2) * 2, 0);

        if self.planes.as_ref().is_some_and(|p| p.resolution() != padded) {
            self.planes = None;
        }
        let planes = self.planes.get_or_insert_with(|| PlanarFrame::new(padded));

        for row in 0..resolution.height {
            source.read_scanline(row, &mut self.row);
            downsample_row(row, resolution, &self.row, planes, &mut self.chroma_acc);
        }

        let yuv_image = turbojpeg::YuvImage {
            pixels: planes.as_bytes(),
            width,
            height: resolution.height as usize,
            align: 1,
            subsamp: turbojpeg::Subsamp::Sub2x2,
        };

        let jpeg = self
            .compressor
            .compress_yuv_to_vec(yuv_image)
            .map_err(|e| CaptureError::Encoding(format!("JPEG compression failed: {}", e)))?;

        debug!(
            "Encoded {} frame #{} to {} bytes",
            resolution,
            sequence,
            jpeg.len()
        );
        Ok(EncodedImage::new(Bytes::from(jpeg), resolution, sequence))
    }
}

/// Write one YCbCr scanline into the padded I420 planes.
///
/// Even rows park their horizontal chroma sums in `acc`; the following odd
/// row completes the 2x2 average. Odd widths and heights replicate the edge
/// pixel into the padding.
fn downsample_row(
    row: u32,
    resolution: Resolution,
    scanline: &[u8],
    planes: &mut PlanarFrame,
    acc: &mut [u16],
) {
    let width = resolution.width as usize;
    let height = resolution.height;
    let padded_width = planes.resolution().width as usize;
    let chroma_width = padded_width / 2;
    let row = row as usize;
    let (y_plane, u_plane, v_plane) = planes.planes_mut();

    let y_row = &mut y_plane[row * padded_width..][..padded_width];
    for (y, px) in y_row.iter_mut().zip(scanline.chunks_exact(3)) {
        *y = px[0];
    }
    if padded_width > width {
        y_row[width] = y_row[width - 1];
    }
    let last_row = row as u32 + 1 == height;
    if last_row && row % 2 == 0 {
        y_plane.copy_within(row * padded_width..(row + 1) * padded_width, (row + 1) * padded_width);
    }

    let u_row = &mut u_plane[(row / 2) * chroma_width..][..chroma_width];
    let v_row = &mut v_plane[(row / 2) * chroma_width..][..chroma_width];

    for cx in 0..chroma_width {
        let left = &scanline[cx * 2 * 3..][..3];
        let right = &scanline[(cx * 2 + 1).min(width - 1) * 3..][..3];
        let cb = left[1] as u16 + right[1] as u16;
        let cr = left[2] as u16 + right[2] as u16;

        if row % 2 == 0 {
            acc[cx * 2] = cb;
            acc[cx * 2 + 1] = cr;
            if last_row {
                u_row[cx] = ((cb * 2 + 2) / 4) as u8;
                v_row[cx] = ((cr * 2 + 2) / 4) as u8;
            }
        } else {
            u_row[cx] = ((acc[cx * 2] + cb + 2) / 4) as u8;
            v_row[cx] = ((acc[cx * 2 + 1] + cr + 2) / 4) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::convert::{PackedScanlines, PlanarScanlines};
    use crate::video::decoder::MjpegDecoder;

    struct Flat {
        resolution: Resolution,
        pixel: [u8; 3],
    }

    impl ScanlineSource for Flat {
        fn resolution(&self) -> Resolution {
            self.resolution
        }

        fn read_scanline(&self, _row: u32, out: &mut [u8]) {
            for px in out.chunks_exact_mut(3) {
                px.copy_from_slice(&self.pixel);
            }
        }
    }

    #[test]
    fn test_zero_geometry_is_rejected() {
        let mut encoder = JpegEncoder::new().unwrap();
        let source = Flat {
            resolution: Resolution::new(0, 16),
            pixel: [128, 128, 128],
        };
        assert!(matches!(
            encoder.encode(&source, 0),
            Err(CaptureError::Encoding(_))
        ));
    }

    #[test]
    fn test_mid_grey_yuyv_encodes_to_decodable_jpeg() {
        let res = Resolution::NHD;
        let yuyv = vec![128u8; 640 * 2 * 360];
        let source = PackedScanlines::new(&yuyv, res, 640 * 2).unwrap();

        let mut encoder = JpegEncoder::new().unwrap();
        let image = encoder.encode(&source, 3).unwrap();

        assert!(!image.is_empty());
        assert_eq!(&image.data[..2], &[0xFF, 0xD8]);
        assert!(image.is_valid_jpeg());
        assert_eq!(image.resolution, res);
        assert_eq!(image.sequence, 3);

        let mut decoder = MjpegDecoder::new(res).unwrap();
        let rgb = decoder.decode_to_rgb(&image.data).unwrap();
        assert_eq!(rgb.len(), 640 * 360 * 3);
        assert!(rgb.iter().all(|&c| c.abs_diff(128) <= 3));
    }

    #[test]
    fn test_flat_planar_frame_round_trips_within_tolerance() {
        let res = Resolution::new(64, 48);
        // Y=81 Cb=90 Cr=240 is close to pure red
        let planar = PlanarFrame::filled(res, 81, 90, 240);

        let mut encoder = JpegEncoder::with_quality(95).unwrap();
        let image = encoder.encode(&PlanarScanlines::new(&planar), 0).unwrap();

        let mut decoder = MjpegDecoder::new(res).unwrap();
        let rgb = decoder.decode_to_rgb(&image.data).unwrap();
        let centre = (24 * 64 + 32) * 3;
        let (r, g, b) = (rgb[centre], rgb[centre + 1], rgb[centre + 2]);
        assert!(r > 200, "red channel {}", r);
        assert!(g < 40, "green channel {}", g);
        assert!(b < 40, "blue channel {}", b);
    }

    #[test]
    fn test_odd_geometry_and_scratch_reuse() {
        let mut encoder = JpegEncoder::new().unwrap();
        for res in [Resolution::new(33, 17), Resolution::new(33, 17), Resolution::new(16, 8)] {
            let source = Flat {
                resolution: res,
                pixel: [200, 128, 128],
            };
            let image = encoder.encode(&source, 0).unwrap();
            let mut decoder = MjpegDecoder::new(res).unwrap();
            let rgb = decoder.decode_to_rgb(&image.data).unwrap();
            assert_eq!(rgb.len(), res.pixels() as usize * 3);
        }
        assert_eq!(
            encoder.planes.as_ref().map(|p| p.resolution()),
            Some(Resolution::new(16, 8))
        );
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegEncoder::with_quality(0).unwrap().quality(), 1);
        assert_eq!(JpegEncoder::with_quality(250).unwrap().quality(), 100);
    }
}
