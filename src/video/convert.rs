//! Pixel format conversion
//!
//! Pure transforms between the packed 4:2:2 capture layout (YUYV), the
//! planar 4:2:0 intermediate (I420) and the interleaved YCbCr scanlines the
//! JPEG encoder consumes. Nothing here touches the device.

use crate::error::{CaptureError, Result};
use crate::video::encoder::ScanlineSource;
use crate::video::format::Resolution;

/// YUV 4:2:0 planar frame with separate Y, U, V planes.
///
/// Planes are tightly packed: Y is `width * height`, U and V are each
/// `ceil(width / 2) * ceil(height / 2)`, U before V.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarFrame {
    /// Raw buffer containing all planes
    data: Vec<u8>,
    resolution: Resolution,
    /// U plane offset
    u_offset: usize,
    /// V plane offset
    v_offset: usize,
}

impl PlanarFrame {
    /// Create a zeroed frame for the given resolution
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.pixels() as usize;
        let uv_size = Self::chroma_resolution_for(resolution).pixels() as usize;

        Self {
            data: vec![0u8; y_size + uv_size * 2],
            resolution,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    /// Create a frame filled with one colour
    pub fn filled(resolution: Resolution, y: u8, u: u8, v: u8) -> Self {
        let mut frame = Self::new(resolution);
        let (y_plane, u_plane, v_plane) = frame.planes_mut();
        y_plane.fill(y);
        u_plane.fill(u);
        v_plane.fill(v);
        frame
    }

    /// Chroma plane dimensions for a luma resolution
    pub fn chroma_resolution_for(resolution: Resolution) -> Resolution {
        Resolution::new(resolution.width.div_ceil(2), resolution.height.div_ceil(2))
    }

    pub fn chroma_resolution(&self) -> Resolution {
        Self::chroma_resolution_for(self.resolution)
    }

    /// Get the raw buffer as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    /// All three planes, mutably
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, chroma) = self.data.split_at_mut(self.u_offset);
        let (u, v) = chroma.split_at_mut(self.v_offset - self.u_offset);
        (y, u, v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Bytes a packed 4:2:2 frame needs; the last row may omit its padding
pub fn yuyv_frame_len(width: usize, height: usize, stride: usize) -> usize {
    if height == 0 {
        return 0;
    }
    stride * (height - 1) + width * 2
}

fn ensure_len(actual: usize, expected: usize) -> Result<()> {
    if actual < expected {
        return Err(CaptureError::IncompleteFrame { expected, actual });
    }
    Ok(())
}

/// Packed YUYV to planar I420.
///
/// Luma is copied 1:1. Chroma is averaged over each vertical pair of rows;
/// a trailing odd row keeps its own chroma. The frame's width should be even;
/// an odd last column is left untouched.
pub fn yuyv_to_yuv420p(src: &[u8], stride: usize, dst: &mut PlanarFrame) -> Result<()> {
    let resolution = dst.resolution();
    let luma_stride = resolution.width as usize;
    let chroma_stride = dst.chroma_resolution().width as usize;
    let width = luma_stride & !1;
    let height = resolution.height as usize;
    let stride = stride.max(width * 2);

    ensure_len(src.len(), yuyv_frame_len(width, height, stride))?;

    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in 0..height {
        let line = &src[row * stride..][..width * 2];
        let y_row = &mut y_plane[row * luma_stride..][..width];
        for (pair, out) in line.chunks_exact(4).zip(y_row.chunks_exact_mut(2)) {
            out[0] = pair[0];
            out[1] = pair[2];
        }
    }

    for (cy, row) in (0..height).step_by(2).enumerate() {
        let next = (row + 1).min(height - 1);
        let top = &src[row * stride..][..width * 2];
        let bottom = &src[next * stride..][..width * 2];
        let u_row = &mut u_plane[cy * chroma_stride..][..width / 2];
        let v_row = &mut v_plane[cy * chroma_stride..][..width / 2];

        for (cx, (t, b)) in top.chunks_exact(4).zip(bottom.chunks_exact(4)).enumerate() {
            u_row[cx] = ((t[1] as u16 + b[1] as u16) / 2) as u8;
            v_row[cx] = ((t[3] as u16 + b[3] as u16) / 2) as u8;
        }
    }

    Ok(())
}

/// Planar I420 back to packed YUYV; chroma rows are replicated vertically
pub fn yuv420p_to_yuyv(src: &PlanarFrame, dst: &mut Vec<u8>) {
    let resolution = src.resolution();
    let luma_stride = resolution.width as usize;
    let chroma_stride = src.chroma_resolution().width as usize;
    let width = luma_stride & !1;
    let height = resolution.height as usize;

    dst.clear();
    dst.reserve(width * 2 * height);

    for row in 0..height {
        let y_row = &src.y_plane()[row * luma_stride..][..width];
        let u_row = &src.u_plane()[(row / 2) * chroma_stride..][..width / 2];
        let v_row = &src.v_plane()[(row / 2) * chroma_stride..][..width / 2];

        for ((y, &u), &v) in y_row.chunks_exact(2).zip(u_row).zip(v_row) {
            dst.extend_from_slice(&[y[0], u, y[1], v]);
        }
    }
}

/// Packed YUYV to interleaved YCbCr, `width * height * 3` bytes.
///
/// Odd widths drop the last column.
pub fn yuyv_to_ycbcr(src: &[u8], resolution: Resolution, stride: usize) -> Result<Vec<u8>> {
    let source = PackedScanlines::new(src, resolution, stride)?;
    let resolution = source.resolution();
    let row_len = resolution.width as usize * 3;

    let mut out = vec![0u8; row_len * resolution.height as usize];
    if out.is_empty() {
        return Ok(out);
    }
    for (row, line) in out.chunks_exact_mut(row_len).enumerate() {
        source.read_scanline(row as u32, line);
    }
    Ok(out)
}

/// Owns an I420 output frame and fills it from packed YUYV input
pub struct PixelConverter {
    output: PlanarFrame,
}

impl PixelConverter {
    /// Converter for YUYV frames of the given size; width is truncated to even
    pub fn yuyv_to_yuv420p(resolution: Resolution) -> Self {
        Self {
            output: PlanarFrame::new(resolution.even_width()),
        }
    }

    /// Convert one frame; the result stays valid until the next call
    pub fn convert(&mut self, input: &[u8], stride: usize) -> Result<&PlanarFrame> {
        yuyv_to_yuv420p(input, stride, &mut self.output)?;
        Ok(&self.output)
    }

    pub fn output(&self) -> &PlanarFrame {
        &self.output
    }

    pub fn resolution(&self) -> Resolution {
        self.output.resolution()
    }
}

/// Scanlines read straight from a packed YUYV frame.
///
/// Every `Y0 U Y1 V` group becomes `Y0 U V Y1 U V`.
pub struct PackedScanlines<'a> {
    data: &'a [u8],
    stride: usize,
    resolution: Resolution,
}

impl<'a> PackedScanlines<'a> {
    pub fn new(data: &'a [u8], resolution: Resolution, stride: usize) -> Result<Self> {
        let resolution = resolution.even_width();
        let width = resolution.width as usize;
        let stride = stride.max(width * 2);
        ensure_len(data.len(), yuyv_frame_len(width, resolution.height as usize, stride))?;

        Ok(Self {
            data,
            stride,
            resolution,
        })
    }
}

impl ScanlineSource for PackedScanlines<'_> {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read_scanline(&self, row: u32, out: &mut [u8]) {
        let width = self.resolution.width as usize;
        let line = &self.data[row as usize * self.stride..][..width * 2];

        for (pair, px) in line.chunks_exact(4).zip(out.chunks_exact_mut(6)) {
            let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
            px.copy_from_slice(&[y0, u, v, y1, u, v]);
        }
    }
}

/// Scanlines from an I420 frame; each pixel takes its 2x2 block's chroma
pub struct PlanarScanlines<'a> {
    frame: &'a PlanarFrame,
}

impl<'a> PlanarScanlines<'a> {
    pub fn new(frame: &'a PlanarFrame) -> Self {
        Self { frame }
    }
}

impl ScanlineSource for PlanarScanlines<'_> {
    fn resolution(&self) -> Resolution {
        self.frame.resolution()
    }

    fn read_scanline(&self, row: u32, out: &mut [u8]) {
        let width = self.frame.resolution().width as usize;
        let chroma_stride = self.frame.chroma_resolution().width as usize;
        let row = row as usize;

        let y_row = &self.frame.y_plane()[row * width..][..width];
        let u_row = &self.frame.u_plane()[(row / 2) * chroma_stride..][..chroma_stride];
        let v_row = &self.frame.v_plane()[(row / 2) * chroma_stride..][..chroma_stride];

        for (x, (px, &y)) in out.chunks_exact_mut(3).zip(y_row).enumerate() {
            px[0] = y;
            px[1] = u_row[x / 2];
            px[2] = v_row[x / 2];
        }
    }
}

/// Scanlines from packed RGB24, converted with JFIF (BT.601 full range)
pub struct RgbScanlines<'a> {
    data: &'a [u8],
    resolution: Resolution,
}

impl<'a> RgbScanlines<'a> {
    pub fn new(data: &'a [u8], resolution: Resolution) -> Result<Self> {
        ensure_len(data.len(), resolution.pixels() as usize * 3)?;
        Ok(Self { data, resolution })
    }
}

impl ScanlineSource for RgbScanlines<'_> {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read_scanline(&self, row: u32, out: &mut [u8]) {
        let row_len = self.resolution.width as usize * 3;
        let line = &self.data[row as usize * row_len..][..row_len];

        for (rgb, px) in line.chunks_exact(3).zip(out.chunks_exact_mut(3)) {
            px.copy_from_slice(&rgb_to_ycbcr(rgb[0], rgb[1], rgb[2]));
        }
    }
}

/// JFIF RGB to YCbCr in 16.16 fixed point
#[inline]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> [u8; 3] {
    const HALF: i32 = 1 << 15;
    const OFFSET: i32 = 128 << 16;
    let (r, g, b) = (r as i32, g as i32, b as i32);

    let y = (19595 * r + 38470 * g + 7471 * b + HALF) >> 16;
    let cb = (-11056 * r - 21712 * g + 32768 * b + OFFSET + HALF - 1) >> 16;
    let cr = (32768 * r - 27440 * g - 5328 * b + OFFSET + HALF - 1) >> 16;

    [
        y.clamp(0, 255) as u8,
        cb.clamp(0, 255) as u8,
        cr.clamp(0, 255) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_frame_layout() {
        let frame = PlanarFrame::new(Resolution::NHD);
        assert_eq!(frame.y_plane().len(), 640 * 360);
        assert_eq!(frame.u_plane().len(), 320 * 180);
        assert_eq!(frame.v_plane().len(), 320 * 180);
        assert_eq!(frame.len(), 640 * 360 * 3 / 2);

        let odd = PlanarFrame::new(Resolution::new(5, 3));
        assert_eq!(odd.chroma_resolution(), Resolution::new(3, 2));
        assert_eq!(odd.len(), 15 + 6 * 2);
    }

    #[test]
    fn test_yuyv_to_yuv420p_averages_row_pairs() {
        // 4x2, stride 8
        let src = [
            10, 100, 20, 200, 30, 110, 40, 210, //
            50, 120, 60, 220, 70, 130, 80, 230,
        ];
        let mut dst = PlanarFrame::new(Resolution::new(4, 2));
        yuyv_to_yuv420p(&src, 8, &mut dst).unwrap();

        assert_eq!(dst.y_plane(), &[10, 20, 30, 40, 50, 60, 70, 80]);
        assert_eq!(dst.u_plane(), &[110, 120]);
        assert_eq!(dst.v_plane(), &[210, 220]);
    }

    #[test]
    fn test_yuyv_to_yuv420p_honours_stride_and_odd_height() {
        // 2x3 with 2 bytes of row padding
        let src = [
            1, 10, 2, 20, 0xEE, 0xEE, //
            3, 30, 4, 40, 0xEE, 0xEE, //
            5, 50, 6, 60,
        ];
        let mut dst = PlanarFrame::new(Resolution::new(2, 3));
        yuyv_to_yuv420p(&src, 6, &mut dst).unwrap();

        assert_eq!(dst.y_plane(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(dst.u_plane(), &[20, 50]);
        assert_eq!(dst.v_plane(), &[30, 60]);
    }

    #[test]
    fn test_short_input_is_incomplete() {
        let mut dst = PlanarFrame::new(Resolution::new(4, 2));
        let err = yuyv_to_yuv420p(&[0u8; 12], 8, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::IncompleteFrame {
                expected: 16,
                actual: 12
            }
        ));
    }

    #[test]
    fn test_flat_colour_survives_planar_round_trip() {
        let planar = PlanarFrame::filled(Resolution::new(8, 4), 81, 90, 240);
        let mut packed = Vec::new();
        yuv420p_to_yuyv(&planar, &mut packed);
        assert_eq!(packed.len(), 8 * 4 * 2);

        let mut back = PlanarFrame::new(Resolution::new(8, 4));
        yuyv_to_yuv420p(&packed, 16, &mut back).unwrap();
        assert_eq!(back, planar);
    }

    #[test]
    fn test_yuyv_to_ycbcr_expands_pairs() {
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let out = yuyv_to_ycbcr(&src, Resolution::new(4, 1), 8).unwrap();
        assert_eq!(out, vec![1, 2, 4, 3, 2, 4, 5, 6, 8, 7, 6, 8]);
    }

    #[test]
    fn test_yuyv_to_ycbcr_length_and_odd_width() {
        let res = Resolution::NHD;
        let src = vec![128u8; 640 * 2 * 360];
        let out = yuyv_to_ycbcr(&src, res, 640 * 2).unwrap();
        assert_eq!(out.len(), 640 * 360 * 3);

        // 5 pixels wide: the driver pads to 3 pairs, we keep 2
        let src = vec![128u8; 12 * 2];
        let out = yuyv_to_ycbcr(&src, Resolution::new(5, 2), 12).unwrap();
        assert_eq!(out.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_planar_scanlines_share_block_chroma() {
        let mut frame = PlanarFrame::new(Resolution::new(4, 2));
        {
            let (y, u, v) = frame.planes_mut();
            y.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
            u.copy_from_slice(&[10, 20]);
            v.copy_from_slice(&[30, 40]);
        }
        let source = PlanarScanlines::new(&frame);
        let mut row = [0u8; 12];
        source.read_scanline(1, &mut row);
        assert_eq!(row, [5, 10, 30, 6, 10, 30, 7, 20, 40, 8, 20, 40]);
    }

    #[test]
    fn test_rgb_to_ycbcr_reference_colours() {
        assert_eq!(rgb_to_ycbcr(0, 0, 0), [0, 128, 128]);
        assert_eq!(rgb_to_ycbcr(255, 255, 255), [255, 128, 128]);
        assert_eq!(rgb_to_ycbcr(255, 0, 0), [76, 85, 255]);
    }

    #[test]
    fn test_pixel_converter_truncates_odd_width() {
        let mut converter = PixelConverter::yuyv_to_yuv420p(Resolution::new(5, 2));
        assert_eq!(converter.resolution(), Resolution::new(4, 2));
        let planar = converter.convert(&[128u8; 24], 12).unwrap();
        assert!(planar.y_plane().iter().all(|&y| y == 128));
    }
}
