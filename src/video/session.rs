//! Capture session: one device, one negotiated format, one mapped buffer

use bytes::Bytes;
use tracing::{debug, info};

use super::buffer::BufferManager;
use super::capture::{CaptureConfig, CaptureLoop, CaptureState};
use super::convert::{PackedScanlines, PixelConverter, PlanarScanlines, RgbScanlines};
use super::decoder::MjpegDecoder;
use super::device::{CaptureDevice, DeviceCapabilities, DeviceHandle};
use super::encoder::{EncodedImage, JpegEncoder};
use super::format::{fourcc_string, FormatDescriptor, NegotiatedFormat, PixelFormat};
use super::frame::VideoFrame;
use super::negotiate::FormatNegotiator;
use crate::error::{CaptureError, Result};

/// How captured frames reach the encoder, fixed at negotiation time
enum Conversion {
    /// YUYV read directly as scanlines
    Packed,
    /// YUYV through a planar 4:2:0 intermediate
    Planar(PixelConverter),
    /// MJPEG decoded to RGB first
    Decode(MjpegDecoder),
}

/// Capability and format listing of a device
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceReport {
    pub capabilities: DeviceCapabilities,
    pub formats: Vec<FormatDescriptor>,
}

/// Query capabilities and list formats without touching the stream
pub fn probe<D: CaptureDevice>(device: &mut D) -> Result<DeviceReport> {
    let negotiator = FormatNegotiator::new(device);
    let capabilities = negotiator.query_capabilities()?;
    let formats = negotiator.enumerate_formats().collect::<Result<Vec<_>>>()?;
    Ok(DeviceReport {
        capabilities,
        formats,
    })
}

/// A negotiated capture device ready to produce frames and JPEGs
pub struct CaptureSession<D: CaptureDevice> {
    capture: CaptureLoop<D>,
    capabilities: DeviceCapabilities,
    format: NegotiatedFormat,
    pixel_format: PixelFormat,
    conversion: Conversion,
    encoder: JpegEncoder,
}

impl CaptureSession<DeviceHandle> {
    /// Open `config.device_path` and negotiate
    pub fn open_path(config: &CaptureConfig) -> Result<Self> {
        let device = DeviceHandle::open(&config.device_path)?;
        Self::open(device, config)
    }
}

impl<D: CaptureDevice> CaptureSession<D> {
    /// Negotiate a format on `device` and map its capture buffer
    pub fn open(mut device: D, config: &CaptureConfig) -> Result<Self> {
        let mut negotiator = FormatNegotiator::new(&mut device);

        let capabilities = negotiator.query_capabilities()?;
        info!(
            "Device: {} ({}) on {}, driver version {}",
            capabilities.card, capabilities.driver, capabilities.bus_info, capabilities.version
        );
        if !capabilities.video_capture {
            return Err(CaptureError::Unsupported(format!(
                "{} is not a single-planar video capture device",
                capabilities.card
            )));
        }
        if !capabilities.streaming {
            return Err(CaptureError::Unsupported(format!(
                "{} does not support streaming I/O",
                capabilities.card
            )));
        }

        for desc in negotiator.enumerate_formats() {
            desc?;
        }

        let format = negotiator.set_format(config.resolution, config.format)?;
        let pixel_format = format
            .pixel_format()
            .ok_or_else(|| CaptureError::UnsupportedFormat(fourcc_string(format.fourcc)))?;

        let buffer = BufferManager::new(&mut device).allocate(&format, pixel_format)?;

        let conversion = match pixel_format {
            PixelFormat::Mjpeg => Conversion::Decode(MjpegDecoder::new(format.resolution)?),
            PixelFormat::Yuyv if config.planar_intermediate => {
                Conversion::Planar(PixelConverter::yuyv_to_yuv420p(format.resolution))
            }
            PixelFormat::Yuyv => Conversion::Packed,
        };
        let encoder = JpegEncoder::with_quality(config.jpeg_quality)?;

        info!(
            "Capture session ready: {} {} quality={}",
            format.resolution,
            pixel_format,
            encoder.quality()
        );

        Ok(Self {
            capture: CaptureLoop::new(device, buffer, config.timeout),
            capabilities,
            format,
            pixel_format,
            conversion,
            encoder,
        })
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn device(&self) -> &D {
        self.capture.device()
    }

    /// Run one capture cycle and copy out the frame
    pub fn capture_frame(&mut self) -> Result<VideoFrame> {
        let mut data = Vec::with_capacity(self.capture.buffer().len());
        let meta = self.capture.next_into(&mut data)?;

        let stride = match self.pixel_format {
            PixelFormat::Yuyv => self.format.effective_stride(self.pixel_format) as u32,
            PixelFormat::Mjpeg => 0,
        };
        let frame = VideoFrame::new(
            Bytes::from(data),
            self.format.resolution,
            self.pixel_format,
            stride,
            meta.sequence,
        );

        if !frame.is_complete() {
            return Err(CaptureError::IncompleteFrame {
                expected: frame.expected_len().unwrap_or(0),
                actual: frame.len(),
            });
        }
        Ok(frame)
    }

    /// Run one capture cycle and encode the frame
    pub fn capture_jpeg(&mut self) -> Result<EncodedImage> {
        let frame = self.capture_frame()?;
        self.encode_frame(&frame)
    }

    /// Encode a frame captured by this session
    pub fn encode_frame(&mut self, frame: &VideoFrame) -> Result<EncodedImage> {
        let stride = frame.stride as usize;
        let image = match &mut self.conversion {
            Conversion::Packed => {
                let source = PackedScanlines::new(frame.data(), frame.resolution, stride)?;
                self.encoder.encode(&source, frame.sequence)?
            }
            Conversion::Planar(converter) => {
                let planar = converter.convert(frame.data(), stride)?;
                self.encoder.encode(&PlanarScanlines::new(planar), frame.sequence)?
            }
            Conversion::Decode(decoder) => {
                let rgb = decoder.decode_to_rgb(frame.data())?;
                let source = RgbScanlines::new(rgb, frame.resolution)?;
                self.encoder.encode(&source, frame.sequence)?
            }
        };

        debug!("Frame #{} encoded: {} bytes", image.sequence, image.len());
        Ok(image)
    }

    /// Stop streaming; the session can be restarted by capturing again
    pub fn stop(&mut self) -> Result<()> {
        self.capture.stop()
    }
}
