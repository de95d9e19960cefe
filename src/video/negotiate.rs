//! Capability query, format enumeration and format negotiation

use tracing::{debug, info, warn};

use super::device::{CaptureDevice, DeviceCapabilities};
use super::format::{fourcc_string, FormatDescriptor, NegotiatedFormat, PixelFormat, Resolution};
use crate::error::{CaptureError, Result};

/// Negotiates the capture format with a device
pub struct FormatNegotiator<'a, D> {
    device: &'a mut D,
}

impl<'a, D: CaptureDevice> FormatNegotiator<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self { device }
    }

    pub fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        self.device
            .query_capabilities()
            .map_err(|e| CaptureError::device("VIDIOC_QUERYCAP", e))
    }

    /// Lazily list the formats the device offers for capture
    pub fn enumerate_formats(&self) -> FormatIter<'_, D> {
        FormatIter {
            device: &*self.device,
            index: 0,
            done: false,
        }
    }

    /// Request `resolution` in `format`, progressive.
    ///
    /// Drivers may substitute another geometry or encoding; the returned
    /// format is what the device will actually deliver.
    pub fn set_format(
        &mut self,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<NegotiatedFormat> {
        let requested = format.to_fourcc();
        let negotiated = self
            .device
            .set_format(resolution, requested)
            .map_err(|e| CaptureError::device("VIDIOC_S_FMT", e))?;

        if negotiated.resolution != resolution || negotiated.fourcc != requested {
            warn!(
                "Driver substituted format: requested {} {}, got {} {}",
                resolution,
                fourcc_string(requested),
                negotiated.resolution,
                fourcc_string(negotiated.fourcc)
            );
        }

        if negotiated.pixel_format().is_none() {
            return Err(CaptureError::UnsupportedFormat(fourcc_string(
                negotiated.fourcc,
            )));
        }

        info!(
            "Negotiated format: {} {} stride={} size={}",
            negotiated.resolution,
            fourcc_string(negotiated.fourcc),
            negotiated.stride,
            negotiated.size_image
        );
        Ok(negotiated)
    }
}

/// Iterator over ENUM_FMT results; stops at the first out-of-range index
pub struct FormatIter<'a, D> {
    device: &'a D,
    index: u32,
    done: bool,
}

impl<D: CaptureDevice> Iterator for FormatIter<'_, D> {
    type Item = Result<FormatDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.device.enum_format(self.index) {
            Ok(Some(desc)) => {
                debug!("Format {}: {}", self.index, desc);
                self.index += 1;
                Some(Ok(desc))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(CaptureError::device("VIDIOC_ENUM_FMT", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::FakeDevice;
    use v4l::FourCC;

    #[test]
    fn test_enumerate_stops_at_end_of_list() {
        let mut device = FakeDevice::new();
        let negotiator = FormatNegotiator::new(&mut device);
        let formats: Vec<_> = negotiator
            .enumerate_formats()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].pixel_format(), Some(PixelFormat::Yuyv));
        assert!(formats[1].compressed);
    }

    #[test]
    fn test_set_format_accepts_request() {
        let mut device = FakeDevice::new();
        let mut negotiator = FormatNegotiator::new(&mut device);
        let format = negotiator
            .set_format(Resolution::HD720, PixelFormat::Yuyv)
            .unwrap();

        assert_eq!(format.resolution, Resolution::HD720);
        assert_eq!(format.stride, 1280 * 2);
        assert_eq!(format.pixel_format(), Some(PixelFormat::Yuyv));
    }

    #[test]
    fn test_set_format_returns_substituted_geometry() {
        let mut device = FakeDevice::new();
        device.substitute = Some((Resolution::NHD, FourCC::new(b"YUYV")));
        let mut negotiator = FormatNegotiator::new(&mut device);
        let format = negotiator
            .set_format(Resolution::HD720, PixelFormat::Yuyv)
            .unwrap();

        assert_eq!(format.resolution, Resolution::NHD);
        assert_eq!(format.min_buffer_size(PixelFormat::Yuyv), 640 * 2 * 360);
    }

    #[test]
    fn test_unsupported_substitution_fails() {
        let mut device = FakeDevice::new();
        device.substitute = Some((Resolution::NHD, FourCC::new(b"NV12")));
        let mut negotiator = FormatNegotiator::new(&mut device);
        let err = negotiator
            .set_format(Resolution::HD720, PixelFormat::Yuyv)
            .unwrap_err();

        assert!(matches!(err, CaptureError::UnsupportedFormat(ref f) if f == "NV12"));
    }
}
