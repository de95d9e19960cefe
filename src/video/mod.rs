//! V4L2 still capture and JPEG encoding
//!
//! Leaves first: [`device`] talks to the driver, [`negotiate`] and
//! [`buffer`] set up one mapped buffer, [`capture`] cycles it, [`convert`]
//! and [`encoder`] turn frames into JPEGs, [`session`] wires them together.

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod decoder;
pub mod device;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod negotiate;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BufferManager, MappedFrameBuffer};
pub use capture::{CaptureConfig, CaptureLoop, CaptureMeta, CaptureState};
pub use convert::{PixelConverter, PlanarFrame};
pub use decoder::MjpegDecoder;
pub use device::{CaptureDevice, DeviceCapabilities, DeviceHandle};
pub use encoder::{EncodedImage, JpegEncoder, ScanlineSource};
pub use format::{FormatDescriptor, NegotiatedFormat, PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use negotiate::FormatNegotiator;
pub use session::{probe, CaptureSession, DeviceReport};
