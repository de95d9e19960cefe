//! Pixel format definitions and negotiated frame geometry

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::FourCC;

/// Pixel encodings the capture pipeline can consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// MJPEG compressed at source
    Mjpeg,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        }
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" | b"YUY2" => Some(PixelFormat::Yuyv),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }

    /// Check if format is compressed (MJPEG)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Bytes per pixel for uncompressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Yuyv => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Expected frame size for a given resolution.
    /// Returns None for compressed formats (variable size)
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| resolution.pixels() as usize * bpp)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Mjpeg => "MJPEG",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YUYV" | "YUY2" => Ok(PixelFormat::Yuyv),
            "MJPEG" | "MJPG" | "JPEG" => Ok(PixelFormat::Mjpeg),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Same height, width rounded down to even (packed 4:2:2 pairs)
    pub fn even_width(&self) -> Resolution {
        Resolution::new(self.width & !1, self.height)
    }

    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const NHD: Resolution = Resolution {
        width: 640,
        height: 360,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Render a FourCC as text, replacing non-printable bytes
pub fn fourcc_string(fourcc: FourCC) -> String {
    fourcc
        .repr
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

/// Format the driver accepted, read back after VIDIOC_S_FMT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub resolution: Resolution,
    pub fourcc: FourCC,
    /// V4L2 field order (1 = progressive)
    pub field: u32,
    /// Bytes per line; 0 if the driver left it unset
    pub stride: u32,
    /// Driver-reported maximum image size in bytes
    pub size_image: u32,
}

impl NegotiatedFormat {
    /// Pipeline encoding for the negotiated FourCC
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_fourcc(self.fourcc)
    }

    /// Effective bytes per line for uncompressed formats
    pub fn effective_stride(&self, format: PixelFormat) -> usize {
        let packed = format
            .bytes_per_pixel()
            .map(|bpp| self.resolution.width as usize * bpp)
            .unwrap_or(0);
        (self.stride as usize).max(packed)
    }

    /// Minimum bytes a buffer must hold for one frame.
    ///
    /// Uncompressed frames need `stride * height`; compressed frames fall
    /// back to the driver's `sizeimage`.
    pub fn min_buffer_size(&self, format: PixelFormat) -> usize {
        if format.is_compressed() {
            self.size_image as usize
        } else {
            self.effective_stride(format) * self.resolution.height as usize
        }
    }
}

/// One entry of the device's supported-format listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub index: u32,
    #[serde(serialize_with = "serialize_fourcc")]
    pub fourcc: FourCC,
    pub description: String,
    pub compressed: bool,
    pub emulated: bool,
}

impl FormatDescriptor {
    /// Pipeline encoding, if this entry is one we can consume
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_fourcc(self.fourcc)
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{} {}",
            fourcc_string(self.fourcc),
            if self.compressed { 'C' } else { ' ' },
            if self.emulated { 'E' } else { ' ' },
            self.description
        )
    }
}

fn serialize_fourcc<S: serde::Serializer>(fourcc: &FourCC, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&fourcc_string(*fourcc))
}
