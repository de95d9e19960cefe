use std::io;
use std::time::Duration;

use thiserror::Error;

/// Capture pipeline error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device error during {op}: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported device: {0}")]
    Unsupported(String),

    #[error("Unsupported pixel format negotiated: {0}")]
    UnsupportedFormat(String),

    #[error("Capture buffer too small: {actual} bytes, frame needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Failed to map capture buffer ({length} bytes at offset {offset}): {source}")]
    Resource {
        length: usize,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("No frame ready within {0:?}")]
    Timeout(Duration),

    #[error("Incomplete frame: {actual} bytes, expected {expected}")]
    IncompleteFrame { expected: usize, actual: usize },

    #[error("Driver flagged frame #{sequence} as corrupt")]
    CorruptFrame { sequence: u64 },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl CaptureError {
    /// Wrap a failed control request
    pub fn device(op: &'static str, source: io::Error) -> Self {
        CaptureError::Device { op, source }
    }

    /// Whether the session stays usable after this error.
    ///
    /// Timeouts leave the buffer queued and the mapping intact; corrupt,
    /// short and unencodable frames only lose the current frame. Everything else requires the
    /// caller to tear the session down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::Timeout(_)
                | CaptureError::IncompleteFrame { .. }
                | CaptureError::CorruptFrame { .. }
                | CaptureError::Encoding(_)
        )
    }
}

/// Result type alias for the capture pipeline
pub type Result<T> = std::result::Result<T, CaptureError>;
