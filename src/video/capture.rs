//! V4L2 capture state machine
//!
//! One kernel buffer cycles through enqueue, stream-on, readiness wait and
//! dequeue. The mapped bytes are only read between a successful dequeue and
//! the next enqueue.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::buffer::MappedFrameBuffer;
use super::device::CaptureDevice;
use super::encoder::DEFAULT_JPEG_QUALITY;
use super::format::{PixelFormat, Resolution};
use crate::error::{CaptureError, Result};

/// Default readiness wait in seconds
const DEFAULT_TIMEOUT: u64 = 2;

/// Capture session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device path
    pub device_path: PathBuf,
    /// Desired resolution
    pub resolution: Resolution,
    /// Desired pixel format
    pub format: PixelFormat,
    /// Readiness wait per frame
    pub timeout: Duration,
    /// JPEG quality (1-100)
    pub jpeg_quality: u32,
    /// Convert YUYV through a planar 4:2:0 frame before encoding
    pub planar_intermediate: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            resolution: Resolution::HD720,
            format: PixelFormat::Yuyv,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            planar_intermediate: false,
        }
    }
}

impl CaptureConfig {
    /// Create config for a specific device
    pub fn for_device(path: impl AsRef<Path>) -> Self {
        Self {
            device_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Set format
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_planar_intermediate(mut self, enabled: bool) -> Self {
        self.planar_intermediate = enabled;
        self
    }
}

/// Ownership of the capture buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    /// Process owns the buffer
    Idle,
    /// Buffer handed to the driver, stream not yet running
    Queued,
    /// Driver owns the buffer and is filling it
    Streaming,
    /// A filled buffer is waiting to be dequeued
    Ready,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureMeta {
    pub bytes_used: usize,
    pub sequence: u64,
}

/// Drives one mapped buffer through the capture cycle
pub struct CaptureLoop<D: CaptureDevice> {
    buffer: MappedFrameBuffer<D::Memory>,
    device: D,
    state: CaptureState,
    streaming: bool,
    timeout: Duration,
}

impl<D: CaptureDevice> CaptureLoop<D> {
    pub fn new(device: D, buffer: MappedFrameBuffer<D::Memory>, timeout: Duration) -> Self {
        Self {
            buffer,
            device,
            state: CaptureState::Idle,
            streaming: false,
            timeout,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn buffer(&self) -> &MappedFrameBuffer<D::Memory> {
        &self.buffer
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Run one capture cycle, replacing the contents of `dst` with the frame.
    ///
    /// A [`CaptureError::Timeout`] leaves the buffer with the driver; the
    /// next call resumes at the readiness wait instead of re-queuing.
    pub fn next_into(&mut self, dst: &mut Vec<u8>) -> Result<CaptureMeta> {
        if self.state == CaptureState::Idle {
            self.enqueue()?;
        }
        if self.state == CaptureState::Queued {
            self.start_streaming()?;
        }
        if self.state == CaptureState::Streaming {
            self.wait_ready()?;
        }
        self.dequeue_into(dst)
    }

    fn enqueue(&mut self) -> Result<()> {
        self.device
            .queue_buffer(self.buffer.index())
            .map_err(|e| CaptureError::device("VIDIOC_QBUF", e))?;
        self.state = CaptureState::Queued;
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        if !self.streaming {
            self.device
                .stream_on()
                .map_err(|e| CaptureError::device("VIDIOC_STREAMON", e))?;
            self.streaming = true;
            info!("Capture stream started");
        }
        self.state = CaptureState::Streaming;
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<()> {
        match self.device.wait_ready(self.timeout) {
            Ok(true) => {
                self.state = CaptureState::Ready;
                Ok(())
            }
            Ok(false) => {
                warn!("Capture timeout - no frame within {:?}", self.timeout);
                Err(CaptureError::Timeout(self.timeout))
            }
            Err(e) => Err(CaptureError::device("poll", e)),
        }
    }

    fn dequeue_into(&mut self, dst: &mut Vec<u8>) -> Result<CaptureMeta> {
        let dequeued = self
            .device
            .dequeue_buffer()
            .map_err(|e| CaptureError::device("VIDIOC_DQBUF", e))?;

        if dequeued.corrupted {
            // the buffer is back with us; the next cycle re-queues it
            self.state = CaptureState::Idle;
            warn!(
                "Driver flagged frame #{} as corrupt, dropping it",
                dequeued.sequence
            );
            return Err(CaptureError::CorruptFrame {
                sequence: dequeued.sequence as u64,
            });
        }

        dst.clear();
        self.buffer.copy_into(dequeued.bytes_used, dst);
        self.state = CaptureState::Idle;

        debug!(
            "Dequeued frame #{}: {} bytes",
            dequeued.sequence, dequeued.bytes_used
        );
        Ok(CaptureMeta {
            bytes_used: dst.len(),
            sequence: dequeued.sequence as u64,
        })
    }

    /// Stop streaming and return the buffer to the process
    pub fn stop(&mut self) -> Result<()> {
        if self.streaming {
            self.device
                .stream_off()
                .map_err(|e| CaptureError::device("VIDIOC_STREAMOFF", e))?;
            self.streaming = false;
            info!("Capture stream stopped");
        }
        self.state = CaptureState::Idle;
        Ok(())
    }
}

impl<D: CaptureDevice> Drop for CaptureLoop<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("Failed to stop capture stream: {}", e);
        }
    }
}
