//! Kernel buffer allocation and mapping

use tracing::debug;

use super::device::{BufferSlot, CaptureDevice, FrameMemory};
use super::format::{NegotiatedFormat, PixelFormat};
use crate::error::{CaptureError, Result};

/// Buffers requested per session; the capture loop cycles a single slot
pub const CAPTURE_BUFFER_COUNT: u32 = 1;

/// Index of the slot the capture loop uses
pub const CAPTURE_BUFFER_INDEX: u32 = 0;

/// A kernel capture buffer mapped into the process
pub struct MappedFrameBuffer<M> {
    slot: BufferSlot,
    memory: M,
}

impl<M: FrameMemory> MappedFrameBuffer<M> {
    pub fn index(&self) -> u32 {
        self.slot.index
    }

    pub fn len(&self) -> usize {
        self.slot.length
    }

    pub fn is_empty(&self) -> bool {
        self.slot.length == 0
    }

    pub fn offset(&self) -> u64 {
        self.slot.offset
    }

    /// Copy `bytes_used` bytes out of the mapping into `dst`
    pub(crate) fn copy_into(&self, bytes_used: usize, dst: &mut Vec<u8>) {
        self.memory.copy_into(bytes_used.min(self.slot.length), dst);
    }
}

/// Requests, inspects and maps capture buffers
pub struct BufferManager<'a, D> {
    device: &'a mut D,
}

impl<'a, D: CaptureDevice> BufferManager<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self { device }
    }

    /// Request `count` MMAP buffers; returns how many the driver granted
    pub fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let granted = self
            .device
            .request_buffers(count)
            .map_err(|e| CaptureError::device("VIDIOC_REQBUFS", e))?;

        if granted == 0 {
            return Err(CaptureError::device(
                "VIDIOC_REQBUFS",
                std::io::Error::new(
                    std::io::ErrorKind::OutOfMemory,
                    "driver returned zero capture buffers",
                ),
            ));
        }
        if granted != count {
            debug!("Requested {} buffers, driver granted {}", count, granted);
        }
        Ok(granted)
    }

    pub fn query_buffer(&self, index: u32) -> Result<BufferSlot> {
        self.device
            .query_buffer(index)
            .map_err(|e| CaptureError::device("VIDIOC_QUERYBUF", e))
    }

    pub fn map_buffer(&self, slot: BufferSlot) -> Result<MappedFrameBuffer<D::Memory>> {
        let memory = self
            .device
            .map_buffer(&slot)
            .map_err(|source| CaptureError::Resource {
                length: slot.length,
                offset: slot.offset,
                source,
            })?;

        debug!(
            "Mapped buffer {}: {} bytes at offset {}",
            slot.index, slot.length, slot.offset
        );
        Ok(MappedFrameBuffer { slot, memory })
    }

    /// Request, query and map the single capture slot.
    ///
    /// The slot must be able to hold one frame of the negotiated format.
    pub fn allocate(
        &mut self,
        format: &NegotiatedFormat,
        pixel_format: PixelFormat,
    ) -> Result<MappedFrameBuffer<D::Memory>> {
        self.request_buffers(CAPTURE_BUFFER_COUNT)?;
        let slot = self.query_buffer(CAPTURE_BUFFER_INDEX)?;

        let expected = format.min_buffer_size(pixel_format);
        if slot.length < expected {
            return Err(CaptureError::BufferTooSmall {
                expected,
                actual: slot.length,
            });
        }

        self.map_buffer(slot)
    }
}
