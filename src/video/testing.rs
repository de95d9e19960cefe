//! Scripted capture device for unit tests

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use v4l::FourCC;

use super::device::{
    BufferSlot, CaptureDevice, DequeuedBuffer, DeviceCapabilities, FrameMemory,
};
use super::format::{FormatDescriptor, NegotiatedFormat, PixelFormat, Resolution};

/// Device interactions, in call order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Queue,
    StreamOn,
    Wait { ready: bool },
    Dequeue,
    /// Bytes copied out of the mapped buffer
    Read,
    StreamOff,
}

#[derive(Default)]
struct Shared {
    events: RefCell<Vec<Event>>,
    memory: RefCell<Vec<u8>>,
}

impl Shared {
    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

/// Mapped memory backed by a shared Vec
pub struct FakeMemory {
    shared: Rc<Shared>,
}

impl FrameMemory for FakeMemory {
    fn len(&self) -> usize {
        self.shared.memory.borrow().len()
    }

    fn copy_into(&self, len: usize, dst: &mut Vec<u8>) {
        self.shared.record(Event::Read);
        let memory = self.shared.memory.borrow();
        dst.extend_from_slice(&memory[..len.min(memory.len())]);
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// A well-behaved single-planar capture device with knobs for failure cases
pub struct FakeDevice {
    pub capabilities: DeviceCapabilities,
    pub formats: Vec<FormatDescriptor>,
    /// Geometry the driver forces regardless of the request
    pub substitute: Option<(Resolution, FourCC)>,
    /// Bytes per line reported; 0 means tightly packed
    pub stride: u32,
    /// Buffer length reported by QUERYBUF; defaults to the image size
    pub buffer_len: Option<usize>,
    /// Buffers granted by REQBUFS
    pub granted: u32,
    /// Frame the "sensor" writes on each dequeue
    pub frame: Vec<u8>,
    /// Readiness of the n-th wait; waits past the end are ready
    pub readiness: Vec<bool>,
    /// Error flag of the n-th dequeue; dequeues past the end are clean
    pub corrupt: Vec<bool>,
    pub fail_map: bool,
    negotiated: Option<NegotiatedFormat>,
    queued: bool,
    streaming: bool,
    sequence: u32,
    shared: Rc<Shared>,
}

impl FakeDevice {
    /// A YUYV + MJPEG camera that accepts any geometry
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "fakecam".to_string(),
                card: "Fake Camera".to_string(),
                bus_info: "platform:fake".to_string(),
                version: "6.1.0".to_string(),
                capabilities: 0x0400_0001,
                video_capture: true,
                video_capture_mplane: false,
                streaming: true,
                read_write: false,
            },
            formats: vec![
                FormatDescriptor {
                    index: 0,
                    fourcc: FourCC::new(b"YUYV"),
                    description: "YUYV 4:2:2".to_string(),
                    compressed: false,
                    emulated: false,
                },
                FormatDescriptor {
                    index: 1,
                    fourcc: FourCC::new(b"MJPG"),
                    description: "Motion-JPEG".to_string(),
                    compressed: true,
                    emulated: false,
                },
            ],
            substitute: None,
            stride: 0,
            buffer_len: None,
            granted: 1,
            frame: Vec::new(),
            readiness: Vec::new(),
            corrupt: Vec::new(),
            fail_map: false,
            negotiated: None,
            queued: false,
            streaming: false,
            sequence: 0,
            shared: Rc::new(Shared::default()),
        }
    }

    /// Device that delivers flat mid-grey YUYV frames of `resolution`
    pub fn grey_yuyv(resolution: Resolution) -> Self {
        let mut device = Self::new();
        device.frame = vec![128u8; resolution.pixels() as usize * 2];
        device
    }

    /// Event log handle that stays readable after the device is moved
    pub fn event_log(&self) -> EventLog {
        EventLog {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn image_size(format: &NegotiatedFormat) -> usize {
        match PixelFormat::from_fourcc(format.fourcc) {
            Some(PixelFormat::Yuyv) => {
                format.stride as usize * format.resolution.height as usize
            }
            _ => format.size_image as usize,
        }
    }
}

/// Shared view of a [`FakeDevice`]'s event log
pub struct EventLog {
    shared: Rc<Shared>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.shared.events.borrow().clone()
    }
}

impl CaptureDevice for FakeDevice {
    type Memory = FakeMemory;

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities> {
        Ok(self.capabilities.clone())
    }

    fn enum_format(&self, index: u32) -> io::Result<Option<FormatDescriptor>> {
        Ok(self.formats.get(index as usize).cloned())
    }

    fn set_format(
        &mut self,
        resolution: Resolution,
        fourcc: FourCC,
    ) -> io::Result<NegotiatedFormat> {
        let (resolution, fourcc) = self.substitute.unwrap_or((resolution, fourcc));
        let packed = resolution.width * 2;
        let stride = if &fourcc.repr == b"YUYV" {
            self.stride.max(packed)
        } else {
            0
        };
        let size_image = if stride > 0 {
            stride * resolution.height
        } else {
            resolution.width * resolution.height
        };

        let format = NegotiatedFormat {
            resolution,
            fourcc,
            field: 1,
            stride,
            size_image,
        };
        self.negotiated = Some(format);
        Ok(format)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        if self.negotiated.is_none() {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.granted.min(count.max(1)))
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferSlot> {
        let format = self.negotiated.as_ref().ok_or_else(|| errno(libc::EINVAL))?;
        if index >= self.granted {
            return Err(errno(libc::EINVAL));
        }
        Ok(BufferSlot {
            index,
            length: self.buffer_len.unwrap_or_else(|| Self::image_size(format)),
            offset: 0,
        })
    }

    fn map_buffer(&self, slot: &BufferSlot) -> io::Result<FakeMemory> {
        if self.fail_map {
            return Err(errno(libc::ENOMEM));
        }
        *self.shared.memory.borrow_mut() = vec![0u8; slot.length];
        Ok(FakeMemory {
            shared: Rc::clone(&self.shared),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        if index != 0 || self.queued {
            return Err(errno(libc::EINVAL));
        }
        self.queued = true;
        self.shared.record(Event::Queue);
        Ok(())
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.streaming {
            return Err(errno(libc::EBUSY));
        }
        self.streaming = true;
        self.shared.record(Event::StreamOn);
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.streaming = false;
        self.queued = false;
        self.shared.record(Event::StreamOff);
        Ok(())
    }

    fn wait_ready(&self, _timeout: Duration) -> io::Result<bool> {
        if !self.streaming || !self.queued {
            return Err(errno(libc::EINVAL));
        }
        let ready = {
            let events = self.shared.events.borrow();
            let waits = events
                .iter()
                .filter(|e| matches!(e, Event::Wait { .. }))
                .count();
            self.readiness.get(waits).copied().unwrap_or(true)
        };
        self.shared.record(Event::Wait { ready });
        Ok(ready)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        if !self.streaming || !self.queued {
            return Err(errno(libc::EINVAL));
        }
        self.queued = false;

        let mut memory = self.shared.memory.borrow_mut();
        let written = self.frame.len().min(memory.len());
        memory[..written].copy_from_slice(&self.frame[..written]);
        drop(memory);

        self.shared.record(Event::Dequeue);
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(DequeuedBuffer {
            index: 0,
            bytes_used: written,
            sequence,
            corrupted: self.corrupt.get(sequence as usize).copied().unwrap_or(false),
        })
    }
}
