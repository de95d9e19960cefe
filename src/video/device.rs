//! V4L2 device handle and the operation-level capture device seam

use std::ffi::CStr;
use std::fs::File;
use std::io;
use std::mem;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::ioctl::ioctl_num_type;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use serde::Serialize;
use tracing::debug;
use v4l::buffer::Type as BufferType;
use v4l::capability::Flags;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_fmtdesc, v4l2_format, v4l2_pix_format,
    v4l2_requestbuffers,
};
use v4l::memory::Memory;
use v4l::{Capabilities, FourCC};

use super::format::{FormatDescriptor, NegotiatedFormat, Resolution};
use crate::error::{CaptureError, Result};

/// ioctl request number, typed the way the platform libc declares it
pub type RequestCode = ioctl_num_type;

/// VIDIOC_* request codes, derived from the UAPI struct sizes
pub mod request {
    use super::*;

    pub const QUERYCAP: RequestCode =
        nix::request_code_read!(b'V', 0, mem::size_of::<v4l2_capability>());
    pub const ENUM_FMT: RequestCode =
        nix::request_code_readwrite!(b'V', 2, mem::size_of::<v4l2_fmtdesc>());
    pub const S_FMT: RequestCode =
        nix::request_code_readwrite!(b'V', 5, mem::size_of::<v4l2_format>());
    pub const REQBUFS: RequestCode =
        nix::request_code_readwrite!(b'V', 8, mem::size_of::<v4l2_requestbuffers>());
    pub const QUERYBUF: RequestCode =
        nix::request_code_readwrite!(b'V', 9, mem::size_of::<v4l2_buffer>());
    pub const QBUF: RequestCode =
        nix::request_code_readwrite!(b'V', 15, mem::size_of::<v4l2_buffer>());
    pub const DQBUF: RequestCode =
        nix::request_code_readwrite!(b'V', 17, mem::size_of::<v4l2_buffer>());
    pub const STREAMON: RequestCode =
        nix::request_code_write!(b'V', 18, mem::size_of::<libc::c_int>());
    pub const STREAMOFF: RequestCode =
        nix::request_code_write!(b'V', 19, mem::size_of::<libc::c_int>());
}

const V4L2_FIELD_NONE: u32 = 1;
const V4L2_FMT_FLAG_COMPRESSED: u32 = 0x0001;
const V4L2_FMT_FLAG_EMULATED: u32 = 0x0002;
const V4L2_BUF_FLAG_ERROR: u32 = 0x0040;

/// Longest single poll; PollTimeout takes milliseconds as u16
const MAX_POLL_SLICE: Duration = Duration::from_millis(u16::MAX as u64);

/// Run a system call, retrying while it is interrupted by a signal.
///
/// Any error other than `EINTR` is returned to the caller untouched.
pub fn retry_interrupted<T>(mut call: impl FnMut() -> nix::Result<T>) -> io::Result<T> {
    loop {
        match call() {
            Err(Errno::EINTR) => continue,
            result => return result.map_err(io::Error::from),
        }
    }
}

/// Wait for readiness until `timeout` elapses.
///
/// `poll_once` is called with the time still left, capped at
/// [`MAX_POLL_SLICE`], and returns the number of ready descriptors.
/// Interrupted polls resume with the remaining time; longer waits are
/// split into consecutive slices.
pub fn wait_with_deadline(
    timeout: Duration,
    mut poll_once: impl FnMut(Duration) -> nix::Result<libc::c_int>,
) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let slice = remaining.min(MAX_POLL_SLICE);
        match poll_once(slice) {
            Ok(0) if slice < remaining => continue,
            Ok(ready) => return Ok(ready > 0),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Device capabilities reported by VIDIOC_QUERYCAP
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: String,
    /// Raw capability bits
    pub capabilities: u32,
    pub video_capture: bool,
    pub video_capture_mplane: bool,
    pub streaming: bool,
    pub read_write: bool,
}

/// Kernel-assigned size and mapping offset of a requested buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlot {
    pub index: u32,
    pub length: usize,
    pub offset: u64,
}

/// Result of VIDIOC_DQBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: usize,
    pub sequence: u32,
    /// Driver flagged the frame data as corrupt
    pub corrupted: bool,
}

/// Memory shared between the driver and the process
pub trait FrameMemory {
    /// Mapped length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the first `len` bytes of the region to `dst`
    fn copy_into(&self, len: usize, dst: &mut Vec<u8>);
}

/// Operation-level view of a single-planar capture device.
///
/// [`DeviceHandle`] implements this with V4L2 ioctls. Every method maps to
/// one device request; none of them carry pipeline policy.
pub trait CaptureDevice {
    type Memory: FrameMemory;

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities>;

    /// Format at `index`, or `None` once the device has no more formats
    fn enum_format(&self, index: u32) -> io::Result<Option<FormatDescriptor>>;

    /// Request a geometry and encoding; returns what the driver accepted
    fn set_format(&mut self, resolution: Resolution, fourcc: FourCC)
        -> io::Result<NegotiatedFormat>;

    /// Request `count` MMAP buffers; returns how many the driver granted
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&self, index: u32) -> io::Result<BufferSlot>;

    fn map_buffer(&self, slot: &BufferSlot) -> io::Result<Self::Memory>;

    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    /// Block until a frame is ready. `Ok(false)` means the timeout elapsed
    fn wait_ready(&self, timeout: Duration) -> io::Result<bool>;

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;
}

/// An open capture device node
pub struct DeviceHandle {
    path: PathBuf,
    file: File,
}

impl DeviceHandle {
    /// Open a video device by path (read/write, blocking)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening video device: {:?}", path);

        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CaptureError::device("open", e))?;

        Ok(Self { path, file })
    }

    /// Wrap an already-open device descriptor
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue a control request, retrying while interrupted by a signal.
    ///
    /// # Safety
    ///
    /// `arg` must be the UAPI struct that `request` expects.
    pub unsafe fn control_request<T>(&self, request: RequestCode, arg: &mut T) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let argp = arg as *mut T as *mut libc::c_void;
        retry_interrupted(|| Errno::result(libc::ioctl(fd, request as _, argp)).map(drop))
    }

    fn buffer_descriptor(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = BufferType::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn stream_request(&self, request: RequestCode) -> io::Result<()> {
        let mut typ = BufferType::VideoCapture as libc::c_int;
        // SAFETY: STREAMON/STREAMOFF take a pointer to the buffer type.
        unsafe { self.control_request(request, &mut typ) }
    }
}

impl CaptureDevice for DeviceHandle {
    type Memory = MmapRegion;

    fn query_capabilities(&self) -> io::Result<DeviceCapabilities> {
        // SAFETY: zeroed POD struct, matched to QUERYCAP.
        let mut raw: v4l2_capability = unsafe { mem::zeroed() };
        unsafe { self.control_request(request::QUERYCAP, &mut raw)? };

        let version = raw.version;
        let caps = Capabilities::from(raw);
        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            version: format!(
                "{}.{}.{}",
                (version >> 16) & 0xff,
                (version >> 8) & 0xff,
                version & 0xff
            ),
            capabilities: caps.capabilities.bits(),
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            video_capture_mplane: caps.capabilities.contains(Flags::VIDEO_CAPTURE_MPLANE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
            read_write: caps.capabilities.contains(Flags::READ_WRITE),
        })
    }

    fn enum_format(&self, index: u32) -> io::Result<Option<FormatDescriptor>> {
        // SAFETY: zeroed POD struct, matched to ENUM_FMT.
        let mut desc: v4l2_fmtdesc = unsafe { mem::zeroed() };
        desc.index = index;
        desc.type_ = BufferType::VideoCapture as u32;

        match unsafe { self.control_request(request::ENUM_FMT, &mut desc) } {
            Ok(()) => {}
            // EINVAL past the last index is the end-of-list signal
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => return Ok(None),
            Err(e) => return Err(e),
        }

        let description = CStr::from_bytes_until_nul(&desc.description)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&desc.description).into_owned());

        Ok(Some(FormatDescriptor {
            index,
            fourcc: FourCC::new(&desc.pixelformat.to_le_bytes()),
            description,
            compressed: desc.flags & V4L2_FMT_FLAG_COMPRESSED != 0,
            emulated: desc.flags & V4L2_FMT_FLAG_EMULATED != 0,
        }))
    }

    fn set_format(
        &mut self,
        resolution: Resolution,
        fourcc: FourCC,
    ) -> io::Result<NegotiatedFormat> {
        // SAFETY: zeroed POD structs, matched to S_FMT.
        let mut pix: v4l2_pix_format = unsafe { mem::zeroed() };
        pix.width = resolution.width;
        pix.height = resolution.height;
        pix.pixelformat = u32::from_le_bytes(fourcc.repr);
        pix.field = V4L2_FIELD_NONE;

        let mut fmt: v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = BufferType::VideoCapture as u32;
        fmt.fmt.pix = pix;

        unsafe { self.control_request(request::S_FMT, &mut fmt)? };

        // SAFETY: the driver filled the single-planar member for a capture queue.
        let actual = unsafe { fmt.fmt.pix };
        Ok(NegotiatedFormat {
            resolution: Resolution::new(actual.width, actual.height),
            fourcc: FourCC::new(&actual.pixelformat.to_le_bytes()),
            field: actual.field,
            stride: actual.bytesperline,
            size_image: actual.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: zeroed POD struct, matched to REQBUFS.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = BufferType::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        unsafe { self.control_request(request::REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferSlot> {
        let mut buf = Self::buffer_descriptor(index);
        unsafe { self.control_request(request::QUERYBUF, &mut buf)? };

        Ok(BufferSlot {
            index,
            length: buf.length as usize,
            // SAFETY: MMAP buffers report their mapping cookie in `m.offset`.
            offset: unsafe { buf.m.offset } as u64,
        })
    }

    fn map_buffer(&self, slot: &BufferSlot) -> io::Result<MmapRegion> {
        let length = NonZeroUsize::new(slot.length).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "zero-length capture buffer")
        })?;

        // SAFETY: a fresh shared mapping of the device at a driver-issued
        // offset; the region is owned by the returned MmapRegion.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.file.as_fd(),
                slot.offset as libc::off_t,
            )?
        };

        Ok(MmapRegion {
            ptr,
            len: slot.length,
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer_descriptor(index);
        unsafe { self.control_request(request::QBUF, &mut buf) }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_request(request::STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_request(request::STREAMOFF)
    }

    fn wait_ready(&self, timeout: Duration) -> io::Result<bool> {
        wait_with_deadline(timeout, |slice| {
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            // slice never exceeds MAX_POLL_SLICE
            poll(&mut fds, PollTimeout::from(slice.as_millis() as u16))
        })
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut buf = Self::buffer_descriptor(0);
        unsafe { self.control_request(request::DQBUF, &mut buf)? };

        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
            sequence: buf.sequence,
            corrupted: buf.flags & V4L2_BUF_FLAG_ERROR != 0,
        })
    }
}

/// A shared mapping of one kernel capture buffer, unmapped on drop
pub struct MmapRegion {
    ptr: NonNull<libc::c_void>,
    len: usize,
}

impl MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self. The capture
        // loop only reads it while the process owns the buffer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl FrameMemory for MmapRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_into(&self, len: usize, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.as_slice()[..len.min(self.len)]);
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by map_buffer with this length.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            debug!("Failed to unmap capture buffer: {}", e);
        }
    }
}
