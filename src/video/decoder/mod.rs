//! Decoding of compressed-at-source frames

pub mod mjpeg_turbo;

pub use mjpeg_turbo::MjpegDecoder;
