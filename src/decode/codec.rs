//! Decoder capability: slot-based codec interface.
//!
//! Input goes through decoder-owned slots: dequeue one, fill it, queue it.
//! Output is rendered straight into the frame pool's surface; the decoder
//! reserves a pool slot per decoded frame and publishes it on
//! `release_output(slot, true)`. When every pool slot is outstanding the
//! decoder cannot reserve one and `dequeue_output` reports `TryAgain`.

use std::fmt;
use std::time::Duration;
use crate::core::time::Time;
use crate::decode::track::TrackDescriptor;
use crate::pool::PoolSurface;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unsupported codec: {0}")]
    Unsupported(String),
    #[error("Configuration failed: {0}")]
    Configure(String),
    #[error("Decoder is not configured")]
    NotConfigured,
    #[error("Start failed: {0}")]
    Start(String),
    #[error("Decoder is not started")]
    NotStarted,
    #[error("Invalid slot: {0}")]
    InvalidSlot(usize),
    #[error("Input of {size} bytes exceeds slot capacity {capacity}")]
    InputOverflow { size: usize, capacity: usize },
    #[error("Codec backend error: {0}")]
    Backend(String),
}

/// Handle to a decoder-owned input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlot(pub usize);

/// Handle to a decoded frame reserved in the pool surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSlot(pub usize);

/// Output format reported by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
    pub description: String,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.description)
    }
}

/// Result of polling the decoder's output side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A decoded frame is ready in the given slot
    Frame(OutputSlot),
    /// The stream's output format changed
    FormatChanged(OutputFormat),
    /// Nothing available within the wait
    TryAgain,
}

/// A configured codec instance.
///
/// All methods are called from a single thread (the decode pump) once the
/// decoder is started. Dropping a decoder releases all of its resources.
pub trait VideoDecoder: Send {
    /// Bind the decoder to a track and an output surface
    fn configure(&mut self, track: &TrackDescriptor, surface: PoolSurface) -> Result<(), CodecError>;

    fn start(&mut self) -> Result<(), CodecError>;

    /// Stop decoding and return every outstanding slot
    fn stop(&mut self);

    /// Wait up to `timeout` for a free input slot
    fn dequeue_input(&mut self, timeout: Duration) -> Option<InputSlot>;

    /// Writable storage of a dequeued input slot
    fn input_buffer(&mut self, slot: InputSlot) -> Result<&mut [u8], CodecError>;

    /// Submit `size` bytes of a filled input slot
    fn queue_input(&mut self, slot: InputSlot, size: usize, pts: Time) -> Result<(), CodecError>;

    /// Return a dequeued input slot without submitting anything
    fn cancel_input(&mut self, slot: InputSlot);

    /// Wait up to `timeout` for decoded output
    fn dequeue_output(&mut self, timeout: Duration) -> OutputEvent;

    /// Hand a decoded frame to the surface (`render`) or discard it
    fn release_output(&mut self, slot: OutputSlot, render: bool) -> Result<(), CodecError>;

    /// Drop all pending input and output; every input slot becomes free
    fn flush(&mut self) -> Result<(), CodecError>;
}
