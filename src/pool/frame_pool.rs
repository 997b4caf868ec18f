//! Fixed-capacity frame pool bound to a display surface.
//!
//! The pool owns `capacity` pixel buffers, allocated once. A decoder writes
//! into them through a [`PoolSurface`]; the consumer takes the newest finished
//! one with [`FramePool::acquire_latest_unclaimed`]. Every slot is in exactly
//! one state:
//!
//! ```text
//! Free --dequeue--> Dequeued --queue--> Ready --acquire--> Claimed --drop--> Free
//!                      |                  |
//!                      +--drop (cancel)---+--superseded by a newer frame--> Free
//! ```
//!
//! `Dequeued`, `Ready` and `Claimed` slots are outstanding. Once all slots are
//! outstanding, `dequeue_buffer` grants nothing and the producer stalls until
//! the consumer acquires (dropping older ready frames) or releases a frame.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};
use crate::core::config::MIN_CAPACITY;
use crate::core::time::Time;
use crate::decode::track::PixelFormat;

/// Error type for pool creation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool capacity {0} is below the minimum of {MIN_CAPACITY}")]
    CapacityTooSmall(usize),
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Frame of {width}x{height} {format:?} is too large to allocate")]
    FrameTooLarge {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Dequeued,
    Ready { seq: u64, timestamp: Time },
    Claimed,
}

struct PoolState {
    slots: Vec<SlotState>,
    next_seq: u64,
    produced: u64,
    dropped: u64,
}

impl PoolState {
    fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| **s != SlotState::Free).count()
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| *s == SlotState::Free)
    }
}

struct PoolShared {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_size: usize,
    state: Mutex<PoolState>,
    slot_freed: Condvar,
    // One buffer per slot. The slot state machine grants exclusive access,
    // so these locks are never contended.
    pixels: Box<[Mutex<Vec<u8>>]>,
}

impl PoolShared {
    fn release(&self, index: usize) {
        let mut state = self.state.lock();
        state.slots[index] = SlotState::Free;
        drop(state);
        self.slot_freed.notify_one();
    }
}

/// Metadata of a produced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Production order, strictly increasing across the pool's lifetime
    pub seq: u64,
    /// Presentation timestamp given by the producer (nanoseconds)
    pub timestamp: Time,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames queued by the producer
    pub produced: u64,
    /// Ready frames superseded before anyone acquired them
    pub dropped: u64,
    /// Slots currently not free
    pub outstanding: usize,
}

/// Fixed-capacity pool of decoded-frame slots
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /// Create a pool of `capacity` slots for frames of the given geometry
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        if capacity < MIN_CAPACITY {
            return Err(PoolError::CapacityTooSmall(capacity));
        }
        if width == 0 || height == 0 {
            return Err(PoolError::InvalidDimensions { width, height });
        }
        let frame_size = format
            .frame_size(width, height)
            .filter(|size| size.checked_mul(capacity).is_some())
            .ok_or(PoolError::FrameTooLarge { width, height, format })?;

        let pixels = (0..capacity)
            .map(|_| Mutex::new(vec![0u8; frame_size]))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        debug!(
            "Created frame pool: {}x{} {:?}, {} slots of {} bytes",
            width, height, format, capacity, frame_size
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                width,
                height,
                format,
                frame_size,
                state: Mutex::new(PoolState {
                    slots: vec![SlotState::Free; capacity],
                    next_seq: 0,
                    produced: 0,
                    dropped: 0,
                }),
                slot_freed: Condvar::new(),
                pixels,
            }),
        })
    }

    /// The producer-side surface a decoder renders into
    pub fn surface(&self) -> PoolSurface {
        PoolSurface {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.shared.pixels.len()
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.shared.width
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.shared.height
    }

    /// Pixel layout of every slot
    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    /// Size in bytes of one slot's pixel buffer
    pub fn frame_size(&self) -> usize {
        self.shared.frame_size
    }

    /// Number of slots held by the producer, waiting, or held by the consumer
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding()
    }

    /// Snapshot of the produced/superseded counters
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            produced: state.produced,
            dropped: state.dropped,
            outstanding: state.outstanding(),
        }
    }

    /// Take the most recently produced frame nobody has claimed yet.
    ///
    /// Older unclaimed frames are returned to the free list. Returns `None`
    /// when no frame is ready.
    pub fn acquire_latest_unclaimed(&self) -> Option<Frame> {
        let mut state = self.shared.state.lock();

        let (index, seq, timestamp) = state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match *slot {
                SlotState::Ready { seq, timestamp } => Some((i, seq, timestamp)),
                _ => None,
            })
            .max_by_key(|(_, seq, _)| *seq)?;

        let mut superseded: u64 = 0;
        for slot in state.slots.iter_mut() {
            if matches!(slot, SlotState::Ready { .. }) {
                *slot = SlotState::Free;
                superseded += 1;
            }
        }
        // The chosen slot was counted above as well
        superseded -= 1;
        state.slots[index] = SlotState::Claimed;
        state.dropped += superseded;
        drop(state);

        if superseded > 0 {
            trace!("Dropped {} stale frame(s) in favour of #{}", superseded, seq);
            self.shared.slot_freed.notify_one();
        }

        Some(Frame {
            shared: Arc::clone(&self.shared),
            index,
            info: FrameInfo {
                seq,
                timestamp,
                width: self.shared.width,
                height: self.shared.height,
                format: self.shared.format,
            },
        })
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("format", &self.shared.format)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Producer side of the pool: the output target handed to a decoder
#[derive(Clone)]
pub struct PoolSurface {
    shared: Arc<PoolShared>,
}

impl PoolSurface {
    /// Reserve a free slot to write into, waiting at most `timeout`.
    ///
    /// Returns `None` if every slot stays outstanding for the whole wait.
    pub fn dequeue_buffer(&self, timeout: Duration) -> Option<SurfaceBuffer> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(index) = state.free_slot() {
                state.slots[index] = SlotState::Dequeued;
                return Some(SurfaceBuffer {
                    shared: Arc::clone(&self.shared),
                    index,
                    queued: false,
                });
            }
            if self.shared.slot_freed.wait_until(&mut state, deadline).timed_out() {
                // One last look: a release may have raced the timeout
                let index = state.free_slot()?;
                state.slots[index] = SlotState::Dequeued;
                return Some(SurfaceBuffer {
                    shared: Arc::clone(&self.shared),
                    index,
                    queued: false,
                });
            }
        }
    }

    /// Width the decoder must render at
    pub fn width(&self) -> u32 {
        self.shared.width
    }

    /// Height the decoder must render at
    pub fn height(&self) -> u32 {
        self.shared.height
    }

    /// Expected output pixel format
    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    /// Bytes one slot holds
    pub fn frame_size(&self) -> usize {
        self.shared.frame_size
    }
}

impl fmt::Debug for PoolSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSurface")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("format", &self.shared.format)
            .finish()
    }
}

/// A slot reserved by the producer.
///
/// Dropping it without [`queue`](Self::queue) hands the slot back unused.
pub struct SurfaceBuffer {
    shared: Arc<PoolShared>,
    index: usize,
    queued: bool,
}

impl SurfaceBuffer {
    /// Slot index in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Writable pixel storage of this slot
    pub fn pixels_mut(&mut self) -> MutexGuard<'_, Vec<u8>> {
        self.shared.pixels[self.index].lock()
    }

    /// Publish the slot as a finished frame. Returns its sequence number.
    pub fn queue(mut self, timestamp: Time) -> u64 {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.produced += 1;
        state.slots[self.index] = SlotState::Ready { seq, timestamp };
        self.queued = true;
        seq
    }
}

impl Drop for SurfaceBuffer {
    fn drop(&mut self) {
        if !self.queued {
            self.shared.release(self.index);
        }
    }
}

impl fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceBuffer")
            .field("index", &self.index)
            .field("queued", &self.queued)
            .finish()
    }
}

/// A decoded frame claimed by the consumer.
///
/// The slot returns to the pool when the frame is dropped.
pub struct Frame {
    shared: Arc<PoolShared>,
    index: usize,
    info: FrameInfo,
}

impl Frame {
    /// Metadata recorded when the frame was queued
    pub fn info(&self) -> FrameInfo {
        self.info
    }

    /// Monotonic sequence number, higher is newer
    pub fn seq(&self) -> u64 {
        self.info.seq
    }

    /// Presentation time in nanoseconds
    pub fn timestamp(&self) -> Time {
        self.info.timestamp
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.info.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Pixel layout of the payload
    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    /// Pool slot backing this frame
    pub fn slot(&self) -> usize {
        self.index
    }

    /// Pixel payload, laid out per [`format`](Self::format)
    pub fn pixels(&self) -> MutexGuard<'_, Vec<u8>> {
        self.shared.pixels[self.index].lock()
    }

    /// Hand the slot back to the pool
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.shared.release(self.index);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("slot", &self.index)
            .field("info", &self.info)
            .finish()
    }
}
