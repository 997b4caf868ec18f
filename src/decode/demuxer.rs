//! Demuxer capability: container parsing and per-track sample access.

use std::path::PathBuf;
use crate::core::time::Time;
use crate::decode::track::TrackDescriptor;

/// Error type for demuxing operations
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("Failed to open {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("Invalid track index: {0}")]
    InvalidTrack(usize),
    #[error("No track selected")]
    NoTrackSelected,
    #[error("Sample of {size} bytes does not fit in a {capacity} byte input buffer")]
    SampleTooLarge { size: usize, capacity: usize },
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Seek failed: {0}")]
    SeekFailed(String),
}

/// Result of reading the current sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRead {
    /// The sample was copied into the buffer; holds its size in bytes
    Data(usize),
    /// The selected track has no more samples
    EndOfStream,
}

/// An opened container with one selectable track.
///
/// The demuxer keeps a cursor on the selected track. `read_sample` copies the
/// sample under the cursor without moving it; `advance` moves to the next one.
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_descriptor(&self, index: usize) -> Result<TrackDescriptor, DemuxError>;

    fn select_track(&mut self, index: usize) -> Result<(), DemuxError>;

    /// Copy the current sample into `buffer`
    fn read_sample(&mut self, buffer: &mut [u8]) -> Result<SampleRead, DemuxError>;

    /// Move to the next sample. Returns false once past the last one.
    fn advance(&mut self) -> bool;

    /// Reposition at the sync sample closest to `timestamp` (nanoseconds)
    fn seek_to_sync(&mut self, timestamp: Time) -> Result<(), DemuxError>;
}

/// Find the first video track, select it and return its descriptor.
///
/// `Ok(None)` means the container has no video track.
pub fn select_first_video_track(
    demuxer: &mut dyn Demuxer,
) -> Result<Option<TrackDescriptor>, DemuxError> {
    for index in 0..demuxer.track_count() {
        let track = demuxer.track_descriptor(index)?;
        if track.is_video() {
            demuxer.select_track(index)?;
            return Ok(Some(track));
        }
    }
    Ok(None)
}
