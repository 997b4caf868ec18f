//! Factory for the demuxer/decoder pair of one media stack.

use crate::decode::codec::{CodecError, VideoDecoder};
use crate::decode::demuxer::{DemuxError, Demuxer};
use crate::decode::track::TrackDescriptor;
use crate::source::MediaSource;

/// A media stack able to open containers and create matching decoders
pub trait MediaBackend {
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DemuxError>;

    /// Instantiate an unconfigured decoder for the track's codec
    fn create_decoder(&self, track: &TrackDescriptor) -> Result<Box<dyn VideoDecoder>, CodecError>;
}
