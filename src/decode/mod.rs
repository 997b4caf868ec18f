pub mod backend;
pub mod codec;
pub mod demuxer;
pub mod track;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::MediaBackend;
pub use codec::{CodecError, InputSlot, OutputEvent, OutputFormat, OutputSlot, VideoDecoder};
pub use demuxer::{select_first_video_track, DemuxError, Demuxer, SampleRead};
pub use track::{CodecConfig, MediaType, PixelFormat, TrackDescriptor};
