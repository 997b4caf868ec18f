//! Software media backend over FFmpeg.
//!
//! All unsafe FFmpeg access is isolated in this module. Decoded frames are
//! converted with swscale straight into the pool slot reserved for them.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::thread;
use std::time::Duration;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, packet::Packet};
use ffmpeg::software::scaling;
use ffmpeg::util::frame;
use ffmpeg::{format, media};
use tracing::{debug, warn};
use crate::core::time::{self, Time};
use crate::decode::backend::MediaBackend;
use crate::decode::codec::{CodecError, InputSlot, OutputEvent, OutputFormat, OutputSlot, VideoDecoder};
use crate::decode::demuxer::{DemuxError, Demuxer, SampleRead};
use crate::decode::track::{CodecConfig, MediaType, PixelFormat, TrackDescriptor};
use crate::pool::{PoolSurface, SurfaceBuffer};
use crate::source::MediaSource;

const INPUT_SLOTS: usize = 4;
const MIN_INPUT_CAPACITY: usize = 1 << 20;

/// Codec parameters of a stream, carried in [`CodecConfig`]
struct StreamParameters(codec::Parameters);

// Always an owned copy without a link to the input context, and only read
// (copied into a codec context) after creation
unsafe impl Sync for StreamParameters {}

fn target_pixel(format: PixelFormat) -> format::Pixel {
    match format {
        PixelFormat::Rgba8 => format::Pixel::RGBA,
        PixelFormat::Yuv420 => format::Pixel::YUV420P,
    }
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

/// Backend creating FFmpeg demuxers and software decoders
#[derive(Debug)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self, ffmpeg::Error> {
        ffmpeg::init()?;
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DemuxError> {
        Ok(Box::new(FfmpegDemuxer::open(source.path())?))
    }

    fn create_decoder(&self, track: &TrackDescriptor) -> Result<Box<dyn VideoDecoder>, CodecError> {
        let params = track
            .config
            .downcast_ref::<StreamParameters>()
            .ok_or_else(|| CodecError::Unsupported(format!("{} (no stream parameters)", track.mime)))?;
        if ffmpeg::decoder::find(params.0.id()).is_none() {
            return Err(CodecError::Unsupported(track.mime.clone()));
        }
        Ok(Box::new(FfmpegDecoder::new()))
    }
}

/// Demuxer over `libavformat`
pub struct FfmpegDemuxer {
    input: format::context::Input,
    tracks: Vec<TrackDescriptor>,
    selected: Option<usize>,
    current: Option<Packet>,
    exhausted: bool,
}

// The input context is only touched by the thread owning the demuxer
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        let input = format::input(&path).map_err(|err| DemuxError::Open {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let tracks = input.streams().map(|stream| describe(&stream)).collect::<Vec<_>>();
        debug!("Opened {:?}: {} tracks", path, tracks.len());

        Ok(Self {
            input,
            tracks,
            selected: None,
            current: None,
            exhausted: false,
        })
    }

    /// Read packets until one of the selected stream sits under the cursor
    fn load_current(&mut self) -> Result<(), DemuxError> {
        if self.current.is_some() || self.exhausted {
            return Ok(());
        }
        let index = self.selected.ok_or(DemuxError::NoTrackSelected)?;
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == index => {
                    self.current = Some(packet);
                    return Ok(());
                }
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.exhausted = true;
                    return Ok(());
                }
                Err(err) => return Err(DemuxError::Read(err.to_string())),
            }
        }
    }
}

fn describe(stream: &format::stream::Stream) -> TrackDescriptor {
    let params = stream.parameters();
    let (media_type, prefix) = match params.medium() {
        media::Type::Video => (MediaType::Video, "video"),
        media::Type::Audio => (MediaType::Audio, "audio"),
        media::Type::Subtitle => (MediaType::Subtitle, "text"),
        _ => (MediaType::Other, "application"),
    };
    let (width, height) = if media_type == MediaType::Video {
        // SAFETY: `params` owns a valid AVCodecParameters for its whole lifetime
        let (w, h) = unsafe {
            let raw = params.as_ptr();
            ((*raw).width, (*raw).height)
        };
        (u32::try_from(w).ok(), u32::try_from(h).ok())
    } else {
        (None, None)
    };

    TrackDescriptor {
        index: stream.index(),
        mime: format!("{}/{}", prefix, params.id().name()),
        media_type,
        width,
        height,
        config: CodecConfig::new(StreamParameters(params.clone())),
    }
}

impl Demuxer for FfmpegDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_descriptor(&self, index: usize) -> Result<TrackDescriptor, DemuxError> {
        self.tracks.get(index).cloned().ok_or(DemuxError::InvalidTrack(index))
    }

    fn select_track(&mut self, index: usize) -> Result<(), DemuxError> {
        if index >= self.tracks.len() {
            return Err(DemuxError::InvalidTrack(index));
        }
        self.selected = Some(index);
        self.current = None;
        Ok(())
    }

    fn read_sample(&mut self, buffer: &mut [u8]) -> Result<SampleRead, DemuxError> {
        self.load_current()?;
        let Some(packet) = self.current.as_ref() else {
            return Ok(SampleRead::EndOfStream);
        };
        let data = packet.data().unwrap_or_default();
        if data.len() > buffer.len() {
            return Err(DemuxError::SampleTooLarge {
                size: data.len(),
                capacity: buffer.len(),
            });
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(SampleRead::Data(data.len()))
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        match self.load_current() {
            Ok(()) => self.current.is_some(),
            Err(err) => {
                warn!("Failed to read next packet: {}", err);
                false
            }
        }
    }

    fn seek_to_sync(&mut self, timestamp: Time) -> Result<(), DemuxError> {
        // libavformat seeks in AV_TIME_BASE (microsecond) units
        let target = timestamp / time::constants::NANOS_PER_MICRO;
        self.input
            .seek(target, ..)
            .map_err(|err| DemuxError::SeekFailed(err.to_string()))?;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }
}

/// Software video decoder writing converted frames into pool slots
pub struct FfmpegDecoder {
    decoder: Option<ffmpeg::decoder::Video>,
    surface: Option<PoolSurface>,
    scaler: Option<(OutputFormat, format::Pixel, scaling::Context)>,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    /// Packet the codec refused with EAGAIN, resent before new input
    pending: Option<Packet>,
    /// Decoded frame waiting for a free pool slot
    held: Option<frame::Video>,
    last_format: Option<(u32, u32, format::Pixel)>,
    outputs: HashMap<usize, SurfaceBuffer>,
    next_output: usize,
    started: bool,
}

// Codec and scaler contexts are only used by the thread owning the decoder
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    fn new() -> Self {
        Self {
            decoder: None,
            surface: None,
            scaler: None,
            inputs: Vec::new(),
            free_inputs: VecDeque::new(),
            pending: None,
            held: None,
            last_format: None,
            outputs: HashMap::new(),
            next_output: 0,
            started: false,
        }
    }

    fn reset(&mut self) {
        self.pending = None;
        self.held = None;
        self.outputs.clear();
        self.free_inputs = (0..self.inputs.len()).collect();
    }

    /// Resend a refused packet. Returns false if the codec still refuses it.
    fn retry_pending(&mut self) -> bool {
        let (Some(decoder), Some(packet)) = (self.decoder.as_mut(), self.pending.as_ref()) else {
            return true;
        };
        match decoder.send_packet(packet) {
            Ok(()) => {
                self.pending = None;
                true
            }
            Err(err) if is_again(&err) => false,
            Err(err) => {
                warn!("Dropping packet rejected by decoder: {}", err);
                self.pending = None;
                true
            }
        }
    }

    /// Pull the next decoded frame into `held`
    fn receive(&mut self) -> bool {
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };
        let mut decoded = frame::Video::empty();
        match decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                self.held = Some(decoded);
                true
            }
            Err(err) if is_again(&err) => false,
            Err(ffmpeg::Error::Eof) => false,
            Err(err) => {
                warn!("Decoder error: {}", err);
                false
            }
        }
    }

    /// Convert `decoded` into `buffer`, recreating the scaler on geometry changes
    fn convert(&mut self, decoded: &frame::Video, buffer: &mut SurfaceBuffer) -> Result<(), CodecError> {
        let surface = self.surface.as_ref().ok_or(CodecError::NotConfigured)?;
        let format = surface.format();
        let (width, height) = (surface.width(), surface.height());
        let source = OutputFormat {
            width: decoded.width(),
            height: decoded.height(),
            description: format!("{:?}", decoded.format()),
        };

        let stale = match &self.scaler {
            Some((current, pixel, _)) => *current != source || *pixel != decoded.format(),
            None => true,
        };
        if stale {
            let context = scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                target_pixel(format),
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|err| CodecError::Backend(err.to_string()))?;
            self.scaler = Some((source, decoded.format(), context));
        }
        let Some((_, _, scaler)) = self.scaler.as_mut() else {
            return Err(CodecError::NotConfigured);
        };

        let mut converted = frame::Video::new(target_pixel(format), width, height);
        scaler
            .run(decoded, &mut converted)
            .map_err(|err| CodecError::Backend(err.to_string()))?;

        let bytes_per_pixel = match format {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Yuv420 => 1,
        };
        let mut pixels = buffer.pixels_mut();
        let mut offset = 0;
        for plane in 0..converted.planes() {
            let row = converted.plane_width(plane) as usize * bytes_per_pixel;
            let stride = converted.stride(plane);
            let data = converted.data(plane);
            for y in 0..converted.plane_height(plane) as usize {
                let src = &data[y * stride..y * stride + row];
                pixels[offset..offset + row].copy_from_slice(src);
                offset += row;
            }
        }
        Ok(())
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn configure(&mut self, track: &TrackDescriptor, surface: PoolSurface) -> Result<(), CodecError> {
        let params = track
            .config
            .downcast_ref::<StreamParameters>()
            .ok_or_else(|| CodecError::Configure("track carries no stream parameters".to_string()))?;
        let context = codec::context::Context::from_parameters(params.0.clone())
            .map_err(|err| CodecError::Configure(err.to_string()))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|err| CodecError::Configure(err.to_string()))?;

        let capacity = surface.frame_size().max(MIN_INPUT_CAPACITY);
        self.inputs = vec![vec![0u8; capacity]; INPUT_SLOTS];
        self.decoder = Some(decoder);
        self.surface = Some(surface);
        debug!("Configured {} decoder, {} input slots of {} bytes", track.mime, INPUT_SLOTS, capacity);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if self.decoder.is_none() || self.surface.is_none() {
            return Err(CodecError::NotConfigured);
        }
        self.reset();
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.reset();
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Option<InputSlot> {
        if !self.started {
            thread::sleep(timeout);
            return None;
        }
        if !self.retry_pending() {
            thread::sleep(timeout);
            return None;
        }
        self.free_inputs.pop_front().map(InputSlot)
    }

    fn input_buffer(&mut self, slot: InputSlot) -> Result<&mut [u8], CodecError> {
        self.inputs
            .get_mut(slot.0)
            .map(|buffer| buffer.as_mut_slice())
            .ok_or(CodecError::InvalidSlot(slot.0))
    }

    fn queue_input(&mut self, slot: InputSlot, size: usize, _pts: Time) -> Result<(), CodecError> {
        let buffer = self.inputs.get(slot.0).ok_or(CodecError::InvalidSlot(slot.0))?;
        if size > buffer.len() {
            return Err(CodecError::InputOverflow { size, capacity: buffer.len() });
        }
        // Only the payload crosses the slot: key flag and side data (e.g.
        // in-band extradata updates) are not carried over
        let packet = Packet::copy(&buffer[..size]);
        self.free_inputs.push_back(slot.0);

        let decoder = self.decoder.as_mut().ok_or(CodecError::NotStarted)?;
        match decoder.send_packet(&packet) {
            Ok(()) => Ok(()),
            Err(err) if is_again(&err) => {
                self.pending = Some(packet);
                Ok(())
            }
            Err(err) => Err(CodecError::Backend(err.to_string())),
        }
    }

    fn cancel_input(&mut self, slot: InputSlot) {
        if slot.0 < self.inputs.len() && !self.free_inputs.contains(&slot.0) {
            self.free_inputs.push_back(slot.0);
        }
    }

    fn dequeue_output(&mut self, timeout: Duration) -> OutputEvent {
        if !self.started {
            thread::sleep(timeout);
            return OutputEvent::TryAgain;
        }
        if self.held.is_none() && !self.receive() {
            thread::sleep(timeout);
            return OutputEvent::TryAgain;
        }
        let Some(decoded) = self.held.take() else {
            return OutputEvent::TryAgain;
        };

        let geometry = (decoded.width(), decoded.height(), decoded.format());
        if self.last_format != Some(geometry) {
            self.last_format = Some(geometry);
            let changed = OutputFormat {
                width: geometry.0,
                height: geometry.1,
                description: format!("{:?}", geometry.2),
            };
            self.held = Some(decoded);
            return OutputEvent::FormatChanged(changed);
        }

        let Some(mut buffer) = self.surface.as_ref().and_then(|s| s.dequeue_buffer(timeout)) else {
            // Every slot is outstanding: keep the frame until one frees up
            self.held = Some(decoded);
            return OutputEvent::TryAgain;
        };
        if let Err(err) = self.convert(&decoded, &mut buffer) {
            warn!("Dropping frame: {}", err);
            return OutputEvent::TryAgain;
        }

        let id = self.next_output;
        self.next_output = self.next_output.wrapping_add(1);
        self.outputs.insert(id, buffer);
        OutputEvent::Frame(OutputSlot(id))
    }

    fn release_output(&mut self, slot: OutputSlot, render: bool) -> Result<(), CodecError> {
        let buffer = self.outputs.remove(&slot.0).ok_or(CodecError::InvalidSlot(slot.0))?;
        if render {
            buffer.queue(time::ZERO);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        let decoder = self.decoder.as_mut().ok_or(CodecError::NotConfigured)?;
        decoder.flush();
        self.reset();
        Ok(())
    }
}
