//! Scripted demuxer/decoder pair for exercising the pipeline without media.
//!
//! The decoder "decodes" a sample by copying its bytes to the start of a pool
//! slot, so a frame's first bytes tell which sample it came from.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use parking_lot::Mutex;
use crate::core::time::Time;
use crate::decode::backend::MediaBackend;
use crate::decode::codec::{CodecError, InputSlot, OutputEvent, OutputFormat, OutputSlot, VideoDecoder};
use crate::decode::demuxer::{DemuxError, Demuxer, SampleRead};
use crate::decode::track::{CodecConfig, MediaType, TrackDescriptor};
use crate::pool::{PoolSurface, SurfaceBuffer};
use crate::source::{MediaSource, SourceError, SourceResolver};

const INPUT_CAPACITY: usize = 64;

/// What the scripted collaborators did, in order
#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub submitted: Vec<Vec<u8>>,
    pub flushes: usize,
    pub seeks: usize,
    pub stalls: usize,
    pub events: Vec<&'static str>,
}

pub(crate) type SharedLog = Arc<Mutex<MockLog>>;

impl MockLog {
    pub fn shared() -> SharedLog {
        Arc::new(Mutex::new(MockLog::default()))
    }
}

pub(crate) fn video_track(index: usize, width: u32, height: u32) -> TrackDescriptor {
    TrackDescriptor {
        index,
        mime: "video/avc".to_string(),
        media_type: MediaType::Video,
        width: Some(width),
        height: Some(height),
        config: CodecConfig::none(),
    }
}

pub(crate) fn audio_track(index: usize) -> TrackDescriptor {
    TrackDescriptor {
        index,
        mime: "audio/mp4a-latm".to_string(),
        media_type: MediaType::Audio,
        width: None,
        height: None,
        config: CodecConfig::none(),
    }
}

pub(crate) fn samples(names: &[&str]) -> Vec<Vec<u8>> {
    names.iter().map(|name| name.as_bytes().to_vec()).collect()
}

pub(crate) struct ScriptedDemuxer {
    tracks: Vec<TrackDescriptor>,
    samples: Vec<Vec<u8>>,
    cursor: usize,
    selected: Option<usize>,
    log: SharedLog,
}

impl ScriptedDemuxer {
    pub fn new(tracks: Vec<TrackDescriptor>, samples: Vec<Vec<u8>>, log: SharedLog) -> Self {
        Self {
            tracks,
            samples,
            cursor: 0,
            selected: None,
            log,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }
}

impl Demuxer for ScriptedDemuxer {
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
        Ok(())
    }

    fn read_sample(&mut self, buffer: &mut [u8]) -> Result<SampleRead, DemuxError> {
        self.selected.ok_or(DemuxError::NoTrackSelected)?;
        let Some(sample) = self.samples.get(self.cursor) else {
            return Ok(SampleRead::EndOfStream);
        };
        if sample.len() > buffer.len() {
            return Err(DemuxError::SampleTooLarge {
                size: sample.len(),
                capacity: buffer.len(),
            });
        }
        buffer[..sample.len()].copy_from_slice(sample);
        Ok(SampleRead::Data(sample.len()))
    }

    fn advance(&mut self) -> bool {
        self.cursor += 1;
        self.cursor < self.samples.len()
    }

    fn seek_to_sync(&mut self, _timestamp: Time) -> Result<(), DemuxError> {
        self.cursor = 0;
        self.log.lock().seeks += 1;
        Ok(())
    }
}

impl Drop for ScriptedDemuxer {
    fn drop(&mut self) {
        self.log.lock().events.push("demuxer.close");
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DecoderScript {
    pub fail_configure: bool,
    pub fail_start: bool,
    /// Report a format change before the first frame
    pub announce_format: bool,
}

pub(crate) struct ScriptedDecoder {
    script: DecoderScript,
    log: SharedLog,
    surface: Option<PoolSurface>,
    started: bool,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    decoded: VecDeque<Vec<u8>>,
    outputs: HashMap<usize, SurfaceBuffer>,
    next_output: usize,
    announced: bool,
}

impl ScriptedDecoder {
    pub fn new(script: DecoderScript, log: SharedLog) -> Self {
        Self {
            script,
            log,
            surface: None,
            started: false,
            inputs: vec![vec![0u8; INPUT_CAPACITY]; 2],
            free_inputs: VecDeque::new(),
            decoded: VecDeque::new(),
            outputs: HashMap::new(),
            next_output: 0,
            announced: false,
        }
    }

    fn reset_slots(&mut self) {
        self.free_inputs = (0..self.inputs.len()).collect();
        self.decoded.clear();
        self.outputs.clear();
    }
}

impl VideoDecoder for ScriptedDecoder {
    fn configure(&mut self, track: &TrackDescriptor, surface: PoolSurface) -> Result<(), CodecError> {
        self.log.lock().events.push("decoder.configure");
        if self.script.fail_configure {
            return Err(CodecError::Configure(format!("scripted failure for {}", track.mime)));
        }
        self.surface = Some(surface);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if self.surface.is_none() {
            return Err(CodecError::NotConfigured);
        }
        if self.script.fail_start {
            return Err(CodecError::Start("scripted failure".to_string()));
        }
        self.log.lock().events.push("decoder.start");
        self.reset_slots();
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().events.push("decoder.stop");
        self.started = false;
        self.decoded.clear();
        self.outputs.clear();
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Option<InputSlot> {
        let slot = if self.started { self.free_inputs.pop_front() } else { None };
        if slot.is_none() {
            thread::sleep(timeout);
        }
        slot.map(InputSlot)
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
        let sample = buffer[..size].to_vec();
        self.log.lock().submitted.push(sample.clone());
        self.decoded.push_back(sample);
        self.free_inputs.push_back(slot.0);
        Ok(())
    }

    fn cancel_input(&mut self, slot: InputSlot) {
        if !self.free_inputs.contains(&slot.0) {
            self.free_inputs.push_back(slot.0);
        }
    }

    fn dequeue_output(&mut self, timeout: Duration) -> OutputEvent {
        if !self.started {
            thread::sleep(timeout);
            return OutputEvent::TryAgain;
        }
        let Some(surface) = self.surface.as_ref() else {
            return OutputEvent::TryAgain;
        };
        if self.script.announce_format && !self.announced {
            self.announced = true;
            return OutputEvent::FormatChanged(OutputFormat {
                width: surface.width(),
                height: surface.height(),
                description: "scripted".to_string(),
            });
        }
        if self.decoded.is_empty() {
            thread::sleep(timeout);
            return OutputEvent::TryAgain;
        }
        let Some(mut buffer) = surface.dequeue_buffer(timeout) else {
            self.log.lock().stalls += 1;
            return OutputEvent::TryAgain;
        };
        if let Some(sample) = self.decoded.pop_front() {
            let mut pixels = buffer.pixels_mut();
            let len = sample.len().min(pixels.len());
            pixels[..len].copy_from_slice(&sample[..len]);
        }
        let id = self.next_output;
        self.next_output += 1;
        self.outputs.insert(id, buffer);
        OutputEvent::Frame(OutputSlot(id))
    }

    fn release_output(&mut self, slot: OutputSlot, render: bool) -> Result<(), CodecError> {
        let buffer = self.outputs.remove(&slot.0).ok_or(CodecError::InvalidSlot(slot.0))?;
        if render {
            buffer.queue(0);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.log.lock().flushes += 1;
        self.reset_slots();
        Ok(())
    }
}

impl Drop for ScriptedDecoder {
    fn drop(&mut self) {
        self.log.lock().events.push("decoder.release");
    }
}

/// Backend handing out scripted collaborators
#[derive(Clone)]
pub(crate) struct ScriptedBackend {
    pub tracks: Vec<TrackDescriptor>,
    pub samples: Vec<Vec<u8>>,
    pub script: DecoderScript,
    pub fail_open: bool,
    pub log: SharedLog,
}

impl ScriptedBackend {
    pub fn new(tracks: Vec<TrackDescriptor>, samples: Vec<Vec<u8>>) -> Self {
        Self {
            tracks,
            samples,
            script: DecoderScript::default(),
            fail_open: false,
            log: MockLog::shared(),
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.log.lock().events.clone()
    }
}

impl MediaBackend for ScriptedBackend {
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DemuxError> {
        if self.fail_open {
            return Err(DemuxError::Open {
                path: source.path().to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(Box::new(ScriptedDemuxer::new(
            self.tracks.clone(),
            self.samples.clone(),
            self.log.clone(),
        )))
    }

    fn create_decoder(&self, _track: &TrackDescriptor) -> Result<Box<dyn VideoDecoder>, CodecError> {
        Ok(Box::new(ScriptedDecoder::new(self.script.clone(), self.log.clone())))
    }
}

/// Resolver returning a fixed source, or failing when there is none
pub(crate) struct StaticResolver(pub Option<MediaSource>);

impl StaticResolver {
    pub fn found() -> Self {
        Self(Some(MediaSource::new("/media/loop.mp4", 4096)))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl SourceResolver for StaticResolver {
    fn resolve(&self) -> Result<MediaSource, SourceError> {
        self.0.clone().ok_or_else(|| SourceError::NoMatch {
            directory: PathBuf::from("/media"),
            extension: "mp4".to_string(),
        })
    }
}
