//! Looping video decoder lifecycle: init, acquire, terminate.
//! The pump runs on a dedicated thread; consumers take frames from any other thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use crate::core::config::{ConfigError, PlayerConfig};
use crate::decode::backend::MediaBackend;
use crate::decode::codec::CodecError;
use crate::decode::demuxer::{select_first_video_track, DemuxError};
use crate::playback::pump::{DecodePump, PumpCounters, PumpParts, PumpStats};
use crate::playback::state::{RunState, RunStateCell};
use crate::playback::sync::{FrameSignal, Wait};
use crate::pool::{Frame, FramePool, PoolError, PoolStats};
use crate::source::{SourceError, SourceResolver};

/// Error type for pipeline initialization
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Pipeline is already running")]
    AlreadyInitialized,
    #[error("Source not found: {0}")]
    SourceNotFound(#[from] SourceError),
    #[error("Failed to open container: {0}")]
    DemuxOpen(#[source] DemuxError),
    #[error("Container has no video track")]
    NoVideoTrack,
    #[error("Video track {index} has no usable dimensions")]
    MalformedTrack { index: usize },
    #[error("Failed to create frame pool: {0}")]
    PoolCreate(#[from] PoolError),
    #[error("Failed to configure decoder: {0}")]
    DecoderConfig(#[source] CodecError),
    #[error("Failed to start decoder: {0}")]
    DecoderStart(#[source] CodecError),
    #[error("Failed to spawn decode pump: {0}")]
    PumpSpawn(#[source] std::io::Error),
}

/// Consumer-side handle for taking frames from another thread
#[derive(Clone)]
pub struct FrameConsumer {
    signal: Arc<FrameSignal>,
    pool: FramePool,
}

impl FrameConsumer {
    pub(crate) fn new(signal: Arc<FrameSignal>, pool: FramePool) -> Self {
        Self { signal, pool }
    }

    /// Block until a new frame is available and take the latest one.
    ///
    /// Returns `None` once the pipeline is terminated.
    pub fn acquire_latest_frame(&self) -> Option<Frame> {
        self.signal.take_latest(&self.pool, Wait::Forever)
    }

    /// Like [`acquire_latest_frame`](Self::acquire_latest_frame), giving up after `timeout`
    pub fn acquire_latest_frame_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.signal.take_latest(&self.pool, Wait::Until(Instant::now() + timeout))
    }

    /// Take the latest frame only if one is already available
    pub fn try_acquire_latest_frame(&self) -> Option<Frame> {
        self.signal.take_latest(&self.pool, Wait::Never)
    }

    /// Frame size of the pool this handle reads from
    pub fn dimensions(&self) -> (u32, u32) {
        (self.pool.width(), self.pool.height())
    }
}

/// Decodes the first video track of a source in an endless loop
pub struct LoopDecoder {
    config: PlayerConfig,
    run_state: Arc<RunStateCell>,
    signal: Arc<FrameSignal>,
    counters: Arc<PumpCounters>,
    pool: Option<FramePool>,
    pump: Option<JoinHandle<PumpParts>>,
}

impl LoopDecoder {
    /// Create a stopped pipeline; nothing is opened until [`init`](Self::init)
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            run_state: Arc::new(RunStateCell::new()),
            signal: Arc::new(FrameSignal::new()),
            counters: Arc::new(PumpCounters::default()),
            pool: None,
            pump: None,
        }
    }

    /// Open the source, set up pool and decoder, and start the pump thread.
    ///
    /// On failure everything created so far is released (decoder, then pool,
    /// then demuxer) and no thread is started.
    pub fn init(
        &mut self,
        resolver: &dyn SourceResolver,
        backend: &dyn MediaBackend,
    ) -> Result<(), InitError> {
        if self.pump.is_some() || self.run_state.load() != RunState::Stopped {
            return Err(InitError::AlreadyInitialized);
        }
        self.config.validate()?;

        let source = resolver.resolve()?;
        let mut demuxer = backend.open_demuxer(&source).map_err(InitError::DemuxOpen)?;
        let track = select_first_video_track(demuxer.as_mut())
            .map_err(InitError::DemuxOpen)?
            .ok_or(InitError::NoVideoTrack)?;
        let (width, height) = track
            .dimensions()
            .ok_or(InitError::MalformedTrack { index: track.index })?;

        // Locals drop in reverse order on early return: decoder, pool, demuxer
        let pool = FramePool::new(width, height, self.config.pixel_format, self.config.capacity)?;
        let mut decoder = backend.create_decoder(&track).map_err(InitError::DecoderConfig)?;
        decoder
            .configure(&track, pool.surface())
            .map_err(InitError::DecoderConfig)?;
        decoder.start().map_err(InitError::DecoderStart)?;

        let signal = Arc::new(FrameSignal::new());
        let counters = Arc::new(PumpCounters::default());
        self.run_state
            .transition(RunState::Stopped, RunState::Running)
            .map_err(|_| InitError::AlreadyInitialized)?;

        let pump = DecodePump::new(
            decoder,
            demuxer,
            Arc::clone(&self.run_state),
            Arc::clone(&signal),
            Arc::clone(&counters),
            self.config.dequeue_timeout,
        );
        let spawned = thread::Builder::new()
            .name("decode-pump".to_string())
            .spawn(move || pump.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                let _ = self.run_state.transition(RunState::Running, RunState::Terminating);
                let _ = self.run_state.transition(RunState::Terminating, RunState::Stopped);
                return Err(InitError::PumpSpawn(err));
            }
        };

        info!(
            "Video pipeline running: {:?} track {} ({}) {}x{}, {} slots",
            source.path(),
            track.index,
            track.mime,
            width,
            height,
            pool.capacity()
        );
        self.signal = signal;
        self.counters = counters;
        self.pool = Some(pool);
        self.pump = Some(handle);
        Ok(())
    }

    /// Block until a new frame is available and take the latest one.
    ///
    /// Returns `None` when the pipeline was never initialized or has been terminated.
    pub fn acquire_latest_frame(&self) -> Option<Frame> {
        self.consumer()?.acquire_latest_frame()
    }

    /// Timed variant of [`acquire_latest_frame`](Self::acquire_latest_frame)
    pub fn acquire_latest_frame_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.consumer()?.acquire_latest_frame_timeout(timeout)
    }

    /// Non-blocking variant
    pub fn try_acquire_latest_frame(&self) -> Option<Frame> {
        self.consumer()?.try_acquire_latest_frame()
    }

    /// Handle for acquiring frames from another thread, if running
    pub fn consumer(&self) -> Option<FrameConsumer> {
        let pool = self.pool.as_ref()?;
        Some(FrameConsumer::new(Arc::clone(&self.signal), pool.clone()))
    }

    /// Stop the pump and release decoder, pool and demuxer, in that order.
    ///
    /// Safe to call at any time; a second call does nothing.
    pub fn terminate(&mut self) {
        let Some(handle) = self.pump.take() else {
            self.pool = None;
            return;
        };

        if let Err(state) = self.run_state.transition(RunState::Running, RunState::Terminating) {
            warn!("Terminating pipeline from unexpected state {:?}", state);
        }
        self.signal.close();

        match handle.join() {
            Ok(PumpParts { mut decoder, demuxer }) => {
                decoder.stop();
                drop(decoder);
                self.pool = None;
                drop(demuxer);
            }
            Err(_) => {
                error!("Decode pump panicked; its decoder and demuxer were dropped while unwinding");
                self.pool = None;
            }
        }

        let _ = self.run_state.transition(RunState::Terminating, RunState::Stopped);
        let stats = self.counters.snapshot();
        info!(
            "Video pipeline terminated after {} frames and {} loops",
            stats.frames_rendered, stats.loops
        );
    }

    /// True between a successful init and terminate
    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    /// Current lifecycle state
    pub fn run_state(&self) -> RunState {
        self.run_state.load()
    }

    /// Configuration given at construction
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Frame size of the running pipeline
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pool.as_ref().map(|pool| (pool.width(), pool.height()))
    }

    /// Pump counters of the current (or last) run
    pub fn stats(&self) -> PumpStats {
        self.counters.snapshot()
    }

    /// Frame pool counters while running
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(FramePool::stats)
    }
}

impl Drop for LoopDecoder {
    fn drop(&mut self) {
        self.terminate();
    }
}
