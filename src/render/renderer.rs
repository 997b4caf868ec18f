//! Display side: renderer interface and the fixed-rate render loop.
//! Each refresh takes the latest decoded frame (if any), draws it with the overlay, and releases it.

use std::time::{Duration, Instant};
use crossbeam::channel::{self, Receiver};
use tracing::{debug, info};
use crate::playback::FrameConsumer;
use crate::pool::{Frame, FrameInfo};
use crate::render::overlay::{OverlayClock, OverlayText};

/// Error type for rendering operations
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Surface error: {0}")]
    Surface(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Draws one refresh: the overlay text and, when available, a video frame
pub trait Renderer {
    fn draw(&mut self, overlay: &OverlayText, frame: Option<&Frame>) -> Result<(), RenderError>;
}

/// Renderer without a display. Validates frames and logs periodically.
#[derive(Debug)]
pub struct HeadlessRenderer {
    log_every: u64,
    draws: u64,
    frames: u64,
    last_frame: Option<FrameInfo>,
}

impl HeadlessRenderer {
    /// Log a status line every `log_every` draws (0 disables it)
    pub fn new(log_every: u64) -> Self {
        Self {
            log_every,
            draws: 0,
            frames: 0,
            last_frame: None,
        }
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_frame(&self) -> Option<FrameInfo> {
        self.last_frame
    }
}

impl Renderer for HeadlessRenderer {
    fn draw(&mut self, overlay: &OverlayText, frame: Option<&Frame>) -> Result<(), RenderError> {
        if let Some(frame) = frame {
            let expected = frame.format().frame_size(frame.width(), frame.height());
            let actual = frame.pixels().len();
            if expected != Some(actual) {
                return Err(RenderError::InvalidFrame(format!(
                    "{}x{} {:?} frame holds {} bytes",
                    frame.width(),
                    frame.height(),
                    frame.format(),
                    actual
                )));
            }
            self.frames += 1;
            self.last_frame = Some(frame.info());
        }
        self.draws += 1;

        if self.log_every > 0 && self.draws % self.log_every == 0 {
            match self.last_frame {
                Some(info) => info!(
                    "[{}] {} frame #{} ({}x{})",
                    overlay.clock, overlay.fps, info.seq, info.width, info.height
                ),
                None => info!("[{}] {} no video", overlay.clock, overlay.fps),
            }
        }
        Ok(())
    }
}

/// Totals of a render loop run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub ticks: u64,
    pub frames_drawn: u64,
}

/// Fixed-rate refresh driving a [`Renderer`]
pub struct RenderLoop<R: Renderer> {
    renderer: R,
    consumer: Option<FrameConsumer>,
    interval: Duration,
    clock: OverlayClock,
    summary: RenderSummary,
}

impl<R: Renderer> RenderLoop<R> {
    /// Without a consumer the loop draws the overlay only
    pub fn new(renderer: R, consumer: Option<FrameConsumer>, interval: Duration) -> Self {
        Self {
            renderer,
            consumer,
            interval,
            clock: OverlayClock::new(Instant::now()),
            summary: RenderSummary::default(),
        }
    }

    /// Draw one refresh. Returns whether a video frame was drawn.
    ///
    /// Waits at most one interval for a new frame so the overlay keeps
    /// updating when the decoder stalls.
    pub fn tick(&mut self, now: Instant) -> Result<bool, RenderError> {
        let overlay = self.clock.tick(now);
        let frame = self
            .consumer
            .as_ref()
            .and_then(|consumer| consumer.acquire_latest_frame_timeout(self.interval));

        self.renderer.draw(&overlay, frame.as_ref())?;

        self.summary.ticks += 1;
        let drew = frame.is_some();
        if let Some(frame) = frame {
            self.summary.frames_drawn += 1;
            frame.release();
        }
        Ok(drew)
    }

    /// Tick at the configured interval until `stop` yields or disconnects
    pub fn run<T>(&mut self, stop: &Receiver<T>) -> Result<RenderSummary, RenderError> {
        let ticker = channel::tick(self.interval);
        debug!("Render loop started, interval {:?}", self.interval);
        loop {
            crossbeam::select! {
                recv(ticker) -> at => {
                    self.tick(at.unwrap_or_else(|_| Instant::now()))?;
                }
                recv(stop) -> _ => break,
            }
        }
        debug!(
            "Render loop stopped after {} ticks, {} frames",
            self.summary.ticks, self.summary.frames_drawn
        );
        Ok(self.summary)
    }

    pub fn summary(&self) -> RenderSummary {
        self.summary
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }
}
