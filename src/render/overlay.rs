//! Overlay text drawn on every refresh: a running clock and an FPS counter.

use std::time::Instant;
use crate::core::time::{self, Time};

/// Clock text wraps at this many milliseconds
pub const CLOCK_WRAP_MS: i64 = 100_000;

/// FPS is recomputed once more than this many milliseconds have passed
pub const FPS_WINDOW_MS: i64 = 1_000;

/// Text for one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayText {
    pub clock: String,
    /// Empty until the first measurement window completes
    pub fps: String,
}

/// Tracks elapsed time and refresh rate across ticks
#[derive(Debug, Clone)]
pub struct OverlayClock {
    started: Instant,
    window_start: Time,
    window_frames: u32,
    fps: String,
}

impl OverlayClock {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            window_start: time::ZERO,
            window_frames: 0,
            fps: String::new(),
        }
    }

    /// Count one refresh at `now` and return the text to draw
    pub fn tick(&mut self, now: Instant) -> OverlayText {
        let elapsed = time::from_duration(now.saturating_duration_since(self.started));
        let elapsed_ms = time::to_millis(elapsed);

        self.window_frames += 1;
        let window_ms = elapsed_ms - time::to_millis(self.window_start);
        if window_ms > FPS_WINDOW_MS {
            let fps = i64::from(self.window_frames) * 1_000 / window_ms;
            self.fps = format!("{} fps", fps);
            self.window_frames = 0;
            self.window_start = elapsed;
        }

        OverlayText {
            clock: (elapsed_ms % CLOCK_WRAP_MS).to_string(),
            fps: self.fps.clone(),
        }
    }
}
