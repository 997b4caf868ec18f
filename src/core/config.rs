//! Player configuration.

use std::time::Duration;
use crate::decode::track::PixelFormat;

/// Smallest pool that still lets the decoder write while the consumer holds a frame
pub const MIN_CAPACITY: usize = 2;

/// Default number of decoded frames that may be outstanding at once
pub const DEFAULT_CAPACITY: usize = 3;

/// Default bounded wait for decoder input/output slots
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Error type for invalid configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Pool capacity {0} is below the minimum of {MIN_CAPACITY}")]
    CapacityTooSmall(usize),
    #[error("Frame interval must be non-zero")]
    ZeroFrameInterval,
}

/// Pipeline and render loop settings
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Frame pool capacity (MAX_IMAGES)
    pub capacity: usize,
    /// Bounded wait used by the decode pump for both feed and drain
    pub dequeue_timeout: Duration,
    /// Pixel format of pool slots handed to the renderer
    pub pixel_format: PixelFormat,
    /// Render loop tick interval
    pub frame_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            pixel_format: PixelFormat::Rgba8,
            frame_interval: Duration::from_micros(16_667),  // ~60 Hz
        }
    }
}

impl PlayerConfig {
    /// Build a config ticking at the given refresh rate
    pub fn with_refresh_rate(mut self, hz: f64) -> Self {
        if hz > 0.0 {
            self.frame_interval = Duration::from_secs_f64(1.0 / hz);
        }
        self
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity < MIN_CAPACITY {
            return Err(ConfigError::CapacityTooSmall(self.capacity));
        }
        if self.frame_interval.is_zero() {
            return Err(ConfigError::ZeroFrameInterval);
        }
        Ok(())
    }
}
