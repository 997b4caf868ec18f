//! Core types shared across the pipeline.
//!
//! Time values are nanoseconds (i64); configuration covers the frame pool,
//! the decode pump's bounded waits and the render loop rate.

pub mod config;
pub mod time;

pub use config::{ConfigError, PlayerConfig};
pub use time::{Time, ZERO};
