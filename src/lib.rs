//! Looping video decoder with latest-frame delivery.
//!
//! A decode pump thread feeds samples from a demuxer into a decoder that
//! renders into a fixed-capacity frame pool. A consumer (typically a render
//! loop) takes the most recent decoded frame whenever it refreshes.

pub mod core;
pub mod decode;
pub mod playback;
pub mod pool;
pub mod render;
pub mod source;
