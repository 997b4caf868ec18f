pub mod frame_pool;

pub use frame_pool::{Frame, FrameInfo, FramePool, PoolError, PoolStats, PoolSurface, SurfaceBuffer};
