pub mod engine;
pub mod pump;
pub mod state;
pub mod sync;

pub use engine::{FrameConsumer, InitError, LoopDecoder};
pub use pump::{DecodePump, PumpStats};
pub use state::{RunState, RunStateCell};
pub use sync::{FrameSignal, Wait};
