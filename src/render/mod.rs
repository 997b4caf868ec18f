pub mod overlay;
pub mod renderer;

pub use overlay::{OverlayClock, OverlayText};
pub use renderer::{HeadlessRenderer, RenderError, RenderLoop, RenderSummary, Renderer};
