//! Track metadata extracted from the container.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Pixel layout of pool slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGBA
    Rgba8,
    /// Planar YUV 4:2:0, chroma planes at quarter resolution
    Yuv420,
}

impl PixelFormat {
    /// Bytes needed to hold one frame, `None` on overflow
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        match self {
            PixelFormat::Rgba8 => w.checked_mul(h)?.checked_mul(4),
            PixelFormat::Yuv420 => {
                let luma = w.checked_mul(h)?;
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?.checked_mul(2)?;
                luma.checked_add(chroma)
            }
        }
    }
}

/// Opaque codec-specific configuration (parameter sets, extradata, ...)
///
/// Produced by a demuxer and only interpreted by a decoder from the same
/// backend, which downcasts it to its own type.
#[derive(Clone, Default)]
pub struct CodecConfig(Option<Arc<dyn Any + Send + Sync>>);

impl CodecConfig {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "CodecConfig(..)"),
            None => write!(f, "CodecConfig(none)"),
        }
    }
}

/// Description of one track in the container
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub index: usize,
    pub mime: String,
    pub media_type: MediaType,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub config: CodecConfig,
}

impl TrackDescriptor {
    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    /// Width and height, if both are present and non-zero
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}
