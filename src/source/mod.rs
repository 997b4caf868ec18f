pub mod resolver;

pub use resolver::{FixedResolver, MediaSource, NewestFileResolver, SourceError, SourceResolver};
