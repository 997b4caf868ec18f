//! Source resolution: pick the media file to play.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Error type for source resolution
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Cannot read directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No .{extension} files found in {directory:?}")]
    NoMatch {
        directory: PathBuf,
        extension: String,
    },
    #[error("Cannot stat {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The container to decode. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    path: PathBuf,
    byte_len: u64,
}

impl MediaSource {
    pub fn new<P: Into<PathBuf>>(path: P, byte_len: u64) -> Self {
        Self {
            path: path.into(),
            byte_len,
        }
    }

    /// Describe a file on disk, reading its length
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|source| SourceError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            byte_len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }
}

/// Locates the media to play
pub trait SourceResolver {
    fn resolve(&self) -> Result<MediaSource, SourceError>;
}

/// A fixed, already known file
#[derive(Debug, Clone)]
pub struct FixedResolver {
    pub path: PathBuf,
}

impl FixedResolver {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl SourceResolver for FixedResolver {
    fn resolve(&self) -> Result<MediaSource, SourceError> {
        MediaSource::from_path(&self.path)
    }
}

/// Picks the most recently modified file with a given extension in a directory
#[derive(Debug, Clone)]
pub struct NewestFileResolver {
    pub directory: PathBuf,
    pub extension: String,
}

impl Default for NewestFileResolver {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/sdcard/Download"),
            extension: "mp4".to_string(),
        }
    }
}

impl NewestFileResolver {
    pub fn new<P: Into<PathBuf>>(directory: P, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }
}

impl SourceResolver for NewestFileResolver {
    fn resolve(&self) -> Result<MediaSource, SourceError> {
        let entries = fs::read_dir(&self.directory).map_err(|source| SourceError::Directory {
            path: self.directory.clone(),
            source,
        })?;

        let mut newest: Option<(SystemTime, PathBuf, u64)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }
            // Entries we cannot stat are skipped, same as unreadable ones
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            debug!("Candidate source {:?} modified {:?}", path, modified);
            if newest.as_ref().map_or(true, |(best, _, _)| modified > *best) {
                newest = Some((modified, path, metadata.len()));
            }
        }

        let (_, path, byte_len) = newest.ok_or_else(|| SourceError::NoMatch {
            directory: self.directory.clone(),
            extension: self.extension.clone(),
        })?;

        info!("Resolved source {:?} ({} bytes)", path, byte_len);
        Ok(MediaSource { path, byte_len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, contents: &[u8], modified: SystemTime) {
        fs::write(path, contents).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[test]
    fn test_picks_newest_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        touch(&dir.path().join("old.mp4"), b"old", base);
        touch(&dir.path().join("new.MP4"), b"newest", base + Duration::from_secs(60));
        touch(&dir.path().join("newer.mkv"), b"ignored", base + Duration::from_secs(120));

        let resolver = NewestFileResolver::new(dir.path(), ".mp4");
        let source = resolver.resolve().unwrap();

        assert_eq!(source.path(), dir.path().join("new.MP4"));
        assert_eq!(source.byte_len(), 6);
    }

    #[test]
    fn test_no_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip.mov"), b"x").unwrap();

        let resolver = NewestFileResolver::new(dir.path(), "mp4");
        assert!(matches!(resolver.resolve(), Err(SourceError::NoMatch { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = NewestFileResolver::new(dir.path().join("gone"), "mp4");
        assert!(matches!(resolver.resolve(), Err(SourceError::Directory { .. })));
    }

    #[test]
    fn test_fixed_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.mp4");
        fs::write(&path, vec![0u8; 42]).unwrap();

        let source = FixedResolver { path: path.clone() }.resolve().unwrap();
        assert_eq!(source.path(), path);
        assert_eq!(source.byte_len(), 42);

        let missing = FixedResolver { path: dir.path().join("none.mp4") }.resolve();
        assert!(matches!(missing, Err(SourceError::Metadata { .. })));
    }
}
