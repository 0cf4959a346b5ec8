//! Output directory management.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use snaply_ipc::RecorderConfig;

use crate::error::RecordingError;
use crate::RecordingResult;

/// Resolves the path a new recording is written to.
pub trait OutputPathProvider: Send {
    /// Path of the recording file. The parent directory must exist.
    fn output_path(&self) -> RecordingResult<PathBuf>;
}

impl<F> OutputPathProvider for F
where
    F: Fn() -> RecordingResult<PathBuf> + Send,
{
    fn output_path(&self) -> RecordingResult<PathBuf> {
        self()
    }
}

/// Output directory inside the host cache directory.
#[derive(Debug, Clone)]
pub struct FilesDir {
    dir: PathBuf,
    recording_file_name: String,
}

impl FilesDir {
    /// Describe the output directory under `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>, config: &RecorderConfig) -> Self {
        Self {
            dir: cache_dir.as_ref().join(&config.files_dir_name),
            recording_file_name: config.recording_file_name.clone(),
        }
    }

    /// Directory path, without creating it.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed and return its path.
    pub fn ensure(&self) -> RecordingResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        Ok(self.dir.clone())
    }

    /// Path of the recording file.
    pub fn recording_path(&self) -> PathBuf {
        self.dir.join(&self.recording_file_name)
    }
}

impl OutputPathProvider for FilesDir {
    fn output_path(&self) -> RecordingResult<PathBuf> {
        self.ensure()?;
        Ok(self.recording_path())
    }
}

/// Delete `path`, treating a missing file as success.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, RecordingError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed output file");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("snaply_files_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_recording_path_is_deterministic() {
        let cache = temp_cache("path");
        let files = FilesDir::new(&cache, &RecorderConfig::default());
        assert_eq!(
            files.recording_path(),
            cache.join("snaply_files").join("screen_recording.mp4")
        );
        assert!(!files.path().exists());

        let path = files.output_path().unwrap();
        assert!(path.parent().unwrap().is_dir());
        let _ = fs::remove_dir_all(cache);
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let cache = temp_cache("remove");
        fs::create_dir_all(&cache).unwrap();
        let file = cache.join("old.mp4");
        assert!(!remove_file_if_exists(&file).unwrap());

        fs::write(&file, b"old").unwrap();
        assert!(remove_file_if_exists(&file).unwrap());
        assert!(!file.exists());
        let _ = fs::remove_dir_all(cache);
    }
}
