//! Modification-time gate for configuration files

use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file reloaded only when its modification time moves
#[derive(Debug, Clone)]
pub struct WatchedFile {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl WatchedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file changed since the last call; true on the first call.
    ///
    /// The new stamp is recorded before the caller parses the file, so a
    /// broken file is reported once, not every round.
    pub fn changed(&mut self) -> Result<bool, ConfigError> {
        let modified = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        if self.modified == Some(modified) {
            return Ok(false);
        }
        self.modified = Some(modified);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_changed_follows_mtime() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watched = WatchedFile::new(file.path());

        assert!(watched.changed().unwrap());
        assert!(!watched.changed().unwrap());

        let later = SystemTime::now() + Duration::from_secs(5);
        file.as_file().set_modified(later).unwrap();
        assert!(watched.changed().unwrap());
        assert!(!watched.changed().unwrap());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watched = WatchedFile::new(dir.path().join("absent.toml"));
        assert!(matches!(watched.changed(), Err(ConfigError::Io { .. })));
    }
}
