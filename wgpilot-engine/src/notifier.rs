//! Last-error reporting for supervising processes
//!
//! When a start fails, the controller hands the error to an
//! [`ErrorNotifier`]. The file-based notifier leaves a two-line file
//! (`title` then `message`) that a separate process can pick up and show;
//! the controller removes it again on the next stop.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::TunnelError;

/// Receiver for start failures
pub trait ErrorNotifier: Send + Sync {
    /// Record a start failure
    fn notify(&self, error: &TunnelError);

    /// Forget the last recorded failure
    fn remove_last_error_file(&self);
}

/// Writes the last start failure to a file
#[derive(Debug, Clone)]
pub struct LastErrorFile {
    path: PathBuf,
}

impl LastErrorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a last-error file as `(title, message)`
    pub fn read(path: impl AsRef<Path>) -> io::Result<Option<(String, String)>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let (title, message) = content.split_once('\n').unwrap_or((content.as_str(), ""));
        Ok(Some((title.to_string(), message.to_string())))
    }

    fn write(&self, error: &TunnelError) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n{}", error.title(), error.message()))
    }
}

impl ErrorNotifier for LastErrorFile {
    fn notify(&self, error: &TunnelError) {
        if let Err(e) = self.write(error) {
            log::warn!("Failed to write last error file {:?}: {}", self.path, e);
        }
    }

    fn remove_last_error_file(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed last error file {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove last error file {:?}: {}", self.path, e),
        }
    }
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ErrorNotifier for NoopNotifier {
    fn notify(&self, _error: &TunnelError) {}

    fn remove_last_error_file(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("last-error");
        let notifier = LastErrorFile::new(&path);

        assert_eq!(LastErrorFile::read(&path).unwrap(), None);

        notifier.notify(&TunnelError::DnsResolution);
        let (title, message) = LastErrorFile::read(&path).unwrap().unwrap();
        assert_eq!(title, "DNS resolution failure");
        assert!(message.contains("could not be resolved"));

        notifier.remove_last_error_file();
        assert!(!path.exists());
        // Removing twice is fine
        notifier.remove_last_error_file();
    }
}
