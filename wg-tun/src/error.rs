//! Error types for wg-tun

use std::io;
use thiserror::Error;

/// Result type alias for wg-tun operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while applying tunnel network settings
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Device creation error
    #[error("device creation error: {0}")]
    DeviceCreation(String),

    /// Interface not found
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// Route management error
    #[error("route error: {0}")]
    Route(String),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            Error::DeviceCreation(msg) | Error::Route(msg) => {
                msg.contains("Operation not permitted") || msg.contains("os error 1)")
            }
            _ => false,
        }
    }

    /// Check if the error is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InterfaceNotFound(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
