//! Error types for wg-protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing endpoints, keys or UAPI text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("endpoint is empty")]
    EmptyEndpoint,

    #[error("endpoint '{0}' has no port")]
    MissingPort(String),

    #[error("endpoint '{0}' has no closing ']'")]
    UnterminatedBracket(String),

    #[error("endpoint '{0}' must have ':' after ']'")]
    MissingPortSeparator(String),

    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("invalid character {ch:?} in host '{host}'")]
    InvalidHostCharacter { host: String, ch: char },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed UAPI line '{0}'")]
    InvalidUapiLine(String),

    #[error("invalid UAPI value for '{key}': '{value}'")]
    InvalidUapiValue { key: String, value: String },

    #[error("UAPI '{key}' appeared before any peer")]
    OrphanPeerField { key: String },
}

impl Error {
    /// Check if this error came from endpoint parsing
    pub fn is_endpoint_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyEndpoint
                | Error::MissingPort(_)
                | Error::UnterminatedBracket(_)
                | Error::MissingPortSeparator(_)
                | Error::EmptyHost(_)
                | Error::InvalidPort(_)
                | Error::InvalidHostCharacter { .. }
        )
    }
}
