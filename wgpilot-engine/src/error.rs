//! Error types for the tunnel engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint, key or UAPI text error
    #[error("protocol error: {0}")]
    Protocol(#[from] wg_protocol::Error),

    /// TUN device or route error
    #[error("TUN error: {0}")]
    Tun(#[from] wg_tun::Error),

    /// Backend reported a failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Control socket error
    #[error("control socket error: {0}")]
    Control(String),

    /// JSON encoding error on the control socket
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tunnel lifecycle error
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// No tunnel session is active
    #[error("tunnel is not running")]
    NotRunning,

    /// The tunnel service has shut down
    #[error("tunnel service has shut down")]
    Shutdown,
}

impl Error {
    /// Check if this is a recoverable error
    ///
    /// Recoverable errors may succeed if the same operation is retried later
    /// (for example once the network is reachable again).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Tunnel(e) => e.is_recoverable(),
            Error::Backend(_) | Error::Control(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::Config(_) | Error::ConfigParse(_) | Error::Protocol(_) => true,
            Error::Tunnel(e) => matches!(
                e,
                TunnelError::MissingProtocolConfiguration | TunnelError::DecodeTunnelConfiguration(_)
            ),
            _ => false,
        }
    }
}

/// Reasons a tunnel start can fail
///
/// Every variant carries a short title and a longer message suitable for
/// showing to a user; [`crate::notifier::LastErrorFile`] persists both.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("missing protocol configuration")]
    MissingProtocolConfiguration,

    #[error("failed to decode tunnel configuration: {0}")]
    DecodeTunnelConfiguration(#[source] Box<Error>),

    #[error("failed to resolve one or more peer endpoints")]
    DnsResolution,

    #[error("failed to set network settings: {0}")]
    SetNetworkSettings(#[source] wg_tun::Error),

    #[error("tunnel device file descriptor is unavailable")]
    TunnelDeviceFileDescriptor,

    #[error("WireGuard backend failed to start (code {0})")]
    StartWireGuardBackend(i32),

    #[error("tunnel is already running")]
    AlreadyRunning,
}

impl TunnelError {
    /// Short user-facing title
    pub fn title(&self) -> &'static str {
        match self {
            TunnelError::MissingProtocolConfiguration => "Activation failure",
            TunnelError::DecodeTunnelConfiguration(_) => "Invalid configuration",
            TunnelError::DnsResolution => "DNS resolution failure",
            TunnelError::SetNetworkSettings(_) => "Network settings failure",
            TunnelError::TunnelDeviceFileDescriptor => "Tunnel device failure",
            TunnelError::StartWireGuardBackend(_) => "Backend failure",
            TunnelError::AlreadyRunning => "Activation failure",
        }
    }

    /// Longer user-facing explanation
    pub fn message(&self) -> String {
        match self {
            TunnelError::MissingProtocolConfiguration => {
                "The tunnel was started without a configuration.".to_string()
            }
            TunnelError::DecodeTunnelConfiguration(cause) => {
                format!("The tunnel configuration could not be read: {}", cause)
            }
            TunnelError::DnsResolution => {
                "One or more endpoint domains could not be resolved.".to_string()
            }
            TunnelError::SetNetworkSettings(cause) => {
                format!("Unable to apply network settings to the tunnel: {}", cause)
            }
            TunnelError::TunnelDeviceFileDescriptor => {
                "Unable to determine the tunnel device file descriptor.".to_string()
            }
            TunnelError::StartWireGuardBackend(code) => {
                format!("Unable to turn on the WireGuard backend (code {}).", code)
            }
            TunnelError::AlreadyRunning => "The tunnel is already running.".to_string(),
        }
    }

    /// Check if retrying the start later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TunnelError::DnsResolution | TunnelError::StartWireGuardBackend(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_error_text() {
        let err = TunnelError::StartWireGuardBackend(-2);
        assert_eq!(err.title(), "Backend failure");
        assert!(err.message().contains("-2"));

        let cause = Error::Config("missing private key".into());
        let err = TunnelError::DecodeTunnelConfiguration(Box::new(cause));
        assert!(err.message().contains("missing private key"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_classification() {
        let err = Error::from(TunnelError::DnsResolution);
        assert!(err.is_recoverable());
        assert!(!err.is_config_error());

        let err = Error::from(TunnelError::MissingProtocolConfiguration);
        assert!(err.is_config_error());
        assert!(!err.is_recoverable());

        assert!(Error::Config("bad".into()).is_config_error());
        assert!(!Error::Shutdown.is_recoverable());
    }
}
