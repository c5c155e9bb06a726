//! Tunnel events and state

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::NetworkPath;

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// No session; `start` may run
    #[default]
    Idle,
    /// Resolving, applying settings and starting the backend
    Starting,
    /// Backend session is up
    Running,
    /// Tearing the session down
    Stopping,
}

impl TunnelState {
    /// Check if the tunnel is in an active state
    pub fn is_active(&self) -> bool {
        !matches!(self, TunnelState::Idle)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            TunnelState::Idle => "Idle",
            TunnelState::Starting => "Starting...",
            TunnelState::Running => "Running",
            TunnelState::Stopping => "Stopping...",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Why a tunnel was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The user asked for it
    UserInitiated,
    /// Requested over the control socket
    ControlRequest,
    /// The process received a termination signal
    Signal,
    /// Cleanup after a failed start
    StartFailed,
    /// The service is shutting down
    ServiceShutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::UserInitiated => "user initiated",
            StopReason::ControlRequest => "control request",
            StopReason::Signal => "signal",
            StopReason::StartFailed => "start failed",
            StopReason::ServiceShutdown => "service shutdown",
        };
        f.write_str(s)
    }
}

/// Events emitted by the tunnel controller
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    /// State changed
    StateChanged { old: TunnelState, new: TunnelState },

    /// Backend session started
    Started {
        /// Number of configured peers
        peers: usize,
    },

    /// Tunnel stopped
    Stopped { reason: StopReason },

    /// Network path changed while running
    PathChanged(NetworkPath),

    /// Start failed
    Error {
        /// Short title
        title: String,
        /// Error message
        message: String,
    },

    /// Log message
    Log { level: LogLevel, message: String },
}

/// Log levels for tunnel events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Event handler trait for receiving tunnel events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a tunnel event
    async fn on_event(&self, event: TunnelEvent);
}

/// Simple event handler that logs events
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: TunnelEvent) {
        match event {
            TunnelEvent::StateChanged { old, new } => {
                log::info!("Tunnel state: {} -> {}", old, new);
            }
            TunnelEvent::Started { peers } => {
                log::info!("Tunnel started with {} peer(s)", peers);
            }
            TunnelEvent::Stopped { reason } => {
                log::info!("Tunnel stopped: {}", reason);
            }
            TunnelEvent::PathChanged(path) => {
                log::info!("Network path changed: {}", path);
            }
            TunnelEvent::Error { title, message } => {
                log::error!("{}: {}", title, message);
            }
            TunnelEvent::Log { level, message } => match level {
                LogLevel::Debug => log::debug!("{}", message),
                LogLevel::Info => log::info!("{}", message),
                LogLevel::Warning => log::warn!("{}", message),
                LogLevel::Error => log::error!("{}", message),
            },
        }
    }
}
