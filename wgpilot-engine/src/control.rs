//! Control socket for IPC with a running tunnel
//!
//! A Unix domain socket speaking one JSON request line and one JSON
//! response line per connection. Besides status and shutdown it forwards
//! opaque requests to the controller, which is how a supervising process
//! reads the backend's runtime configuration.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use wg_protocol::RuntimeConfig;

use crate::controller::GET_RUNTIME_CONFIGURATION;
use crate::error::{Error, Result};
use crate::event::TunnelState;
use crate::service::TunnelHandle;

/// Default socket path for the control socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/wgpilot.sock";

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request messages sent to the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Get current status and peer statistics
    #[serde(rename = "status")]
    Status,

    /// Opaque request forwarded to the controller
    #[serde(rename = "app_message")]
    AppMessage { message: Vec<u8> },

    /// Request graceful shutdown
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response messages from the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlResponse {
    /// Status response
    #[serde(rename = "status")]
    Status(StatusInfo),

    /// Reply to an opaque request
    #[serde(rename = "app_message")]
    AppMessage { message: Option<Vec<u8>> },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },

    /// Success acknowledgment
    #[serde(rename = "ok")]
    Ok,
}

/// Tunnel status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Current tunnel state
    pub state: TunnelState,
    /// Tunnel name
    pub name: Option<String>,
    /// TUN interface name
    pub interface: String,
    /// Backend session handle, while running
    pub session: Option<i32>,
    /// Backend listen port, while running
    pub listen_port: Option<u16>,
    /// Bytes received across all peers
    pub bytes_rx: u64,
    /// Bytes transmitted across all peers
    pub bytes_tx: u64,
    /// Per-peer state reported by the backend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerStatus>,
}

/// Runtime state of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Base64 public key
    pub public_key: String,
    /// Current endpoint
    pub endpoint: Option<String>,
    /// Seconds since the last handshake
    pub last_handshake_secs: Option<u64>,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub allowed_ips: Vec<String>,
}

impl StatusInfo {
    fn with_runtime(mut self, runtime: &RuntimeConfig) -> Self {
        let now = SystemTime::now();
        self.listen_port = runtime.listen_port;
        self.bytes_rx = runtime.rx_bytes();
        self.bytes_tx = runtime.tx_bytes();
        self.peers = runtime
            .peers
            .iter()
            .map(|peer| PeerStatus {
                public_key: peer.public_key.to_base64(),
                endpoint: peer.endpoint.as_ref().map(ToString::to_string),
                last_handshake_secs: peer
                    .last_handshake()
                    .and_then(|t| now.duration_since(t).ok())
                    .map(|d| d.as_secs()),
                bytes_rx: peer.rx_bytes,
                bytes_tx: peer.tx_bytes,
                allowed_ips: peer.allowed_ips.iter().map(ToString::to_string).collect(),
            })
            .collect();
        self
    }
}

/// Control socket server
pub struct ControlServer {
    socket_path: PathBuf,
    interface: String,
    tunnel: TunnelHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(
        socket_path: impl AsRef<Path>,
        interface: impl Into<String>,
        tunnel: TunnelHandle,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            interface: interface.into(),
            tunnel,
            shutdown_tx,
        }
    }

    /// Bind the socket and serve until the task is dropped
    pub async fn start(&self) -> Result<()> {
        // Remove existing socket file
        let _ = std::fs::remove_file(&self.socket_path);

        if let Some(parent) = self.socket_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| Error::Control(format!("failed to bind control socket: {}", e)))?;

        // Owner read/write only
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.socket_path, perms);
        }

        log::info!("Control socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tunnel = self.tunnel.clone();
                    let shutdown_tx = self.shutdown_tx.clone();
                    let interface = self.interface.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, &tunnel, &shutdown_tx, &interface).await
                        {
                            log::debug!("Control connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::warn!("Control socket accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: UnixStream,
        tunnel: &TunnelHandle,
        shutdown_tx: &broadcast::Sender<()>,
        interface: &str,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        reader.read_line(&mut line).await?;
        if line.is_empty() {
            return Ok(()); // Client disconnected
        }

        let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(request) => Self::handle_request(request, tunnel, shutdown_tx, interface).await,
            Err(e) => ControlResponse::Error {
                message: format!("invalid request: {}", e),
            },
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;

        Ok(())
    }

    async fn handle_request(
        request: ControlRequest,
        tunnel: &TunnelHandle,
        shutdown_tx: &broadcast::Sender<()>,
        interface: &str,
    ) -> ControlResponse {
        let result = match request {
            ControlRequest::Status => status_info(tunnel, interface)
                .await
                .map(ControlResponse::Status),
            ControlRequest::AppMessage { message } => tunnel
                .app_message(message)
                .await
                .map(|message| ControlResponse::AppMessage { message }),
            ControlRequest::Shutdown => match shutdown_tx.send(()) {
                Ok(_) => Ok(ControlResponse::Ok),
                Err(_) => Err(Error::Control("shutdown not available".into())),
            },
        };

        result.unwrap_or_else(|e| ControlResponse::Error {
            message: e.to_string(),
        })
    }

    /// Remove the socket file
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn status_info(tunnel: &TunnelHandle, interface: &str) -> Result<StatusInfo> {
    let status = tunnel.status().await?;

    let info = StatusInfo {
        state: status.state,
        name: status.name,
        interface: interface.to_string(),
        session: status.session.map(|h| h.as_raw()),
        listen_port: None,
        bytes_rx: 0,
        bytes_tx: 0,
        peers: Vec::new(),
    };

    if status.session.is_none() {
        return Ok(info);
    }

    match tunnel.runtime_configuration().await {
        Ok(Some(runtime)) => Ok(info.with_runtime(&runtime)),
        Ok(None) => Ok(info),
        Err(e) => {
            log::warn!("Failed to read runtime configuration: {}", e);
            Ok(info)
        }
    }
}

/// Control socket client for querying a running tunnel
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Create a new control client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Send a request and get a response
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Control(format!(
                "failed to connect to control socket at {:?}: {}. Is the tunnel running?",
                self.socket_path, e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        writer.write_all(request_json.as_bytes()).await?;

        let mut line = String::new();
        tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Control("timeout waiting for response".into()))??;

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Get status from the running tunnel
    pub async fn status(&self) -> Result<StatusInfo> {
        match self.request(ControlRequest::Status).await? {
            ControlResponse::Status(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Send an opaque request
    pub async fn app_message(&self, message: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.request(ControlRequest::AppMessage { message }).await? {
            ControlResponse::AppMessage { message } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    /// Backend runtime configuration as UAPI text
    pub async fn runtime_config_text(&self) -> Result<Option<String>> {
        self.app_message(GET_RUNTIME_CONFIGURATION.to_vec())
            .await?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| Error::Control(format!("configuration is not UTF-8: {}", e)))
            })
            .transpose()
    }

    /// Request shutdown
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(ControlRequest::Shutdown).await? {
            ControlResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: ControlResponse) -> Error {
    match response {
        ControlResponse::Error { message } => Error::Control(message),
        _ => Error::Control("unexpected response".into()),
    }
}
