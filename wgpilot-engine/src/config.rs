//! Configuration types for the tunnel engine

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use wg_protocol::{Endpoint, Key};

use crate::controller::PlatformQuirks;
use crate::error::{Error, Result};

/// Smallest non-automatic MTU accepted for a tunnel
pub const MIN_MTU: u16 = 576;

/// Longest interface name the kernel accepts
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Configuration file: service settings plus one tunnel
///
/// # Example Configuration
///
/// ```toml
/// name = "office"
///
/// [service]
/// interface_name = "wg0"
/// log_level = "info"
///
/// [interface]
/// private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
/// addresses = ["10.8.0.2/24"]
/// dns = ["10.8.0.1"]
///
/// [[peer]]
/// public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
/// allowed_ips = ["0.0.0.0/0"]
/// endpoint = "vpn.example.com:51820"
/// persistent_keepalive = 25
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Process-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// The tunnel itself
    #[serde(flatten)]
    pub tunnel: TunnelConfiguration,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        self.tunnel.validate()
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# wgpilot configuration

# Tunnel name (optional, shown in logs)
name = "office"

[service]
# TUN interface name. On macOS this must be a utun name such as "utun7".
interface_name = "wg0"

# Userspace WireGuard implementation to run (wireguard-go compatible)
backend_binary = "wireguard-go"

# Directory holding the backend's UAPI sockets
uapi_dir = "/var/run/wireguard"

# Control socket path (default: /var/run/wgpilot.sock)
# control_socket = "/var/run/wgpilot.sock"

# Write the last start failure here for a supervising process (optional)
# last_error_file = "/var/run/wgpilot/last-error"

# Log level: "error", "warn", "info", "debug", "trace"
log_level = "info"

# Let peers roam to new source addresses
roaming = true

# Push re-resolved peer endpoints to the backend on network changes.
# Defaults to true on iOS/Android, false elsewhere.
# refresh_endpoints_on_path_change = false

# Exit the process after the tunnel stops (defaults to true on macOS)
# exit_after_stop = false

[interface]
# Base64 private key (generate with `wg genkey`)
private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="

# Local UDP port (optional, random if unset)
# listen_port = 51820

# Tunnel addresses
addresses = ["10.8.0.2/24", "fd08::2/64"]

# DNS servers and search domains (optional)
dns = ["10.8.0.1"]
# dns_search = ["corp.example.com"]

# MTU, 0 for automatic
mtu = 0

[[peer]]
public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
# preshared_key = "..."
allowed_ips = ["0.0.0.0/0", "::/0"]
endpoint = "vpn.example.com:51820"
persistent_keepalive = 25
"#
        .to_string()
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// TUN interface name
    #[serde(default = "default_interface_name")]
    pub interface_name: String,

    /// Userspace backend executable
    #[serde(default = "default_backend_binary")]
    pub backend_binary: PathBuf,

    /// Directory holding the backend's UAPI sockets
    #[serde(default = "default_uapi_dir")]
    pub uapi_dir: PathBuf,

    /// Control socket path (optional)
    #[serde(default)]
    pub control_socket: Option<String>,

    /// Last-error file path (optional)
    #[serde(default)]
    pub last_error_file: Option<PathBuf>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Allow peers to roam to new source addresses
    #[serde(default = "default_true")]
    pub roaming: bool,

    /// Override the platform default for endpoint refresh on path changes
    #[serde(default)]
    pub refresh_endpoints_on_path_change: Option<bool>,

    /// Override the platform default for exiting after stop
    #[serde(default)]
    pub exit_after_stop: Option<bool>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            interface_name: default_interface_name(),
            backend_binary: default_backend_binary(),
            uapi_dir: default_uapi_dir(),
            control_socket: None,
            last_error_file: None,
            log_level: default_log_level(),
            roaming: true,
            refresh_endpoints_on_path_change: None,
            exit_after_stop: None,
        }
    }
}

impl ServiceConfig {
    /// Validate service settings
    pub fn validate(&self) -> Result<()> {
        if self.interface_name.is_empty() {
            return Err(Error::Config("interface_name cannot be empty".into()));
        }
        if self.interface_name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(Error::Config(format!(
                "interface_name '{}' is longer than {} characters",
                self.interface_name, MAX_INTERFACE_NAME_LEN
            )));
        }
        if !matches!(
            self.log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(Error::Config(format!("unknown log_level '{}'", self.log_level)));
        }
        Ok(())
    }

    /// Platform quirks with this configuration's overrides applied
    pub fn quirks(&self) -> PlatformQuirks {
        let defaults = PlatformQuirks::default();
        PlatformQuirks {
            refresh_endpoints_on_path_change: self
                .refresh_endpoints_on_path_change
                .unwrap_or(defaults.refresh_endpoints_on_path_change),
            exit_after_stop: self.exit_after_stop.unwrap_or(defaults.exit_after_stop),
        }
    }

    /// Path of the backend's UAPI socket for this interface
    pub fn uapi_socket(&self) -> PathBuf {
        self.uapi_dir.join(format!("{}.sock", self.interface_name))
    }
}

/// A WireGuard tunnel: interface settings and an ordered list of peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfiguration {
    /// Tunnel name
    #[serde(default)]
    pub name: Option<String>,

    /// Local interface settings
    pub interface: InterfaceConfiguration,

    /// Peers, in configuration order
    #[serde(default, rename = "peer")]
    pub peers: Vec<PeerConfiguration>,
}

/// Local interface settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfiguration {
    pub private_key: Key,

    #[serde(default)]
    pub listen_port: Option<u16>,

    /// Tunnel addresses with their prefix
    #[serde(default, alias = "address")]
    pub addresses: Vec<IpNet>,

    /// DNS servers
    #[serde(default)]
    pub dns: Vec<IpAddr>,

    /// DNS search domains
    #[serde(default)]
    pub dns_search: Vec<String>,

    /// MTU, 0 for automatic
    #[serde(default)]
    pub mtu: u16,
}

impl InterfaceConfiguration {
    pub fn new(private_key: Key) -> Self {
        Self {
            private_key,
            listen_port: None,
            addresses: Vec::new(),
            dns: Vec::new(),
            dns_search: Vec::new(),
            mtu: 0,
        }
    }
}

/// A remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfiguration {
    pub public_key: Key,

    #[serde(default)]
    pub preshared_key: Option<Key>,

    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,

    #[serde(default)]
    pub endpoint: Option<Endpoint>,

    /// Keepalive interval in seconds
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfiguration {
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            persistent_keepalive: None,
        }
    }
}

impl TunnelConfiguration {
    /// Create a tunnel with no peers
    pub fn new(interface: InterfaceConfiguration) -> Self {
        Self {
            name: None,
            interface,
            peers: Vec::new(),
        }
    }

    /// Parse a tunnel from TOML, ignoring any `[service]` section
    pub fn from_toml(content: &str) -> Result<Self> {
        let tunnel: TunnelConfiguration = toml::from_str(content)?;
        tunnel.validate()?;
        Ok(tunnel)
    }

    /// Serialize as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(format!("failed to serialize tunnel: {}", e)))
    }

    /// Validate the tunnel
    pub fn validate(&self) -> Result<()> {
        let mtu = self.interface.mtu;
        if mtu != 0 && mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum {}, or 0 for automatic)",
                mtu, MIN_MTU
            )));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.public_key) {
                return Err(Error::Config(format!(
                    "duplicate peer public key {}",
                    peer.public_key
                )));
            }
        }

        Ok(())
    }

    /// Peer endpoints, one slot per peer
    pub fn endpoints(&self) -> Vec<Option<Endpoint>> {
        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Display name, falling back to "unnamed"
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

// Default value functions
fn default_interface_name() -> String {
    if cfg!(target_os = "macos") {
        "utun7".to_string()
    } else {
        "wg0".to_string()
    }
}

fn default_backend_binary() -> PathBuf {
    PathBuf::from("wireguard-go")
}

fn default_uapi_dir() -> PathBuf {
    PathBuf::from("/var/run/wireguard")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
