//! UAPI configuration text
//!
//! Userspace WireGuard implementations are configured with newline-delimited
//! `key=value` pairs: interface fields first, then one block per peer, each
//! block opened by `public_key=`. [`UapiBuilder`] assembles that text for
//! `set=1` operations and [`RuntimeConfig`] parses what `get=1` returns.
//!
//! ```text
//! private_key=<hex>
//! listen_port=51820
//! replace_peers=true
//! public_key=<hex>
//! endpoint=203.0.113.7:51820
//! replace_allowed_ips=true
//! allowed_ip=0.0.0.0/0
//! ```

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ipnet::IpNet;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::key::Key;

/// Builder for UAPI `set` text
///
/// Every method appends exactly one line, so call order is wire order.
#[derive(Debug, Default, Clone)]
pub struct UapiBuilder {
    out: String,
}

impl UapiBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw `key=value` line
    pub fn pair(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        // Writing to a String cannot fail
        let _ = writeln!(self.out, "{}={}", key, value);
        self
    }

    /// Interface private key
    pub fn private_key(self, key: &Key) -> Self {
        self.pair("private_key", key.to_hex())
    }

    /// Interface listen port
    pub fn listen_port(self, port: u16) -> Self {
        self.pair("listen_port", port)
    }

    /// Drop all peers not listed after this line
    pub fn replace_peers(self) -> Self {
        self.pair("replace_peers", "true")
    }

    /// Start a peer block
    pub fn public_key(self, key: &Key) -> Self {
        self.pair("public_key", key.to_hex())
    }

    /// Peer preshared key
    pub fn preshared_key(self, key: &Key) -> Self {
        self.pair("preshared_key", key.to_hex())
    }

    /// Peer endpoint; callers must pass a resolved endpoint
    pub fn endpoint(self, endpoint: &Endpoint) -> Self {
        debug_assert!(
            endpoint.has_host_as_ip_address(),
            "UAPI endpoints must be IP literals"
        );
        self.pair("endpoint", endpoint)
    }

    /// Peer persistent keepalive in seconds
    pub fn persistent_keepalive_interval(self, seconds: u16) -> Self {
        self.pair("persistent_keepalive_interval", seconds)
    }

    /// Replace rather than extend the peer's allowed IPs
    pub fn replace_allowed_ips(self) -> Self {
        self.pair("replace_allowed_ips", "true")
    }

    /// Add one allowed IP range to the current peer
    pub fn allowed_ip(self, net: &IpNet) -> Self {
        self.pair("allowed_ip", net)
    }

    /// Check if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Finish and return the text
    pub fn build(self) -> String {
        self.out
    }
}

/// Peer state reported by a running backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePeer {
    pub public_key: Key,
    pub preshared_key: Option<Key>,
    pub endpoint: Option<Endpoint>,
    pub persistent_keepalive_interval: Option<u16>,
    pub last_handshake_time_sec: u64,
    pub last_handshake_time_nsec: u32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub allowed_ips: Vec<IpNet>,
    pub protocol_version: Option<u32>,
}

impl RuntimePeer {
    fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive_interval: None,
            last_handshake_time_sec: 0,
            last_handshake_time_nsec: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            allowed_ips: Vec::new(),
            protocol_version: None,
        }
    }

    /// Time of the last completed handshake, if any
    pub fn last_handshake(&self) -> Option<SystemTime> {
        if self.last_handshake_time_sec == 0 && self.last_handshake_time_nsec == 0 {
            return None;
        }
        Some(
            UNIX_EPOCH
                + Duration::new(self.last_handshake_time_sec, self.last_handshake_time_nsec),
        )
    }
}

/// Interface and peer state parsed from `get=1` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub fwmark: Option<u32>,
    pub peers: Vec<RuntimePeer>,
}

impl RuntimeConfig {
    /// Parse UAPI `get` output
    ///
    /// Blank lines and a trailing `errno=` line are accepted. Unknown keys
    /// are skipped so newer backends keep working.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = RuntimeConfig::default();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::InvalidUapiLine(line.to_string()))?;

            match key {
                "private_key" => config.private_key = Some(parse_hex_key(key, value)?),
                "listen_port" => config.listen_port = Some(parse_number(key, value)?),
                "fwmark" => config.fwmark = Some(parse_number(key, value)?),
                "public_key" => config.peers.push(RuntimePeer::new(parse_hex_key(key, value)?)),
                "errno" => {}
                _ => {
                    let peer = match config.peers.last_mut() {
                        Some(peer) => peer,
                        None if is_peer_key(key) => {
                            return Err(Error::OrphanPeerField { key: key.to_string() })
                        }
                        None => {
                            log::debug!("Skipping unknown UAPI interface key '{}'", key);
                            continue;
                        }
                    };
                    apply_peer_field(peer, key, value)?;
                }
            }
        }

        Ok(config)
    }

    /// Find a peer by public key
    pub fn peer(&self, public_key: &Key) -> Option<&RuntimePeer> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }

    /// Endpoints of all peers, in peer order
    pub fn endpoints(&self) -> Vec<Option<Endpoint>> {
        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Total bytes received across peers
    pub fn rx_bytes(&self) -> u64 {
        self.peers.iter().map(|p| p.rx_bytes).sum()
    }

    /// Total bytes transmitted across peers
    pub fn tx_bytes(&self) -> u64 {
        self.peers.iter().map(|p| p.tx_bytes).sum()
    }
}

fn is_peer_key(key: &str) -> bool {
    matches!(
        key,
        "preshared_key"
            | "endpoint"
            | "persistent_keepalive_interval"
            | "last_handshake_time_sec"
            | "last_handshake_time_nsec"
            | "rx_bytes"
            | "tx_bytes"
            | "allowed_ip"
            | "protocol_version"
    )
}

fn apply_peer_field(peer: &mut RuntimePeer, key: &str, value: &str) -> Result<()> {
    match key {
        "preshared_key" => {
            let psk = parse_hex_key(key, value)?;
            peer.preshared_key = (!psk.is_zero()).then_some(psk);
        }
        "endpoint" => {
            peer.endpoint = Some(value.parse().map_err(|_| invalid(key, value))?);
        }
        "persistent_keepalive_interval" => {
            let secs: u16 = parse_number(key, value)?;
            peer.persistent_keepalive_interval = (secs != 0).then_some(secs);
        }
        "last_handshake_time_sec" => peer.last_handshake_time_sec = parse_number(key, value)?,
        "last_handshake_time_nsec" => peer.last_handshake_time_nsec = parse_number(key, value)?,
        "rx_bytes" => peer.rx_bytes = parse_number(key, value)?,
        "tx_bytes" => peer.tx_bytes = parse_number(key, value)?,
        "allowed_ip" => peer
            .allowed_ips
            .push(value.parse().map_err(|_| invalid(key, value))?),
        "protocol_version" => peer.protocol_version = Some(parse_number(key, value)?),
        _ => log::debug!("Skipping unknown UAPI peer key '{}'", key),
    }
    Ok(())
}

fn parse_hex_key(key: &str, value: &str) -> Result<Key> {
    Key::from_hex(value).map_err(|_| invalid(key, value))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidUapiValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
