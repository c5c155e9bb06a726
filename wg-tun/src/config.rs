//! TUN device configuration
//!
//! The subset of [`TunnelNetworkSettings`](crate::TunnelNetworkSettings)
//! that is set on the interface itself. Routes and DNS are handled
//! separately once the device exists.

use std::net::Ipv4Addr;

use ipnet::{Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};
use crate::{DEFAULT_MTU, MIN_MTU};

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL)
pub const MAX_NAME_LEN: usize = 15;

/// Configuration for creating a TUN device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunConfig {
    /// Interface name, chosen by the OS when unset
    pub name: Option<String>,
    /// IPv4 interface address
    pub ipv4: Option<Ipv4Net>,
    /// IPv6 interface addresses
    pub ipv6: Vec<Ipv6Net>,
    pub mtu: u16,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: None,
            ipv4: None,
            ipv6: Vec::new(),
            mtu: DEFAULT_MTU,
        }
    }
}

impl TunConfig {
    /// Peer address for the point-to-point IPv4 link
    ///
    /// utun interfaces on macOS need a destination; the interface's own
    /// address is used, matching what `wg-quick` does there.
    pub fn ipv4_destination(&self) -> Option<Ipv4Addr> {
        if cfg!(target_os = "macos") {
            self.ipv4.map(|net| net.addr())
        } else {
            None
        }
    }

    /// Check the configuration before any system call is made
    pub fn validate(&self) -> Result<()> {
        if self.ipv4.is_none() && self.ipv6.is_empty() {
            return Err(Error::Config("tunnel has no interface addresses".into()));
        }

        if let Some(ref name) = self.name {
            validate_name(name)?;
        }

        if self.mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum {})",
                self.mtu, MIN_MTU
            )));
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Config(format!(
            "interface name '{}' must be 1 to {} characters",
            name, MAX_NAME_LEN
        )));
    }

    if name.contains(|c: char| c == '/' || c.is_whitespace()) {
        return Err(Error::Config(format!("invalid interface name '{}'", name)));
    }

    validate_platform_name(name)
}

#[cfg(target_os = "macos")]
fn validate_platform_name(name: &str) -> Result<()> {
    let is_utun = name
        .strip_prefix("utun")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));

    if !is_utun {
        return Err(Error::Config(format!(
            "interface name '{}' must be utunN on macOS",
            name
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn validate_platform_name(_name: &str) -> Result<()> {
    Ok(())
}
