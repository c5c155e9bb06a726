//! TUN interface handle
//!
//! Packets never pass through this type. Its descriptor is handed to a
//! userspace WireGuard backend, and the handle only keeps the interface
//! alive until it is dropped.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};

use ipnet::IpNet;

use crate::config::TunConfig;
use crate::error::{Error, Result};

/// An open TUN interface
///
/// Dropping it closes the descriptor, which removes the interface together
/// with every route bound to it.
pub struct TunDevice {
    inner: tun_rs::SyncDevice,
    name: String,
    config: TunConfig,
}

impl TunDevice {
    /// Create the interface, assign its addresses and bring it up
    pub fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tun_rs::DeviceBuilder::new().mtu(config.mtu);
        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }
        if let Some(net) = config.ipv4 {
            builder = builder.ipv4(net.addr(), net.prefix_len(), config.ipv4_destination());
        }
        for net in &config.ipv6 {
            builder = builder.ipv6(net.addr(), net.prefix_len());
        }

        let inner = builder.build_sync().map_err(device_error)?;
        let name = inner.name().map_err(device_error)?;

        let device = Self {
            inner,
            name,
            config,
        };
        log::info!(
            "Created TUN device {} (mtu {}, addresses [{}])",
            device.name,
            device.config.mtu,
            device
                .addresses()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(device)
    }

    /// Name the OS gave the interface
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u16 {
        self.config.mtu
    }

    /// Interface addresses, IPv4 first
    pub fn addresses(&self) -> Vec<IpNet> {
        self.config
            .ipv4
            .map(IpNet::V4)
            .into_iter()
            .chain(self.config.ipv6.iter().copied().map(IpNet::V6))
            .collect()
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        log::info!("Closing TUN device {}", self.name);
    }
}

impl fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.name)
            .field("fd", &self.inner.as_raw_fd())
            .finish()
    }
}

fn device_error(e: impl fmt::Display) -> Error {
    Error::DeviceCreation(e.to_string())
}
