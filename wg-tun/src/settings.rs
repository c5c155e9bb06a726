//! Tunnel network settings
//!
//! [`TunnelNetworkSettings`] is the complete, OS-neutral description of what
//! the tunnel interface should look like once it is up: which addresses it
//! carries, which destinations are routed into it (and which must bypass
//! it), which resolvers to use, and its MTU. The engine derives one of these
//! from a tunnel configuration; an applier turns it into a device and
//! routing table entries.

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::config::TunConfig;
use crate::error::Result;
use crate::{ETHERNET_MTU, MIN_MTU};

/// Network settings for a tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelNetworkSettings {
    /// Address of the remote tunnel end (informational on most platforms)
    pub tunnel_remote_address: IpAddr,
    /// IPv4 settings
    pub ipv4: Option<Ipv4Settings>,
    /// IPv6 settings
    pub ipv6: Option<Ipv6Settings>,
    /// DNS settings
    pub dns: Option<DnsSettings>,
    /// Fixed MTU; takes precedence over `tunnel_overhead_bytes`
    pub mtu: Option<u16>,
    /// Bytes of encapsulation overhead, for an MTU derived from the link
    pub tunnel_overhead_bytes: Option<u16>,
}

impl TunnelNetworkSettings {
    /// Create empty settings for the given remote address
    pub fn new(tunnel_remote_address: IpAddr) -> Self {
        Self {
            tunnel_remote_address,
            ipv4: None,
            ipv6: None,
            dns: None,
            mtu: None,
            tunnel_overhead_bytes: None,
        }
    }

    /// Set IPv4 settings
    pub fn with_ipv4(mut self, ipv4: Ipv4Settings) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    /// Set IPv6 settings
    pub fn with_ipv6(mut self, ipv6: Ipv6Settings) -> Self {
        self.ipv6 = Some(ipv6);
        self
    }

    /// Set DNS settings
    pub fn with_dns(mut self, dns: DnsSettings) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Set a fixed MTU
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Derive the MTU from the link MTU minus `bytes` of overhead
    pub fn with_tunnel_overhead(mut self, bytes: u16) -> Self {
        self.tunnel_overhead_bytes = Some(bytes);
        self
    }

    /// MTU to configure on the device
    ///
    /// Overhead is subtracted from an Ethernet-sized link; the result never
    /// drops below [`MIN_MTU`].
    pub fn effective_mtu(&self) -> u16 {
        match (self.mtu, self.tunnel_overhead_bytes) {
            (Some(mtu), _) => mtu,
            (None, Some(overhead)) => ETHERNET_MTU.saturating_sub(overhead).max(MIN_MTU),
            (None, None) => crate::DEFAULT_MTU,
        }
    }

    /// All included routes, IPv4 first
    pub fn included_routes(&self) -> Vec<IpNet> {
        let v4 = self.ipv4.iter().flat_map(|s| s.included_routes.iter().map(|n| IpNet::V4(*n)));
        let v6 = self.ipv6.iter().flat_map(|s| s.included_routes.iter().map(|n| IpNet::V6(*n)));
        v4.chain(v6).collect()
    }

    /// All excluded routes, IPv4 first
    pub fn excluded_routes(&self) -> Vec<IpNet> {
        let v4 = self.ipv4.iter().flat_map(|s| s.excluded_routes.iter().map(|n| IpNet::V4(*n)));
        let v6 = self.ipv6.iter().flat_map(|s| s.excluded_routes.iter().map(|n| IpNet::V6(*n)));
        v4.chain(v6).collect()
    }

    /// Build the device configuration for these settings
    ///
    /// TUN devices created through `tun-rs` carry a single IPv4 address;
    /// additional IPv4 addresses are skipped with a warning.
    pub fn to_tun_config(&self, name: Option<&str>) -> Result<TunConfig> {
        let mut config = TunConfig {
            name: name.map(str::to_string),
            mtu: self.effective_mtu(),
            ..TunConfig::default()
        };

        if let Some(ref ipv4) = self.ipv4 {
            let mut addresses = ipv4.addresses.iter();
            config.ipv4 = addresses.next().copied();
            for skipped in addresses {
                log::warn!("Ignoring additional IPv4 address {} on tunnel device", skipped);
            }
        }

        if let Some(ref ipv6) = self.ipv6 {
            config.ipv6 = ipv6.addresses.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// IPv4 interface settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv4Settings {
    /// Interface addresses with their prefix
    pub addresses: Vec<Ipv4Net>,
    /// Destinations routed into the tunnel
    pub included_routes: Vec<Ipv4Net>,
    /// Destinations that must bypass the tunnel
    pub excluded_routes: Vec<Ipv4Net>,
}

impl Ipv4Settings {
    /// Create settings for the given addresses
    pub fn new(addresses: Vec<Ipv4Net>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }

    /// Subnet masks, one per address
    pub fn subnet_masks(&self) -> Vec<std::net::Ipv4Addr> {
        self.addresses.iter().map(|n| n.netmask()).collect()
    }
}

/// IPv6 interface settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv6Settings {
    /// Interface addresses with their prefix
    pub addresses: Vec<Ipv6Net>,
    /// Destinations routed into the tunnel
    pub included_routes: Vec<Ipv6Net>,
    /// Destinations that must bypass the tunnel
    pub excluded_routes: Vec<Ipv6Net>,
}

impl Ipv6Settings {
    /// Create settings for the given addresses
    pub fn new(addresses: Vec<Ipv6Net>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }

    /// Prefix lengths, one per address
    pub fn prefix_lengths(&self) -> Vec<u8> {
        self.addresses.iter().map(|n| n.prefix_len()).collect()
    }
}

/// Resolver settings for the tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsSettings {
    /// Resolver addresses
    pub servers: Vec<IpAddr>,
    /// Search domains appended to unqualified names
    pub search_domains: Vec<String>,
    /// Domains whose queries go to these servers; `[""]` matches everything
    pub match_domains: Vec<String>,
}

impl DnsSettings {
    /// Create settings that send every query to `servers`
    pub fn match_all(servers: Vec<IpAddr>) -> Self {
        Self {
            servers,
            search_domains: Vec::new(),
            match_domains: vec![String::new()],
        }
    }

    /// Set the search domains
    pub fn with_search_domains(mut self, domains: Vec<String>) -> Self {
        self.search_domains = domains;
        self
    }
}
