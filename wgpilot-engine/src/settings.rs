//! Derivation of network settings and backend configuration
//!
//! [`PacketTunnelSettingsGenerator`] pairs a tunnel configuration with its
//! resolved peer endpoints and produces everything the controller hands to
//! collaborators: OS network settings for the applier, the full UAPI text
//! for the backend's first configuration, and an endpoint-only UAPI text
//! for refreshing peers after a network change.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use wg_protocol::{Endpoint, UapiBuilder};
use wg_tun::{DnsSettings, Ipv4Settings, Ipv6Settings, TunnelNetworkSettings};

use crate::config::TunnelConfiguration;

/// Encapsulation overhead used when the MTU is automatic
pub const TUNNEL_OVERHEAD_BYTES: u16 = 80;

/// Longest IPv6 prefix assigned to the interface
const MAX_IPV6_PREFIX: u8 = 120;

/// Settings generator for one tunnel session
#[derive(Debug, Clone)]
pub struct PacketTunnelSettingsGenerator {
    tunnel: TunnelConfiguration,
    resolved_endpoints: Vec<Option<Endpoint>>,
}

impl PacketTunnelSettingsGenerator {
    /// Create a generator; `resolved_endpoints` has one slot per peer
    pub fn new(tunnel: TunnelConfiguration, resolved_endpoints: Vec<Option<Endpoint>>) -> Self {
        debug_assert_eq!(tunnel.peers.len(), resolved_endpoints.len());
        Self {
            tunnel,
            resolved_endpoints,
        }
    }

    pub fn tunnel(&self) -> &TunnelConfiguration {
        &self.tunnel
    }

    pub fn resolved_endpoints(&self) -> &[Option<Endpoint>] {
        &self.resolved_endpoints
    }

    fn resolved(&self, index: usize) -> Option<&Endpoint> {
        self.resolved_endpoints.get(index).and_then(Option::as_ref)
    }

    /// OS network settings for the tunnel interface
    pub fn generate_network_settings(&self) -> TunnelNetworkSettings {
        let iface = &self.tunnel.interface;

        let resolved_ips: Vec<IpAddr> = self
            .resolved_endpoints
            .iter()
            .flatten()
            .filter_map(Endpoint::ip)
            .collect();

        let remote = match resolved_ips.as_slice() {
            [only] => *only,
            _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        let mut settings = TunnelNetworkSettings::new(remote);

        if !iface.dns.is_empty() {
            settings = settings.with_dns(
                DnsSettings::match_all(iface.dns.clone()).with_search_domains(iface.dns_search.clone()),
            );
        }

        settings = if iface.mtu == 0 {
            settings.with_tunnel_overhead(TUNNEL_OVERHEAD_BYTES)
        } else {
            settings.with_mtu(iface.mtu)
        };

        let mut ipv4 = Ipv4Settings::default();
        let mut ipv6 = Ipv6Settings::default();

        for address in &iface.addresses {
            match address {
                IpNet::V4(net) => {
                    ipv4.addresses.push(*net);
                    push_unique(&mut ipv4.included_routes, net.trunc());
                }
                IpNet::V6(net) => {
                    let net = clamp_ipv6(*net);
                    ipv6.addresses.push(net);
                    push_unique(&mut ipv6.included_routes, net.trunc());
                }
            }
        }

        let allowed = self.tunnel.peers.iter().flat_map(|p| p.allowed_ips.iter());
        for net in allowed {
            match net {
                IpNet::V4(net) => push_unique(&mut ipv4.included_routes, net.trunc()),
                IpNet::V6(net) => push_unique(&mut ipv6.included_routes, net.trunc()),
            }
        }

        // Endpoint traffic must not loop back into a tunnel that takes the default route
        let v4_default = ipv4.included_routes.iter().any(|n| n.prefix_len() == 0);
        let v6_default = ipv6.included_routes.iter().any(|n| n.prefix_len() == 0);
        for ip in resolved_ips {
            match ip {
                IpAddr::V4(addr) if v4_default => {
                    push_unique(&mut ipv4.excluded_routes, Ipv4Net::from(addr))
                }
                IpAddr::V6(addr) if v6_default => {
                    push_unique(&mut ipv6.excluded_routes, Ipv6Net::from(addr))
                }
                _ => {}
            }
        }

        if !ipv4.addresses.is_empty() || !ipv4.included_routes.is_empty() {
            settings = settings.with_ipv4(ipv4);
        }
        if !ipv6.addresses.is_empty() || !ipv6.included_routes.is_empty() {
            settings = settings.with_ipv6(ipv6);
        }

        settings
    }

    /// Full backend configuration replacing all peers
    pub fn uapi_configuration(&self) -> String {
        let iface = &self.tunnel.interface;
        let mut uapi = UapiBuilder::new().private_key(&iface.private_key);

        if let Some(port) = iface.listen_port {
            uapi = uapi.listen_port(port);
        }
        uapi = uapi.replace_peers();

        for (index, peer) in self.tunnel.peers.iter().enumerate() {
            uapi = uapi.public_key(&peer.public_key);
            if let Some(psk) = &peer.preshared_key {
                uapi = uapi.preshared_key(psk);
            }
            if let Some(endpoint) = self.resolved(index) {
                uapi = uapi.endpoint(endpoint);
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                uapi = uapi.persistent_keepalive_interval(keepalive);
            }
            uapi = uapi.replace_allowed_ips();
            for net in &peer.allowed_ips {
                uapi = uapi.allowed_ip(net);
            }
        }

        uapi.build()
    }

    /// Backend configuration updating only peer endpoints
    pub fn endpoint_uapi_configuration(&self) -> String {
        self.tunnel
            .peers
            .iter()
            .enumerate()
            .filter_map(|(index, peer)| self.resolved(index).map(|ep| (peer, ep)))
            .fold(UapiBuilder::new(), |uapi, (peer, endpoint)| {
                uapi.public_key(&peer.public_key).endpoint(endpoint)
            })
            .build()
    }
}

fn clamp_ipv6(net: Ipv6Net) -> Ipv6Net {
    if net.prefix_len() <= MAX_IPV6_PREFIX {
        return net;
    }
    Ipv6Net::new(net.addr(), MAX_IPV6_PREFIX).unwrap_or(net)
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}
