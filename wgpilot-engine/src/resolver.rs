//! Peer endpoint resolution
//!
//! Hostnames in peer endpoints are turned into IP literals before the
//! backend sees them. Resolution is all-or-nothing: a tunnel with one
//! unresolvable peer does not start.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;

use wg_protocol::Endpoint;

/// Name lookup used by [`EndpointResolver`]
pub trait HostResolver: Send + Sync {
    /// All addresses for `host`, in resolver order
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Blocking lookup through the system resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        // Port 0 as placeholder since only the IPs are used
        let addrs = (host, 0u16).to_socket_addrs()?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Resolves peer endpoints to IP literals
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn HostResolver>,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver").finish_non_exhaustive()
    }
}

impl EndpointResolver {
    pub fn new(lookup: Arc<dyn HostResolver>) -> Self {
        Self { lookup }
    }

    /// Resolve every endpoint, blocking the calling thread
    ///
    /// The result has one slot per input slot in the same order. IP literals,
    /// zone-scoped ones included, pass through untouched and empty slots stay
    /// empty. Each distinct
    /// hostname is looked up once, on its own thread. Returns `None` if any
    /// hostname fails to resolve.
    pub fn resolve_sync(&self, endpoints: &[Option<Endpoint>]) -> Option<Vec<Option<Endpoint>>> {
        let mut hosts: Vec<&str> = Vec::new();
        for endpoint in endpoints.iter().flatten() {
            if let Some(host) = endpoint.name_to_resolve() {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }

        let resolved: HashMap<&str, Option<IpAddr>> = std::thread::scope(|scope| {
            let handles: Vec<_> = hosts
                .iter()
                .map(|&host| (host, scope.spawn(move || self.resolve_host(host))))
                .collect();

            handles
                .into_iter()
                .map(|(host, handle)| {
                    let ip = handle.join().unwrap_or_else(|_| {
                        log::error!("Resolver thread for '{}' panicked", host);
                        None
                    });
                    (host, ip)
                })
                .collect()
        });

        if resolved.values().any(Option::is_none) {
            return None;
        }

        let out = endpoints
            .iter()
            .map(|slot| {
                slot.as_ref().map(|endpoint| match endpoint.name_to_resolve() {
                    Some(host) => match resolved.get(host).copied().flatten() {
                        Some(ip) => endpoint.with_ip(ip),
                        None => endpoint.clone(),
                    },
                    None => endpoint.clone(),
                })
            })
            .collect();

        Some(out)
    }

    fn resolve_host(&self, host: &str) -> Option<IpAddr> {
        match self.lookup.lookup(host) {
            Ok(addrs) => {
                let ip = addrs
                    .iter()
                    .find(|ip| ip.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied();
                match ip {
                    Some(ip) => log::debug!("Resolved '{}' to {}", host, ip),
                    None => log::error!("Failed to resolve '{}': no addresses", host),
                }
                ip
            }
            Err(e) => {
                log::error!("Failed to resolve '{}': {}", host, e);
                None
            }
        }
    }
}
