//! Route management for the tunnel interface
//!
//! Adding and removing routes, looking up the current default route, and
//! watching the routing table for changes all go through the `net-route`
//! crate.

use std::ffi::{CStr, CString};
use std::fmt;
use std::net::IpAddr;

use futures::{Stream, StreamExt};
use ipnet::IpNet;

use crate::error::{Error, Result};

/// `if_nametoindex` for a Rust string
pub fn get_interface_index(name: &str) -> Result<u32> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex is safe to call with a valid C string
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(Error::InterfaceNotFound(name.to_string()));
    }

    Ok(index)
}

pub fn get_interface_name(index: u32) -> Option<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];

    // SAFETY: buf is IF_NAMESIZE bytes as if_indextoname requires
    let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ptr.is_null() {
        return None;
    }

    // SAFETY: on success buf holds a NUL-terminated name
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// A network route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: IpNet,
    /// Next hop; `None` sends traffic straight out of `interface`
    pub gateway: Option<IpAddr>,
    /// Interface name
    pub interface: Option<String>,
}

impl Route {
    /// Create a route to a destination network via a gateway
    pub fn new(destination: IpNet, gateway: IpAddr) -> Self {
        Self {
            destination,
            gateway: Some(gateway),
            interface: None,
        }
    }

    /// Route bound to an interface with no next hop
    pub fn interface_route(destination: IpNet, interface: impl Into<String>) -> Self {
        Self {
            destination,
            gateway: None,
            interface: Some(interface.into()),
        }
    }

    /// Create a host route (/32 or /128) for a single address via a gateway
    pub fn host(addr: IpAddr, gateway: IpAddr) -> Self {
        Self::new(IpNet::from(addr), gateway)
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// `0.0.0.0/0` or `::/0`
    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.destination, IpNet::V4(_))
    }

    fn to_net_route(&self, strict: bool) -> Result<net_route::Route> {
        let mut route =
            net_route::Route::new(self.destination.network(), self.destination.prefix_len());

        if let Some(gw) = self.gateway {
            route = route.with_gateway(gw);
        }

        if let Some(ref iface) = self.interface {
            match get_interface_index(iface) {
                Ok(index) => route = route.with_ifindex(index),
                Err(e) if strict => return Err(e),
                // Interface may already be gone
                Err(_) => {}
            }
        }

        Ok(route)
    }
}

impl From<&net_route::Route> for Route {
    fn from(r: &net_route::Route) -> Self {
        let destination = IpNet::new(r.destination, r.prefix)
            .unwrap_or_else(|_| IpNet::from(r.destination));
        Self {
            destination,
            gateway: r.gateway,
            interface: r.ifindex.and_then(get_interface_name),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(ref gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(ref iface) = self.interface {
            write!(f, " dev {}", iface)?;
        }
        Ok(())
    }
}

/// A change in the routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Added(Route),
    Deleted(Route),
    Changed(Route),
}

impl RouteChange {
    /// The route this change is about
    pub fn route(&self) -> &Route {
        match self {
            RouteChange::Added(r) | RouteChange::Deleted(r) | RouteChange::Changed(r) => r,
        }
    }
}

impl From<net_route::RouteChange> for RouteChange {
    fn from(change: net_route::RouteChange) -> Self {
        match change {
            net_route::RouteChange::Add(r) => RouteChange::Added(Route::from(&r)),
            net_route::RouteChange::Delete(r) => RouteChange::Deleted(Route::from(&r)),
            net_route::RouteChange::Change(r) => RouteChange::Changed(Route::from(&r)),
        }
    }
}

/// Route manager for adding/removing routes
pub struct RouteManager {
    handle: net_route::Handle,
}

impl RouteManager {
    /// Create a new route manager
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new() -> Result<Self> {
        let handle = net_route::Handle::new()
            .map_err(|e| Error::Route(format!("failed to create route handle: {}", e)))?;

        Ok(Self { handle })
    }

    /// Add a route to the routing table
    ///
    /// A route that already exists counts as added.
    pub async fn add(&self, route: &Route) -> Result<()> {
        let net_route = route.to_net_route(true)?;

        match self.handle.add(&net_route).await {
            Ok(()) => log::info!("Added route: {}", route),
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                log::debug!("Route already exists: {}", route);
            }
            Err(e) => return Err(Error::Route(format!("failed to add route {}: {}", route, e))),
        }

        Ok(())
    }

    /// Remove a route from the routing table
    pub async fn delete(&self, route: &Route) -> Result<()> {
        let net_route = route.to_net_route(false)?;

        self.handle
            .delete(&net_route)
            .await
            .map_err(|e| Error::Route(format!("failed to delete route {}: {}", route, e)))?;

        log::info!("Deleted route: {}", route);
        Ok(())
    }

    /// List all routes in the routing table
    pub async fn list(&self) -> Result<Vec<Route>> {
        let routes = self
            .handle
            .list()
            .await
            .map_err(|e| Error::Route(format!("failed to list routes: {}", e)))?;

        Ok(routes.iter().map(Route::from).collect())
    }

    /// Get the current default route, if any
    pub async fn default_route(&self) -> Result<Option<Route>> {
        let route = self
            .handle
            .default_route()
            .await
            .map_err(|e| Error::Route(format!("failed to get default route: {}", e)))?;

        Ok(route.as_ref().map(Route::from))
    }

    /// Get the current default gateway address, if any
    pub async fn default_gateway(&self) -> Result<Option<IpAddr>> {
        Ok(self.default_route().await?.and_then(|r| r.gateway))
    }

    /// Stream of routing table changes
    pub fn changes(&self) -> impl Stream<Item = RouteChange> + '_ {
        self.handle.route_listen_stream().map(RouteChange::from)
    }
}

/// Tracks routes added on behalf of a tunnel so they can be removed together
#[derive(Debug, Default)]
pub struct AppliedRoutes {
    routes: Vec<Route>,
}

impl AppliedRoutes {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route and remember it for cleanup
    pub async fn add(&mut self, manager: &RouteManager, route: Route) -> Result<()> {
        manager.add(&route).await?;
        self.routes.push(route);
        Ok(())
    }

    /// Get the applied routes
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Check if nothing was applied
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Remove all applied routes, newest first
    pub async fn cleanup(&mut self, manager: &RouteManager) {
        while let Some(route) = self.routes.pop() {
            if let Err(e) = manager.delete(&route).await {
                log::debug!("Route cleanup: {}", e);
            }
        }
    }
}
