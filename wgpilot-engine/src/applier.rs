//! Applying network settings to the host
//!
//! The controller hands derived [`TunnelNetworkSettings`] to a
//! [`NetworkSettingsApplier`] and then asks it for the descriptor of the
//! tunnel device the backend should run on.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Mutex;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use wg_tun::{AppliedRoutes, Route, RouteManager, TunDevice, TunnelNetworkSettings};

/// Applies tunnel network settings to the operating system
#[async_trait::async_trait]
pub trait NetworkSettingsApplier: Send + Sync {
    /// Create the tunnel interface and install its routes
    ///
    /// Replaces anything a previous call applied.
    async fn apply(&self, settings: &TunnelNetworkSettings) -> wg_tun::Result<()>;

    /// Descriptor of the tunnel device, once settings are applied
    fn tunnel_fd(&self) -> Option<RawFd>;

    /// Remove the interface and its routes
    async fn clear(&self);
}

struct Applied {
    device: TunDevice,
    manager: RouteManager,
    routes: AppliedRoutes,
}

/// Applier creating a TUN device and routing table entries
pub struct TunApplier {
    interface: String,
    state: tokio::sync::Mutex<Option<Applied>>,
    fd: AtomicI32,
}

impl TunApplier {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            state: tokio::sync::Mutex::new(None),
            fd: AtomicI32::new(-1),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    async fn teardown(&self, mut applied: Applied) {
        self.fd.store(-1, Ordering::SeqCst);
        applied.routes.cleanup(&applied.manager).await;
        log::info!("Removed tunnel interface {}", applied.device.name());
    }
}

#[async_trait::async_trait]
impl NetworkSettingsApplier for TunApplier {
    async fn apply(&self, settings: &TunnelNetworkSettings) -> wg_tun::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            self.teardown(previous).await;
        }

        let config = settings.to_tun_config(Some(&self.interface))?;
        let manager = RouteManager::new().await?;

        // Read before our own routes change it
        let original_gateway = manager.default_gateway().await.unwrap_or_else(|e| {
            log::warn!("Failed to read default gateway: {}", e);
            None
        });

        let device = TunDevice::create(config)?;
        let name = device.name().to_string();
        log::info!(
            "Created tunnel interface {} (mtu {}, remote {})",
            name,
            device.mtu(),
            settings.tunnel_remote_address
        );

        let mut routes = AppliedRoutes::new();

        let excluded = settings.excluded_routes();
        if !excluded.is_empty() {
            match original_gateway {
                Some(gateway) => {
                    for net in excluded {
                        if same_family(&net, &gateway) {
                            let route = Route::new(net, gateway);
                            if let Err(e) = routes.add(&manager, route).await {
                                log::warn!("Failed to add bypass route for {}: {}", net, e);
                            }
                        }
                    }
                }
                None => log::warn!(
                    "No default gateway found, endpoint bypass routes not added - tunnel may not work correctly"
                ),
            }
        }

        for net in settings.included_routes() {
            for part in split_default(net) {
                if let Err(e) = routes.add(&manager, Route::interface_route(part, &name)).await {
                    routes.cleanup(&manager).await;
                    return Err(e);
                }
            }
        }

        if let Some(dns) = &settings.dns {
            log::info!(
                "Tunnel DNS servers: {:?}, search domains: {:?}",
                dns.servers,
                dns.search_domains
            );
        }

        self.fd.store(device.as_raw_fd(), Ordering::SeqCst);
        *state = Some(Applied {
            device,
            manager,
            routes,
        });
        Ok(())
    }

    fn tunnel_fd(&self) -> Option<RawFd> {
        let fd = self.fd.load(Ordering::SeqCst);
        (fd >= 0).then_some(fd)
    }

    async fn clear(&self) {
        let applied = self.state.lock().await.take();
        if let Some(applied) = applied {
            self.teardown(applied).await;
        }
    }
}

fn same_family(net: &IpNet, addr: &IpAddr) -> bool {
    matches!(
        (net, addr),
        (IpNet::V4(_), IpAddr::V4(_)) | (IpNet::V6(_), IpAddr::V6(_))
    )
}

/// Split a default route into two halves so the original default stays intact
fn split_default(net: IpNet) -> Vec<IpNet> {
    if net.prefix_len() != 0 {
        return vec![net];
    }
    match net {
        IpNet::V4(_) => [
            Ipv4Net::new(Ipv4Addr::new(0, 0, 0, 0), 1),
            Ipv4Net::new(Ipv4Addr::new(128, 0, 0, 0), 1),
        ]
            .into_iter()
            .flatten()
            .map(IpNet::V4)
            .collect(),
        IpNet::V6(_) => [
            Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 1),
            Ipv6Net::new(Ipv6Addr::new(0x8000, 0, 0, 0, 0, 0, 0, 0), 1),
        ]
            .into_iter()
            .flatten()
            .map(IpNet::V6)
            .collect(),
    }
}

/// Applier that only records what it was asked to do
#[derive(Debug)]
pub struct MockApplier {
    applied: Mutex<Vec<TunnelNetworkSettings>>,
    cleared: AtomicUsize,
    fail: bool,
    fd: Option<RawFd>,
    current: AtomicI32,
}

impl Default for MockApplier {
    fn default() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            cleared: AtomicUsize::new(0),
            fail: false,
            fd: Some(42),
            current: AtomicI32::new(-1),
        }
    }
}

impl MockApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `apply` fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `apply` succeeds but no descriptor is available
    pub fn without_fd() -> Self {
        Self {
            fd: None,
            ..Self::default()
        }
    }

    /// Settings passed to `apply`, in call order
    pub fn applied(&self) -> Vec<TunnelNetworkSettings> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `clear` calls
    pub fn clear_count(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NetworkSettingsApplier for MockApplier {
    async fn apply(&self, settings: &TunnelNetworkSettings) -> wg_tun::Result<()> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(settings.clone());
        if self.fail {
            return Err(wg_tun::Error::DeviceCreation("mock apply failure".into()));
        }
        self.current.store(self.fd.unwrap_or(-1), Ordering::SeqCst);
        Ok(())
    }

    fn tunnel_fd(&self) -> Option<RawFd> {
        let fd = self.current.load(Ordering::SeqCst);
        (fd >= 0).then_some(fd)
    }

    async fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.current.store(-1, Ordering::SeqCst);
    }
}
