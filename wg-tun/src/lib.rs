//! Tunnel interface plumbing for wgpilot
//!
//! This crate turns a platform-neutral description of a tunnel's network
//! settings into a live interface:
//!
//! - [`TunnelNetworkSettings`]: addresses, included/excluded routes, DNS and
//!   MTU for the tunnel interface, in the shape a packet tunnel provider
//!   hands to the OS
//! - [`TunConfig`] / [`TunDevice`]: creation of the TUN interface through
//!   `tun-rs`, exposing the raw descriptor a userspace backend reads from
//! - [`RouteManager`]: route add/delete/list through `net-route`, default
//!   gateway lookup, and the route-change stream used for path monitoring
//!
//! # Platform Requirements
//!
//! Creating devices and touching the routing table needs root or
//! `CAP_NET_ADMIN` on Linux and root on macOS.
//!
//! # Example
//!
//! ```ignore
//! use wg_tun::{TunDevice, TunnelNetworkSettings, Ipv4Settings};
//!
//! let settings = TunnelNetworkSettings::new("203.0.113.7".parse()?)
//!     .with_ipv4(Ipv4Settings::new(vec!["10.8.0.2/24".parse()?]))
//!     .with_tunnel_overhead(80);
//!
//! let device = TunDevice::create(settings.to_tun_config(Some("wg0"))?)?;
//! println!("{} fd={}", device.name(), device.as_raw_fd());
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod route;
pub mod settings;

pub use config::TunConfig;
pub use device::TunDevice;
pub use error::{Error, Result};
pub use route::{AppliedRoutes, Route, RouteChange, RouteManager};
pub use settings::{DnsSettings, Ipv4Settings, Ipv6Settings, TunnelNetworkSettings};

/// MTU of a standard Ethernet link, the base for overhead-derived MTUs
pub const ETHERNET_MTU: u16 = 1500;

/// Default MTU for tunnel devices (Ethernet minus WireGuard's 80-byte overhead)
pub const DEFAULT_MTU: u16 = 1420;

/// Smallest MTU an IPv4 host must accept
pub const MIN_MTU: u16 = 576;
