//! WireGuard protocol value types
//!
//! This crate holds the small, dependency-light types that every other part
//! of wgpilot speaks in:
//!
//! - [`Endpoint`]: a peer address (`host:port` / `[v6]:port`) with a stable
//!   canonical text form
//! - [`Key`]: a 32-byte Curve25519 key, base64 in configuration files and
//!   lowercase hex on the wire
//! - [`uapi`]: assembly of the line-oriented `key=value` configuration text
//!   understood by userspace WireGuard backends, and parsing of the text they
//!   return for `get=1`
//!
//! # Example
//!
//! ```rust
//! use wg_protocol::Endpoint;
//!
//! let endpoint: Endpoint = "[2001:db8::1]:443".parse().unwrap();
//! assert!(endpoint.has_host_as_ip_address());
//! assert_eq!(endpoint.to_string(), "[2001:db8::1]:443");
//!
//! let named = Endpoint::parse("example.com:51820").unwrap();
//! assert_eq!(named.hostname(), Some("example.com"));
//! ```

mod endpoint;
mod error;
mod key;
pub mod uapi;

pub use endpoint::{Endpoint, Host};
pub use error::{Error, Result};
pub use key::{Key, KEY_LEN};
pub use uapi::{RuntimeConfig, RuntimePeer, UapiBuilder};

/// Default WireGuard listen port used by `wg-quick` style configurations
pub const DEFAULT_PORT: u16 = 51820;
