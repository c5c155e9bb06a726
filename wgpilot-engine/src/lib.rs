//! wgpilot Engine
//!
//! Lifecycle controller for a WireGuard tunnel: it decodes a tunnel
//! configuration, resolves peer endpoints, applies interface and routing
//! settings, starts a backend session and keeps that session consistent
//! while the host's network path changes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐        ┌───────────────────────────┐   │
//! │  │   wgpilot-cli   │        │  control socket clients   │   │
//! │  └────────┬────────┘        └─────────────┬─────────────┘   │
//! │           └───────────────┬───────────────┘                 │
//! │                           ▼                                 │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                   wgpilot-engine                      │  │
//! │  │  - TunnelService / TunnelHandle (serial queue)        │  │
//! │  │  - TunnelController (state machine)                   │  │
//! │  │  - Resolver, settings generator, decoders             │  │
//! │  │  - Backend, applier, path monitor, notifier traits    │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Library Layer                            │
//! │  ┌─────────────────┐    ┌─────────────────┐                 │
//! │  │   wg-protocol   │    │     wg-tun      │                 │
//! │  │  - Endpoints    │    │  - TUN device   │                 │
//! │  │  - Keys         │    │  - Routes       │                 │
//! │  │  - UAPI text    │    │  - Settings     │                 │
//! │  └─────────────────┘    └─────────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod applier;
pub mod backend;
pub mod config;
pub mod control;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod event;
pub mod notifier;
pub mod path;
pub mod resolver;
pub mod service;
pub mod settings;
pub mod wg_quick;

pub use applier::{MockApplier, NetworkSettingsApplier, TunApplier};
pub use backend::{enable_roaming, roaming_enabled, Backend, MockBackend, SessionHandle, UserspaceBackend};
pub use config::{Config, InterfaceConfiguration, PeerConfiguration, ServiceConfig, TunnelConfiguration};
pub use control::{ControlClient, ControlRequest, ControlResponse, ControlServer, PeerStatus, StatusInfo, DEFAULT_SOCKET_PATH};
pub use controller::{Collaborators, PlatformQuirks, TunnelController, GET_RUNTIME_CONFIGURATION};
pub use decoder::{ConfigDecoder, ConfigSource, DefaultDecoder, ProtocolConfiguration};
pub use error::{Error, Result, TunnelError};
pub use event::{EventHandler, LogLevel, LoggingEventHandler, StopReason, TunnelEvent, TunnelState};
pub use notifier::{ErrorNotifier, LastErrorFile, NoopNotifier};
pub use path::{ManualPathMonitor, NetworkPath, PathMonitor, PathSink, PathStatus, PathSubscription, RouteChangeMonitor};
pub use resolver::{EndpointResolver, HostResolver, SystemResolver};
pub use service::{TunnelHandle, TunnelService, TunnelStatus};
pub use settings::PacketTunnelSettingsGenerator;
