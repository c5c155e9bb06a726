//! Tunnel lifecycle controller
//!
//! The controller turns an activation request into a running backend
//! session and back:
//!
//! ```text
//!   Idle --start--> Starting --ok--> Running --stop--> Stopping --> Idle
//!                       |
//!                       +--error--> Idle (error notified once)
//! ```
//!
//! It owns no I/O itself. Decoding, name resolution, network settings,
//! path monitoring, the WireGuard backend and error reporting are all
//! collaborators, so the same state machine drives a real TUN device or a
//! set of test doubles. Methods take `&mut self`; serialization is the job
//! of [`crate::service::TunnelService`].

use std::sync::Arc;

use wg_protocol::RuntimeConfig;

use crate::applier::NetworkSettingsApplier;
use crate::backend::{Backend, SessionHandle};
use crate::decoder::{ConfigDecoder, ProtocolConfiguration};
use crate::error::{Error, Result, TunnelError};
use crate::event::{EventHandler, LogLevel, StopReason, TunnelEvent, TunnelState};
use crate::notifier::ErrorNotifier;
use crate::path::{NetworkPath, PathMonitor, PathSink, PathSubscription};
use crate::resolver::EndpointResolver;
use crate::settings::PacketTunnelSettingsGenerator;

/// Opaque request asking for the backend's runtime configuration
pub const GET_RUNTIME_CONFIGURATION: &[u8] = &[0x00];

/// Platform-specific behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformQuirks {
    /// Push refreshed peer endpoints to the backend on every path change
    pub refresh_endpoints_on_path_change: bool,
    /// Terminate the process once a stop has been acknowledged
    ///
    /// Never applies to the cleanup stop after a failed start, so the
    /// failure still reaches the caller.
    pub exit_after_stop: bool,
}

impl Default for PlatformQuirks {
    fn default() -> Self {
        Self {
            refresh_endpoints_on_path_change: cfg!(any(target_os = "ios", target_os = "android")),
            exit_after_stop: cfg!(target_os = "macos"),
        }
    }
}

/// Everything the controller talks to
#[derive(Clone)]
pub struct Collaborators {
    pub decoder: Arc<dyn ConfigDecoder>,
    pub resolver: EndpointResolver,
    pub applier: Arc<dyn NetworkSettingsApplier>,
    pub path_monitor: Arc<dyn PathMonitor>,
    pub backend: Arc<dyn Backend>,
    pub notifier: Arc<dyn ErrorNotifier>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

/// Tunnel lifecycle state machine
pub struct TunnelController {
    collab: Collaborators,
    quirks: PlatformQuirks,
    path_sink: PathSink,
    state: TunnelState,
    handle: Option<SessionHandle>,
    generator: Option<PacketTunnelSettingsGenerator>,
    subscription: Option<PathSubscription>,
}

impl TunnelController {
    /// Create a controller; `path_sink` receives updates from the path monitor
    pub fn new(collab: Collaborators, quirks: PlatformQuirks, path_sink: PathSink) -> Self {
        Self {
            collab,
            quirks,
            path_sink,
            state: TunnelState::Idle,
            handle: None,
            generator: None,
            subscription: None,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn quirks(&self) -> PlatformQuirks {
        self.quirks
    }

    /// Backend session, if one is held
    pub fn session(&self) -> Option<SessionHandle> {
        self.handle
    }

    /// Name of the running tunnel
    pub fn tunnel_name(&self) -> Option<&str> {
        self.generator.as_ref().and_then(|g| g.tunnel().name.as_deref())
    }

    /// Number of peers of the running tunnel
    pub fn peer_count(&self) -> usize {
        self.generator.as_ref().map_or(0, |g| g.tunnel().peers.len())
    }

    /// Bring the tunnel up
    ///
    /// Every failure is handed to the error notifier exactly once and leaves
    /// the controller `Idle`. Starting while a session is held fails with
    /// [`TunnelError::AlreadyRunning`] without notifying.
    pub async fn start(
        &mut self,
        protocol: Option<ProtocolConfiguration>,
    ) -> std::result::Result<(), TunnelError> {
        if let Some(handle) = self.handle {
            log::warn!("Start requested while session {} is running", handle);
            return Err(TunnelError::AlreadyRunning);
        }

        self.set_state(TunnelState::Starting).await;

        match self.try_start(protocol).await {
            Ok(handle) => {
                log::info!("Tunnel is up (backend session {})", handle);
                self.handle = Some(handle);
                self.set_state(TunnelState::Running).await;
                self.emit(TunnelEvent::Started {
                    peers: self.peer_count(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                log::error!("Tunnel start failed: {}", e);
                self.subscription = None;
                self.generator = None;
                self.collab.notifier.notify(&e);
                self.emit(TunnelEvent::Error {
                    title: e.title().to_string(),
                    message: e.message(),
                })
                .await;
                self.set_state(TunnelState::Idle).await;
                Err(e)
            }
        }
    }

    async fn try_start(
        &mut self,
        protocol: Option<ProtocolConfiguration>,
    ) -> std::result::Result<SessionHandle, TunnelError> {
        let protocol = protocol.ok_or(TunnelError::MissingProtocolConfiguration)?;

        let tunnel = self
            .collab
            .decoder
            .decode(&protocol)
            .map_err(|e| TunnelError::DecodeTunnelConfiguration(Box::new(e)))?;
        log::info!(
            "Starting tunnel '{}' with {} peer(s)",
            tunnel.display_name(),
            tunnel.peers.len()
        );

        let endpoints = tunnel.endpoints();
        let resolver = self.collab.resolver.clone();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve_sync(&endpoints))
            .await
            .unwrap_or_else(|e| {
                log::error!("Endpoint resolution task failed: {}", e);
                None
            })
            .ok_or(TunnelError::DnsResolution)?;

        let generator = PacketTunnelSettingsGenerator::new(tunnel, resolved);
        let settings = generator.generate_network_settings();
        self.collab
            .applier
            .apply(&settings)
            .await
            .map_err(TunnelError::SetNetworkSettings)?;

        let uapi = generator.uapi_configuration();
        self.generator = Some(generator);
        self.subscription = Some(self.collab.path_monitor.watch(self.path_sink.clone()));

        let fd = self
            .collab
            .applier
            .tunnel_fd()
            .ok_or(TunnelError::TunnelDeviceFileDescriptor)?;

        let backend = self.collab.backend.clone();
        let code = tokio::task::spawn_blocking(move || backend.start(&uapi, fd))
            .await
            .unwrap_or_else(|e| {
                log::error!("Backend start task failed: {}", e);
                -1
            });

        SessionHandle::from_raw(code).ok_or(TunnelError::StartWireGuardBackend(code))
    }

    /// Tear the tunnel down; safe to call in any state
    ///
    /// The last-error file is removed unless `reason` is
    /// [`StopReason::StartFailed`].
    pub async fn stop(&mut self, reason: StopReason) {
        let was_running = self.handle.is_some();
        if was_running {
            self.set_state(TunnelState::Stopping).await;
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }

        // Cleanup after a failed start keeps the failure on record
        if reason != StopReason::StartFailed {
            self.collab.notifier.remove_last_error_file();
        }

        if let Some(handle) = self.handle.take() {
            let backend = self.collab.backend.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || backend.stop(handle)).await {
                log::error!("Backend stop task failed: {}", e);
            }
            log::info!("Backend session {} stopped ({})", handle, reason);
        }

        self.generator = None;
        self.collab.applier.clear().await;
        self.set_state(TunnelState::Idle).await;

        if was_running {
            self.emit(TunnelEvent::Stopped { reason }).await;
        }
    }

    /// React to a network path change
    pub async fn on_path_update(&mut self, path: NetworkPath) {
        let Some(handle) = self.handle else {
            log::debug!("Ignoring path update without a session: {}", path);
            return;
        };

        log::info!("Network path changed: {}", path);
        self.emit(TunnelEvent::PathChanged(path)).await;

        let endpoints = if self.quirks.refresh_endpoints_on_path_change {
            self.generator
                .as_ref()
                .map(PacketTunnelSettingsGenerator::endpoint_uapi_configuration)
                .filter(|text| !text.is_empty())
        } else {
            None
        };

        let backend = self.collab.backend.clone();
        let task = tokio::task::spawn_blocking(move || {
            let status = endpoints.map(|text| backend.set_config(handle, &text));
            backend.bump_sockets(handle);
            status
        });

        match task.await {
            Ok(Some(status)) if status != 0 => {
                let message = format!("Failed to refresh peer endpoints (status {})", status);
                log::warn!("{}", message);
                self.emit(TunnelEvent::Log {
                    level: LogLevel::Warning,
                    message,
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => log::error!("Path update task failed: {}", e),
        }
    }

    /// Answer an opaque request from the supervising process
    ///
    /// Only [`GET_RUNTIME_CONFIGURATION`] is understood; it returns the
    /// backend's runtime configuration as UTF-8 text.
    pub async fn handle_app_message(&self, message: &[u8]) -> Option<Vec<u8>> {
        let handle = self.handle?;
        if message != GET_RUNTIME_CONFIGURATION {
            log::debug!("Ignoring unknown app message ({} bytes)", message.len());
            return None;
        }

        let backend = self.collab.backend.clone();
        tokio::task::spawn_blocking(move || backend.get_config(handle))
            .await
            .ok()
            .flatten()
            .map(String::into_bytes)
    }

    /// Parsed runtime configuration of the running session
    pub async fn runtime_configuration(&self) -> Result<Option<RuntimeConfig>> {
        let Some(bytes) = self.handle_app_message(GET_RUNTIME_CONFIGURATION).await else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Backend(format!("runtime configuration is not UTF-8: {}", e)))?;
        Ok(Some(RuntimeConfig::parse(&text)?))
    }

    async fn set_state(&mut self, new: TunnelState) {
        let old = self.state;
        if old != new {
            self.state = new;
            log::debug!("Tunnel state {} -> {}", old, new);
            self.emit(TunnelEvent::StateChanged { old, new }).await;
        }
    }

    async fn emit(&self, event: TunnelEvent) {
        if let Some(handler) = &self.collab.event_handler {
            handler.on_event(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::MockApplier;
    use crate::backend::{BackendCall, MockBackend};
    use crate::decoder::DefaultDecoder;
    use crate::notifier::NoopNotifier;
    use crate::path::ManualPathMonitor;

    const CONF: &str = "[Interface]\nPrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\nAddress = 10.0.0.2/32\n\n[Peer]\nPublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\nAllowedIPs = 10.0.0.0/24\nEndpoint = 192.0.2.1:51820\n";

    fn controller(backend: Arc<MockBackend>, quirks: PlatformQuirks) -> TunnelController {
        let collab = Collaborators {
            decoder: Arc::new(DefaultDecoder),
            resolver: EndpointResolver::default(),
            applier: Arc::new(MockApplier::new()),
            path_monitor: Arc::new(ManualPathMonitor::new()),
            backend,
            notifier: Arc::new(NoopNotifier),
            event_handler: None,
        };
        TunnelController::new(collab, quirks, Arc::new(|_| {}))
    }

    fn wifi() -> NetworkPath {
        NetworkPath {
            status: crate::path::PathStatus::Satisfied,
            interfaces: vec!["wlan0".into()],
            gateway: None,
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let backend = Arc::new(MockBackend::new());
        let mut ctl = controller(backend.clone(), PlatformQuirks::default());

        ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
        assert_eq!(ctl.state(), TunnelState::Running);
        assert_eq!(ctl.session().map(SessionHandle::as_raw), Some(0));
        assert_eq!(ctl.peer_count(), 1);

        let err = ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap_err();
        assert!(matches!(err, TunnelError::AlreadyRunning));
        assert_eq!(backend.start_count(), 1);

        ctl.stop(StopReason::UserInitiated).await;
        assert_eq!(ctl.state(), TunnelState::Idle);
        assert_eq!(ctl.session(), None);
        assert_eq!(backend.active_sessions(), 0);

        // Restartable
        ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
        assert_eq!(ctl.session().map(SessionHandle::as_raw), Some(1));
    }

    #[tokio::test]
    async fn test_path_update_refreshes_endpoints() {
        let backend = Arc::new(MockBackend::new());
        let quirks = PlatformQuirks {
            refresh_endpoints_on_path_change: true,
            exit_after_stop: false,
        };
        let mut ctl = controller(backend.clone(), quirks);
        ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
        let handle = ctl.session().unwrap();

        ctl.on_path_update(wifi()).await;

        let calls = backend.calls();
        let tail = &calls[calls.len() - 2..];
        assert!(matches!(
            &tail[0],
            BackendCall::SetConfig(h, text) if *h == handle && text.ends_with("endpoint=192.0.2.1:51820\n")
        ));
        assert_eq!(tail[1], BackendCall::BumpSockets(handle));
    }

    #[tokio::test]
    async fn test_path_update_without_refresh() {
        let backend = Arc::new(MockBackend::new());
        let quirks = PlatformQuirks {
            refresh_endpoints_on_path_change: false,
            exit_after_stop: false,
        };
        let mut ctl = controller(backend.clone(), quirks);

        ctl.on_path_update(wifi()).await;
        assert!(backend.calls().is_empty());

        ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
        ctl.on_path_update(wifi()).await;
        let calls = backend.calls();
        assert!(!calls.iter().any(|c| matches!(c, BackendCall::SetConfig(..))));
        assert!(matches!(calls.last(), Some(BackendCall::BumpSockets(_))));
    }

    #[tokio::test]
    async fn test_runtime_configuration() {
        let backend = Arc::new(MockBackend::new());
        backend.set_runtime_config(
            "listen_port=51820\npublic_key=0202020202020202020202020202020202020202020202020202020202020202\nrx_bytes=10\ntx_bytes=20\n",
        );
        let mut ctl = controller(backend, PlatformQuirks::default());

        assert!(ctl.runtime_configuration().await.unwrap().is_none());

        ctl.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
        let runtime = ctl.runtime_configuration().await.unwrap().unwrap();
        assert_eq!(runtime.listen_port, Some(51820));
        assert_eq!(runtime.rx_bytes(), 10);
        assert_eq!(runtime.tx_bytes(), 20);

        assert_eq!(ctl.handle_app_message(&[0x01]).await, None);
        assert_eq!(ctl.handle_app_message(&[0x00, 0x00]).await, None);
    }
}
