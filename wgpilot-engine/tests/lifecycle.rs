//! Lifecycle tests driving the controller through test doubles
//!
//! These tests cover:
//! - Failure at every start step is notified exactly once and leaves Idle
//! - DNS failure never reaches the backend
//! - Stop is idempotent and safe before any start
//! - Path updates and opaque requests are no-ops without a session
//! - Resolved literals (never hostnames) reach the backend
//! - State change events

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use wgpilot_engine::backend::BackendCall;
use wgpilot_engine::{
    Collaborators, DefaultDecoder, EndpointResolver, ErrorNotifier, EventHandler, HostResolver,
    ManualPathMonitor, MockApplier, MockBackend, NetworkPath, PathStatus, PlatformQuirks,
    ProtocolConfiguration, StopReason, TunnelController, TunnelError, TunnelEvent, TunnelState,
};

const PRIVATE: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
const PUBLIC: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

fn wg_quick(endpoint: &str) -> ProtocolConfiguration {
    ProtocolConfiguration::wg_quick(format!(
        "[Interface]\nPrivateKey = {PRIVATE}\nAddress = 10.8.0.2/24\n\n\
         [Peer]\nPublicKey = {PUBLIC}\nAllowedIPs = 0.0.0.0/0\nEndpoint = {endpoint}\n"
    ))
}

#[derive(Default)]
struct CountingNotifier {
    notified: Mutex<Vec<String>>,
    removed: Mutex<usize>,
}

impl CountingNotifier {
    fn titles(&self) -> Vec<String> {
        self.notified.lock().unwrap().clone()
    }
}

impl ErrorNotifier for CountingNotifier {
    fn notify(&self, error: &TunnelError) {
        self.notified.lock().unwrap().push(error.title().to_string());
    }

    fn remove_last_error_file(&self) {
        *self.removed.lock().unwrap() += 1;
    }
}

#[derive(Default)]
struct StaticResolver {
    table: HashMap<String, IpAddr>,
}

impl HostResolver for StaticResolver {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.table
            .get(host)
            .map(|ip| vec![*ip])
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
    }
}

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<TunnelEvent>>,
}

#[async_trait::async_trait]
impl EventHandler for RecordingHandler {
    async fn on_event(&self, event: TunnelEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    controller: TunnelController,
    backend: Arc<MockBackend>,
    applier: Arc<MockApplier>,
    notifier: Arc<CountingNotifier>,
    monitor: ManualPathMonitor,
    events: Arc<RecordingHandler>,
}

fn harness_with(backend: MockBackend, applier: MockApplier) -> Harness {
    let backend = Arc::new(backend);
    let applier = Arc::new(applier);
    let notifier = Arc::new(CountingNotifier::default());
    let monitor = ManualPathMonitor::new();
    let events = Arc::new(RecordingHandler::default());

    let mut table = HashMap::new();
    table.insert("example.com".to_string(), "93.184.216.34".parse().unwrap());

    let collab = Collaborators {
        decoder: Arc::new(DefaultDecoder),
        resolver: EndpointResolver::new(Arc::new(StaticResolver { table })),
        applier: applier.clone(),
        path_monitor: Arc::new(monitor.clone()),
        backend: backend.clone(),
        notifier: notifier.clone(),
        event_handler: Some(events.clone()),
    };
    let quirks = PlatformQuirks {
        refresh_endpoints_on_path_change: false,
        exit_after_stop: false,
    };

    Harness {
        controller: TunnelController::new(collab, quirks, Arc::new(|_| {})),
        backend,
        applier,
        notifier,
        monitor,
        events,
    }
}

fn harness() -> Harness {
    harness_with(MockBackend::new(), MockApplier::new())
}

fn wifi() -> NetworkPath {
    NetworkPath {
        status: PathStatus::Satisfied,
        interfaces: vec!["wlan0".into()],
        gateway: Some("192.168.1.1".parse().unwrap()),
    }
}

#[tokio::test]
async fn test_start_resolves_hostnames_for_backend() {
    let mut h = harness();

    h.controller.start(Some(wg_quick("example.com:51820"))).await.unwrap();
    assert_eq!(h.controller.state(), TunnelState::Running);
    assert!(h.notifier.titles().is_empty());

    let calls = h.backend.calls();
    let BackendCall::Start { config, tun_fd } = &calls[0] else {
        panic!("expected start, got {:?}", calls[0]);
    };
    assert_eq!(*tun_fd, 42);
    assert!(config.contains("endpoint=93.184.216.34:51820\n"));
    assert!(!config.contains("example.com"));

    // Endpoint of a default-route tunnel bypasses the tunnel
    let settings = &h.applier.applied()[0];
    assert_eq!(settings.excluded_routes(), vec!["93.184.216.34/32".parse().unwrap()]);
    assert_eq!(h.monitor.subscribers(), 1);
}

#[tokio::test]
async fn test_dns_failure_never_starts_backend() {
    let mut h = harness();

    let err = h
        .controller
        .start(Some(wg_quick("unresolvable.invalid:51820")))
        .await
        .unwrap_err();

    assert!(matches!(err, TunnelError::DnsResolution));
    assert_eq!(h.controller.session(), None);
    assert_eq!(h.controller.state(), TunnelState::Idle);
    assert_eq!(h.backend.start_count(), 0);
    assert!(h.applier.applied().is_empty());
    assert_eq!(h.notifier.titles(), vec!["DNS resolution failure".to_string()]);
}

#[tokio::test]
async fn test_missing_configuration() {
    let mut h = harness();

    let err = h.controller.start(None).await.unwrap_err();
    assert!(matches!(err, TunnelError::MissingProtocolConfiguration));
    assert_eq!(h.notifier.titles().len(), 1);
}

#[tokio::test]
async fn test_decode_failure() {
    let mut h = harness();

    let err = h
        .controller
        .start(Some(ProtocolConfiguration::wg_quick("[Interface]\n")))
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::DecodeTunnelConfiguration(_)));
    assert_eq!(h.notifier.titles(), vec!["Invalid configuration".to_string()]);
}

#[tokio::test]
async fn test_apply_failure_skips_backend() {
    let mut h = harness_with(MockBackend::new(), MockApplier::failing());

    let err = h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap_err();
    assert!(matches!(err, TunnelError::SetNetworkSettings(_)));
    assert_eq!(h.backend.start_count(), 0);
    assert_eq!(h.notifier.titles().len(), 1);
    assert_eq!(h.monitor.subscribers(), 0);
}

#[tokio::test]
async fn test_missing_descriptor_skips_backend() {
    let mut h = harness_with(MockBackend::new(), MockApplier::without_fd());

    let err = h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap_err();
    assert!(matches!(err, TunnelError::TunnelDeviceFileDescriptor));
    assert_eq!(h.backend.start_count(), 0);
    assert_eq!(h.notifier.titles().len(), 1);
}

#[tokio::test]
async fn test_backend_failure() {
    let mut h = harness_with(MockBackend::failing_start(-2), MockApplier::new());

    let err = h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap_err();
    assert!(matches!(err, TunnelError::StartWireGuardBackend(-2)));
    assert_eq!(h.controller.session(), None);
    assert_eq!(h.controller.state(), TunnelState::Idle);
    assert_eq!(h.notifier.titles(), vec!["Backend failure".to_string()]);

    // The caller cleans up; stop after a failed start is safe
    h.controller.stop(StopReason::StartFailed).await;
    assert_eq!(h.applier.clear_count(), 1);

    // The failure stays on record for the supervising process
    assert_eq!(*h.notifier.removed.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_already_running_is_not_notified() {
    let mut h = harness();

    h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap();
    let err = h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap_err();

    assert!(matches!(err, TunnelError::AlreadyRunning));
    assert!(h.notifier.titles().is_empty());
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = harness();

    // Before any start
    h.controller.stop(StopReason::UserInitiated).await;
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.controller.state(), TunnelState::Idle);

    h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap();
    let handle = h.controller.session().unwrap();

    h.controller.stop(StopReason::UserInitiated).await;
    h.controller.stop(StopReason::UserInitiated).await;

    let stops: Vec<_> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::Stop(_)))
        .collect();
    assert_eq!(stops, vec![BackendCall::Stop(handle)]);
    assert_eq!(h.monitor.subscribers(), 0);
    assert_eq!(*h.notifier.removed.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_guards_without_session() {
    let mut h = harness();

    h.controller.on_path_update(wifi()).await;
    assert_eq!(h.controller.handle_app_message(&[0x00]).await, None);
    assert!(h.backend.calls().is_empty());

    h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap();
    h.controller.stop(StopReason::UserInitiated).await;
    let calls_after_stop = h.backend.calls().len();

    h.controller.on_path_update(wifi()).await;
    assert_eq!(h.controller.handle_app_message(&[0x00]).await, None);
    assert_eq!(h.backend.calls().len(), calls_after_stop);
}

#[tokio::test]
async fn test_app_message_returns_config_text() {
    let mut h = harness();
    h.backend.set_runtime_config("listen_port=51820\n");

    h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap();

    assert_eq!(
        h.controller.handle_app_message(&[0x00]).await,
        Some(b"listen_port=51820\n".to_vec())
    );
    assert_eq!(h.controller.handle_app_message(b"status").await, None);
}

#[tokio::test]
async fn test_state_events() {
    let mut h = harness();

    h.controller.start(Some(wg_quick("192.0.2.1:51820"))).await.unwrap();
    h.controller.stop(StopReason::UserInitiated).await;

    let transitions: Vec<(TunnelState, TunnelState)> = h
        .events
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            TunnelEvent::StateChanged { old, new } => Some((*old, *new)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            (TunnelState::Idle, TunnelState::Starting),
            (TunnelState::Starting, TunnelState::Running),
            (TunnelState::Running, TunnelState::Stopping),
            (TunnelState::Stopping, TunnelState::Idle),
        ]
    );
}
