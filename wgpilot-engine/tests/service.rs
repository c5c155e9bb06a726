//! Tests for the serial tunnel service and its control socket

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use wgpilot_engine::backend::BackendCall;
use wgpilot_engine::{
    Collaborators, ControlClient, ControlServer, DefaultDecoder, EndpointResolver, Error,
    LastErrorFile, ManualPathMonitor, MockApplier, MockBackend, NetworkPath, NoopNotifier, PlatformQuirks,
    ProtocolConfiguration, StopReason, TunnelError, TunnelService, TunnelState,
};

const CONF: &str = "[Interface]\n\
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\
Address = 10.8.0.2/24\n\
\n\
[Peer]\n\
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n\
AllowedIPs = 10.8.0.0/24\n\
Endpoint = 192.0.2.1:51820\n";

fn spawn(
    backend: Arc<MockBackend>,
    monitor: ManualPathMonitor,
) -> (wgpilot_engine::TunnelHandle, tokio::task::JoinHandle<()>) {
    let collab = Collaborators {
        decoder: Arc::new(DefaultDecoder),
        resolver: EndpointResolver::default(),
        applier: Arc::new(MockApplier::new()),
        path_monitor: Arc::new(monitor),
        backend,
        notifier: Arc::new(NoopNotifier),
        event_handler: None,
    };
    let quirks = PlatformQuirks {
        refresh_endpoints_on_path_change: true,
        exit_after_stop: false,
    };
    TunnelService::spawn(collab, quirks)
}

#[tokio::test]
async fn test_service_lifecycle() {
    let backend = Arc::new(MockBackend::new());
    let monitor = ManualPathMonitor::new();
    let (tunnel, task) = spawn(backend.clone(), monitor.clone());

    assert_eq!(tunnel.state().await.unwrap(), TunnelState::Idle);

    tunnel
        .start(Some(ProtocolConfiguration::wg_quick(CONF).with_name("office")))
        .await
        .unwrap();
    let status = tunnel.status().await.unwrap();
    assert_eq!(status.state, TunnelState::Running);
    assert_eq!(status.name.as_deref(), Some("office"));
    assert_eq!(status.peers, 1);

    let err = tunnel.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap_err();
    assert!(matches!(err, Error::Tunnel(TunnelError::AlreadyRunning)));

    tunnel.stop(StopReason::UserInitiated).await.unwrap();
    assert_eq!(tunnel.state().await.unwrap(), TunnelState::Idle);
    assert_eq!(backend.active_sessions(), 0);

    drop(tunnel);
    task.await.unwrap();
}

#[tokio::test]
async fn test_path_updates_are_serialized() {
    let backend = Arc::new(MockBackend::new());
    let monitor = ManualPathMonitor::new();
    let (tunnel, _task) = spawn(backend.clone(), monitor.clone());

    tunnel.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
    assert_eq!(monitor.subscribers(), 1);

    // Queued behind nothing; the status request below runs after it
    monitor.emit(NetworkPath::unsatisfied());
    tunnel.status().await.unwrap();

    let calls = backend.calls();
    assert!(matches!(calls[calls.len() - 2], BackendCall::SetConfig(..)));
    assert!(matches!(calls[calls.len() - 1], BackendCall::BumpSockets(_)));

    tunnel.stop(StopReason::UserInitiated).await.unwrap();
    assert_eq!(monitor.subscribers(), 0);

    // After stop the update is dropped by the no-session guard
    let before = backend.calls().len();
    tunnel.path_update(NetworkPath::unsatisfied()).unwrap();
    tunnel.status().await.unwrap();
    assert_eq!(backend.calls().len(), before);
}

#[tokio::test]
async fn test_dropping_handles_stops_tunnel() {
    let backend = Arc::new(MockBackend::new());
    let (tunnel, task) = spawn(backend.clone(), ManualPathMonitor::new());

    tunnel.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();
    assert_eq!(backend.active_sessions(), 1);

    drop(tunnel);
    task.await.unwrap();
    assert_eq!(backend.active_sessions(), 0);
}

#[tokio::test]
async fn test_failed_start_cleanup_keeps_error_file() {
    let dir = tempfile::tempdir().unwrap();
    let error_file = dir.path().join("last-error");

    let collab = Collaborators {
        decoder: Arc::new(DefaultDecoder),
        resolver: EndpointResolver::default(),
        applier: Arc::new(MockApplier::new()),
        path_monitor: Arc::new(ManualPathMonitor::new()),
        backend: Arc::new(MockBackend::failing_start(-2)),
        notifier: Arc::new(LastErrorFile::new(&error_file)),
        event_handler: None,
    };
    // Exit-after-stop must not swallow a start failure
    let quirks = PlatformQuirks {
        refresh_endpoints_on_path_change: false,
        exit_after_stop: true,
    };
    let (tunnel, _task) = TunnelService::spawn(collab, quirks);

    let err = tunnel.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap_err();
    assert!(matches!(err, Error::Tunnel(TunnelError::StartWireGuardBackend(-2))));
    assert!(error_file.exists());

    // Same cleanup `wgpilot up` performs after a failed start
    tunnel.stop(StopReason::StartFailed).await.unwrap();
    assert_eq!(tunnel.state().await.unwrap(), TunnelState::Idle);

    let (title, _) = LastErrorFile::read(&error_file).unwrap().unwrap();
    assert_eq!(title, "Backend failure");
}

#[tokio::test]
async fn test_control_socket() {
    let backend = Arc::new(MockBackend::new());
    backend.set_runtime_config(
        "listen_port=51820\n\
         public_key=c53201039adba14be71f886da1d8dbe9eebded08cb111b75340078999aa9f038\n\
         endpoint=192.0.2.1:51820\nrx_bytes=10\ntx_bytes=20\nallowed_ip=10.8.0.0/24\n",
    );
    let (tunnel, _task) = spawn(backend, ManualPathMonitor::new());

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("wgpilot.sock");
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let server = ControlServer::new(&socket, "wg0", tunnel.clone(), shutdown_tx);
    tokio::spawn(async move {
        let _ = server.start().await;
    });

    // Wait for the socket to appear
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let client = ControlClient::new(&socket);

    let status = client.status().await.unwrap();
    assert_eq!(status.state, TunnelState::Idle);
    assert_eq!(status.interface, "wg0");
    assert!(status.peers.is_empty());
    assert_eq!(client.runtime_config_text().await.unwrap(), None);

    tunnel.start(Some(ProtocolConfiguration::wg_quick(CONF))).await.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.state, TunnelState::Running);
    assert_eq!(status.session, Some(0));
    assert_eq!(status.listen_port, Some(51820));
    assert_eq!(status.bytes_tx, 20);
    assert_eq!(status.peers.len(), 1);
    assert_eq!(
        status.peers[0].public_key,
        "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
    );

    let text = client.runtime_config_text().await.unwrap().unwrap();
    assert!(text.starts_with("listen_port=51820\n"));
    assert_eq!(client.app_message(vec![1, 2, 3]).await.unwrap(), None);

    client.shutdown().await.unwrap();
    shutdown_rx.recv().await.unwrap();
}
