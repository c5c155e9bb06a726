//! Serial command queue around the controller
//!
//! A single task owns the [`TunnelController`] and runs commands one at a
//! time in arrival order. Start, stop, opaque requests and path updates
//! all travel through the same channel, so a path update can never
//! interleave with a start or stop in progress.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use wg_protocol::RuntimeConfig;

use crate::backend::SessionHandle;
use crate::controller::{Collaborators, PlatformQuirks, TunnelController};
use crate::decoder::ProtocolConfiguration;
use crate::error::{Error, Result, TunnelError};
use crate::event::{StopReason, TunnelState};
use crate::path::{NetworkPath, PathSink};

/// Snapshot of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub session: Option<SessionHandle>,
    pub name: Option<String>,
    pub peers: usize,
}

/// Work items for the service task
#[derive(Debug)]
pub enum Command {
    Start {
        protocol: Option<ProtocolConfiguration>,
        reply: oneshot::Sender<std::result::Result<(), TunnelError>>,
    },
    Stop {
        reason: StopReason,
        reply: oneshot::Sender<()>,
    },
    PathUpdate(NetworkPath),
    AppMessage {
        message: Vec<u8>,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    Status {
        reply: oneshot::Sender<TunnelStatus>,
    },
    RuntimeConfiguration {
        reply: oneshot::Sender<Result<Option<RuntimeConfig>>>,
    },
}

/// The service task
pub struct TunnelService {
    controller: TunnelController,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl TunnelService {
    /// Spawn the service on the current runtime
    ///
    /// The task runs until every [`TunnelHandle`] is dropped, then stops the
    /// tunnel and exits.
    pub fn spawn(collab: Collaborators, quirks: PlatformQuirks) -> (TunnelHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        // Weak so that the path monitor alone does not keep the service alive
        let weak = tx.downgrade();
        let path_sink: PathSink = Arc::new(move |path| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::PathUpdate(path));
            }
        });

        let service = TunnelService {
            controller: TunnelController::new(collab, quirks, path_sink),
            commands: rx,
        };
        let task = tokio::spawn(service.run());

        (TunnelHandle { tx }, task)
    }

    async fn run(mut self) {
        log::debug!("Tunnel service started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }

        log::debug!("All tunnel handles dropped, shutting down");
        self.controller.stop(StopReason::ServiceShutdown).await;
    }

    async fn handle(&mut self, command: Command) {
        let ctl = &mut self.controller;
        match command {
            Command::Start { protocol, reply } => {
                let result = ctl.start(protocol).await;
                let _ = reply.send(result);
            }
            Command::Stop { reason, reply } => {
                ctl.stop(reason).await;
                let _ = reply.send(());
                if ctl.quirks().exit_after_stop && reason != StopReason::StartFailed {
                    log::info!("Tunnel stopped, exiting");
                    std::process::exit(0);
                }
            }
            Command::PathUpdate(path) => ctl.on_path_update(path).await,
            Command::AppMessage { message, reply } => {
                let response = ctl.handle_app_message(&message).await;
                let _ = reply.send(response);
            }
            Command::Status { reply } => {
                let _ = reply.send(TunnelStatus {
                    state: ctl.state(),
                    session: ctl.session(),
                    name: ctl.tunnel_name().map(str::to_string),
                    peers: ctl.peer_count(),
                });
            }
            Command::RuntimeConfiguration { reply } => {
                let _ = reply.send(ctl.runtime_configuration().await);
            }
        }
    }
}

/// Cloneable handle to a [`TunnelService`]
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TunnelHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Bring the tunnel up
    pub async fn start(&self, protocol: Option<ProtocolConfiguration>) -> Result<()> {
        self.request(|reply| Command::Start { protocol, reply })
            .await?
            .map_err(Error::from)
    }

    /// Tear the tunnel down
    pub async fn stop(&self, reason: StopReason) -> Result<()> {
        self.request(|reply| Command::Stop { reason, reply }).await
    }

    /// Send an opaque request
    pub async fn app_message(&self, message: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.request(|reply| Command::AppMessage { message, reply }).await
    }

    pub async fn state(&self) -> Result<TunnelState> {
        Ok(self.status().await?.state)
    }

    pub async fn status(&self) -> Result<TunnelStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Parsed runtime configuration of the running session
    pub async fn runtime_configuration(&self) -> Result<Option<RuntimeConfig>> {
        self.request(|reply| Command::RuntimeConfiguration { reply })
            .await?
    }

    /// Queue a path update without waiting for it to be handled
    pub fn path_update(&self, path: NetworkPath) -> Result<()> {
        self.tx
            .send(Command::PathUpdate(path))
            .map_err(|_| Error::Shutdown)
    }

    /// Check if the service task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
