//! wgpilot CLI
//!
//! Runs a WireGuard tunnel through the userspace backend and talks to a
//! running instance over its control socket.

mod show;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgpilot_engine::{
    enable_roaming, wg_quick, Collaborators, Config, ConfigDecoder, ControlClient, ControlServer,
    DefaultDecoder, EndpointResolver, ErrorNotifier, LastErrorFile, LoggingEventHandler,
    NoopNotifier, ProtocolConfiguration, RouteChangeMonitor, ServiceConfig, StopReason,
    TunApplier, TunnelConfiguration, TunnelService, UserspaceBackend, DEFAULT_SOCKET_PATH,
};

/// wgpilot - WireGuard tunnel lifecycle manager
#[derive(Parser)]
#[command(name = "wgpilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring a tunnel up and keep it running until interrupted
    Up {
        /// TOML configuration, or a wg-quick `.conf` file
        #[arg(short, long, default_value = "wgpilot.toml")]
        config: PathBuf,
    },

    /// Ask a running instance to bring its tunnel down
    Down {
        /// Control socket of the running instance
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },

    /// Show the state of a running instance
    Show {
        /// Control socket of the running instance
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,

        /// Print the backend's raw runtime configuration instead
        #[arg(long)]
        raw: bool,
    },

    /// Resolve a configuration's peer endpoints the way `up` would
    Resolve {
        /// TOML configuration, or a wg-quick `.conf` file
        config: PathBuf,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "wgpilot.toml")]
        output: PathBuf,
    },

    /// Convert a tunnel between TOML and wg-quick formats
    Convert {
        /// Input file; `.conf` is read as wg-quick, anything else as TOML
        input: PathBuf,

        /// Output format (default: the other one)
        #[arg(short, long, value_enum)]
        to: Option<Format>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Toml,
    WgQuick,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `up` initializes logging once its config file supplies the level
    if !matches!(cli.command, Commands::Up { .. }) {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
    }

    match cli.command {
        Commands::Up { config } => run_up(config, cli.log_level).await,
        Commands::Down { socket } => run_down(socket).await,
        Commands::Show { socket, raw } => run_show(socket, raw).await,
        Commands::Resolve { config } => run_resolve(config).await,
        Commands::GenConfig { output } => generate_config(output),
        Commands::Convert { input, to, output } => convert(input, to, output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_up(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let service = load_service(&config_path)?;
    let level = log_level.unwrap_or_else(|| service.log_level.clone());
    init_logging(&level);

    info!("Starting wgpilot on {}...", service.interface_name);
    info!("Configuration loaded from {:?}", config_path);

    if !enable_roaming(service.roaming) {
        warn!("Roaming was already configured for this process");
    }

    let notifier: Arc<dyn ErrorNotifier> = match &service.last_error_file {
        Some(path) => Arc::new(LastErrorFile::new(path)),
        None => Arc::new(NoopNotifier),
    };

    let collab = Collaborators {
        decoder: Arc::new(DefaultDecoder),
        resolver: EndpointResolver::default(),
        applier: Arc::new(TunApplier::new(&service.interface_name)),
        path_monitor: Arc::new(RouteChangeMonitor::new()),
        backend: Arc::new(UserspaceBackend::from_service(&service).with_log_level(&level)),
        notifier,
        event_handler: Some(Arc::new(LoggingEventHandler)),
    };

    let (tunnel, service_task) = TunnelService::spawn(collab, service.quirks());

    // Control socket, served until we exit
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let socket_path = service
        .control_socket
        .clone()
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());
    let control = ControlServer::new(
        &socket_path,
        &service.interface_name,
        tunnel.clone(),
        shutdown_tx,
    );
    let control_task = tokio::spawn(async move {
        if let Err(e) = control.start().await {
            error!("Control server error: {}", e);
        }
    });

    let protocol = ProtocolConfiguration::file(&config_path);
    if let Err(e) = tunnel.start(Some(protocol)).await {
        let _ = tunnel.stop(StopReason::StartFailed).await;
        control_task.abort();
        return Err(e).context("Failed to start tunnel");
    }

    let reason = tokio::select! {
        result = wait_for_shutdown() => {
            result?;
            StopReason::Signal
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested over control socket");
            StopReason::ControlRequest
        }
    };

    info!("Shutting down tunnel...");

    if let Err(e) = tunnel.stop(reason).await {
        warn!("Stop failed: {}", e);
    }

    control_task.abort();
    drop(tunnel);

    // Wait for the service to finish (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), service_task).await;

    Ok(())
}

async fn run_down(socket: PathBuf) -> Result<()> {
    ControlClient::new(&socket)
        .shutdown()
        .await
        .with_context(|| format!("Failed to reach wgpilot at {:?}", socket))?;

    println!("Shutdown requested.");
    Ok(())
}

async fn run_show(socket: PathBuf, raw: bool) -> Result<()> {
    let client = ControlClient::new(&socket);

    if raw {
        let text = client
            .runtime_config_text()
            .await
            .with_context(|| format!("Failed to reach wgpilot at {:?}", socket))?;
        match text {
            Some(text) => print!("{}", text),
            None => bail!("Tunnel is not running"),
        }
        return Ok(());
    }

    let status = client
        .status()
        .await
        .with_context(|| format!("Failed to reach wgpilot at {:?}", socket))?;
    print!("{}", show::render_status(&status));

    Ok(())
}

async fn run_resolve(config_path: PathBuf) -> Result<()> {
    let tunnel = load_tunnel(&config_path)?;
    let endpoints = tunnel.endpoints();

    let lookup = endpoints.clone();
    let resolved = tokio::task::spawn_blocking(move || EndpointResolver::default().resolve_sync(&lookup))
        .await
        .context("Resolver task failed")?;

    let Some(resolved) = resolved else {
        bail!("DNS resolution failed for one or more endpoints");
    };

    for ((peer, endpoint), resolved) in tunnel.peers.iter().zip(&endpoints).zip(&resolved) {
        match (endpoint, resolved) {
            (Some(endpoint), Some(resolved)) if endpoint != resolved => {
                println!("{}  {} -> {}", peer.public_key, endpoint, resolved)
            }
            (Some(endpoint), _) => println!("{}  {}", peer.public_key, endpoint),
            (None, _) => println!("{}  (no endpoint)", peer.public_key),
        }
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the configuration file and set your keys and endpoint before running.");

    Ok(())
}

fn convert(input: PathBuf, to: Option<Format>, output: Option<PathBuf>) -> Result<()> {
    let tunnel = load_tunnel(&input)?;

    let format = to.unwrap_or(if is_wg_quick(&input) {
        Format::Toml
    } else {
        Format::WgQuick
    });

    let text = match format {
        Format::Toml => tunnel.to_toml().context("Failed to encode TOML")?,
        Format::WgQuick => wg_quick::format(&tunnel),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("Converted {:?} to {:?}", input, path);
        }
        None => print!("{}", text),
    }

    Ok(())
}

fn is_wg_quick(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "conf")
}

/// Service settings for `up`: from the `[service]` section of a TOML file,
/// or the defaults when running a wg-quick file
fn load_service(path: &Path) -> Result<ServiceConfig> {
    if is_wg_quick(path) {
        // Still decode it so configuration errors surface before any setup
        load_tunnel(path)?;
        return Ok(ServiceConfig::default());
    }

    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    Ok(config.service)
}

fn load_tunnel(path: &Path) -> Result<TunnelConfiguration> {
    DefaultDecoder
        .decode(&ProtocolConfiguration::file(path))
        .with_context(|| format!("Failed to load tunnel from {:?}", path))
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("Failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
