use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use beach_commands_server::{
    builtin::register_builtins,
    routes::{self, AppState},
    telemetry::Telemetry,
    CommandRegistry, DiscoveryItems, Dispatcher, SessionConfig,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct ServerConfig {
    listen_addr: SocketAddr,
    owner: String,
    session: SessionConfig,
    shutdown_grace: Duration,
    requester_header: Option<HeaderName>,
}

#[derive(Debug, Parser)]
#[command(
    name = "beach-commands-server",
    author,
    version,
    about = "Beach ad-hoc command server"
)]
struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(
        long,
        env = "BEACH_COMMANDS_LISTEN_ADDR",
        default_value = "127.0.0.1:9450"
    )]
    listen_addr: String,

    /// Identity reported as the owner of the advertised commands.
    #[arg(
        long,
        env = "BEACH_COMMANDS_OWNER",
        default_value = "beach-commands@localhost"
    )]
    owner: String,

    /// Seconds after which an idle session is answered with session-expired.
    #[arg(long, env = "BEACH_COMMANDS_SESSION_TIMEOUT_SECS", default_value_t = 120)]
    session_timeout_secs: u64,

    /// How often the sweeper scans for abandoned sessions.
    #[arg(long, env = "BEACH_COMMANDS_SWEEP_INTERVAL_MS", default_value_t = 1000)]
    sweep_interval_ms: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_COMMANDS_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    shutdown_grace_secs: u64,

    /// Header carrying the authenticated requester, set by a fronting proxy.
    #[arg(long, env = "BEACH_COMMANDS_REQUESTER_HEADER")]
    requester_header: Option<String>,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        let session = SessionConfig::default()
            .with_session_timeout(Duration::from_secs(cli.session_timeout_secs))
            .with_sweep_interval(Duration::from_millis(cli.sweep_interval_ms));
        session
            .validate()
            .context("invalid session configuration")?;
        let requester_header = cli
            .requester_header
            .as_deref()
            .map(|raw| {
                HeaderName::from_bytes(raw.as_bytes())
                    .with_context(|| format!("invalid requester header: {raw}"))
            })
            .transpose()?;
        Ok(ServerConfig {
            listen_addr,
            owner: cli.owner,
            session,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            requester_header,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        owner = %config.owner,
        session_timeout_secs = config.session.session_timeout.as_secs(),
        "starting beach-commands server"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let discovery = Arc::new(DiscoveryItems::new(config.owner.clone()));
    let registry = CommandRegistry::with_advertiser(discovery.clone());
    register_builtins(&registry);
    let dispatcher = Dispatcher::new(registry, config.session.clone())
        .context("failed to build command dispatcher")?;

    let mut state = AppState::new(dispatcher.clone(), discovery).with_metrics(metrics);
    match config.requester_header.clone() {
        Some(header) => {
            info!(header = %header, "requester identity taken from header");
            state = state.with_requester_header(header);
        }
        None => warn!("no requester header configured; permission checks trust the request body"),
    }
    let router = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;

    info!("beach-commands listening on {}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    dispatcher.shutdown().await;
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
