use anyhow::{Context, Result};
use clap::Parser;
use huddle_runtime_config::{apply_fallbacks, RelayConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "huddle-server",
    about = "Real-time relay for huddle chat rooms and WebRTC signaling"
)]
struct Cli {
    /// Path to huddle.toml (defaults to $HUDDLE_CONFIG, then ./huddle.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides config and HUDDLE_BIND
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overrides config and PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli)?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("relay listening on {}", listener.local_addr()?);

    huddle_server::run(listener, config, wait_for_shutdown()).await?;

    info!("relay stopped");
    Ok(())
}

/// Defaults, then the config file, then environment, then flags.
fn load_config(cli: Cli) -> Result<RelayConfig> {
    let path = cli.config.or_else(|| {
        std::env::var("HUDDLE_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    });
    let mut config = RelayConfig::load(path.as_deref()).context("loading configuration")?;
    if let Some(path) = &path {
        info!("configuration loaded from {}", path.display());
    }

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if apply_fallbacks(&mut config) {
        warn!("invalid configuration values replaced with defaults");
    }
    Ok(config)
}

/// Wait for SIGTERM or SIGINT
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            _ => {
                warn!("failed to register signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
        }
        info!("Received Ctrl+C");
    }
}
