//! sysadm API server: entry point.
//!
//! # Usage
//!
//! ```text
//! sysadm-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   TOML config file [default: /usr/local/etc/sysadm/server.toml]
//!   --mode   <MODE>   Transport: wss or tls [default: from config, else wss]
//!   --port   <PORT>   Listening port [default: 12150 for wss, 12151 for tls]
//!   --bind   <ADDR>   Bind address [default: from config, else 0.0.0.0]
//!   --cert   <PATH>   PEM certificate
//!   --key    <PATH>   PEM private key
//! ```
//!
//! Every option can also be set through its `SYSADM_*` environment variable.
//! Command-line values override the config file.
//!
//! Unless `status_interval_secs = 0`, authenticated peers receive a
//! `server-status` event every `status_interval_secs` seconds.
//!
//! The process exits non-zero if the server cannot start (no TLS support, or
//! the port cannot be bound).  Ctrl+C stops the server and exits once every
//! session has closed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sysadm_core::TransportMode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sysadm_server::{
    load_config, spawn_status_feed, EventRelaySession, Server, ServerConfig,
    StaticTokenAuthorizer,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Secure sysadm API server.
#[derive(Debug, Parser)]
#[command(
    name = "sysadm-server",
    about = "TLS WebSocket / raw TLS API server",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(
        long,
        default_value = "/usr/local/etc/sysadm/server.toml",
        env = "SYSADM_CONFIG"
    )]
    config: PathBuf,

    /// Transport: `wss` (TLS WebSocket) or `tls` (raw TLS).
    #[arg(long, env = "SYSADM_MODE")]
    mode: Option<TransportMode>,

    /// Listening port.
    #[arg(long, env = "SYSADM_PORT")]
    port: Option<u16>,

    /// IP address to bind to.
    #[arg(long, env = "SYSADM_BIND")]
    bind: Option<String>,

    /// PEM certificate path.
    #[arg(long, env = "SYSADM_CERT")]
    cert: Option<PathBuf>,

    /// PEM private key path.
    #[arg(long, env = "SYSADM_KEY")]
    key: Option<PathBuf>,
}

impl Cli {
    /// Applies the command-line overrides to `config`.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(cert) = self.cert {
            config.cert_path = cert;
        }
        if let Some(key) = self.key {
            config.key_path = key;
        }
        config
    }
}

/// Where the effective configuration came from.
#[derive(Debug, PartialEq)]
enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

impl ConfigSource {
    fn log(&self) {
        match self {
            Self::File(path) => info!(path = %path.display(), "loaded config file"),
            Self::Defaults(path) => {
                info!(path = %path.display(), "no config file; using defaults")
            }
        }
    }
}

/// Loads the config file named by `cli` and applies the CLI overrides.
fn resolve_config(cli: Cli) -> anyhow::Result<(ServerConfig, ConfigSource)> {
    let path = cli.config.clone();
    let source = if path.exists() {
        ConfigSource::File(path.clone())
    } else {
        ConfigSource::Defaults(path.clone())
    };
    let file_config = load_config(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    Ok((cli.apply(file_config), source))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = resolve_config(Cli::parse())?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    source.log();

    if config.auth_tokens.is_empty() {
        warn!("no auth_tokens configured; every peer will be rejected");
    }
    let authorizer = Arc::new(StaticTokenAuthorizer::new(config.auth_tokens.clone()));

    let port = config.effective_port();
    let mode = config.mode;
    let status_interval = config.status_interval();
    let mut server = Server::new(Arc::new(config), Arc::new(EventRelaySession), authorizer);
    let mut status_task = None;
    if let Some(period) = status_interval {
        let (feed, task) = spawn_status_feed(period);
        server = server.with_event_source(feed);
        status_task = Some(task);
    }

    let addr = server
        .start(port, mode)
        .await
        .context("could not start server - exiting")?;
    info!(%mode, %addr, "sysadm server started");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => warn!(error = %e, "failed to listen for Ctrl+C; shutting down"),
    }

    server.stop().await.context("server did not stop cleanly")?;
    if let Some(task) = status_task {
        task.abort();
    }
    info!("sysadm server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
