//! Rattle demo server: entry point.
//!
//! Serves the demo controllers (see `controllers.rs`) over WebSocket so the
//! browser client can exercise every part of the protocol: plain requests,
//! JSON payloads, server pushes and chunked file uploads.
//!
//! # Usage
//!
//! ```text
//! rattle-server [OPTIONS]
//!
//! Options:
//!   --config <FILE>     TOML config file
//!   --bind <ADDR>       Listen address            [default: 127.0.0.1:8080]
//!   --ws-path <PATH>    WebSocket endpoint path   [default: /ws]
//!   --upload-dir <DIR>  Where Main.File saves uploads [default: .]
//!   --report-errors     Answer dropped frames with Rattle.Error
//!   --debug             Log at debug level unless RUST_LOG says otherwise
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Flag              |
//! |------------------------|-------------------|
//! | `RATTLE_CONFIG`        | `--config`        |
//! | `RATTLE_BIND`          | `--bind`          |
//! | `RATTLE_WS_PATH`       | `--ws-path`       |
//! | `RATTLE_UPLOAD_DIR`    | `--upload-dir`    |
//! | `RATTLE_REPORT_ERRORS` | `--report-errors` |
//! | `RATTLE_DEBUG`         | `--debug`         |
//!
//! Precedence: flag, then environment, then config file, then built-in
//! defaults.

mod controllers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rattle_server::domain::ServerConfig;
use rattle_server::infrastructure::{RattleServer, WsAcceptor};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Rattle bidirectional RPC demo server.
#[derive(Debug, Parser)]
#[command(name = "rattle-server", about = "Bidirectional RPC over WebSocket", version)]
struct Cli {
    /// TOML config file; flags below override its values.
    #[arg(long, env = "RATTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. `0.0.0.0:8080`.
    #[arg(long, env = "RATTLE_BIND")]
    bind: Option<SocketAddr>,

    /// HTTP path of the WebSocket endpoint.  Pass an empty string to accept
    /// upgrades on any path.
    #[arg(long, env = "RATTLE_WS_PATH")]
    ws_path: Option<String>,

    /// Directory `Main.File` writes uploads into.
    #[arg(long, default_value = ".", env = "RATTLE_UPLOAD_DIR")]
    upload_dir: PathBuf,

    /// Answer frames that fail to parse, resolve or decode with a
    /// `Rattle.Error` frame instead of dropping them silently.
    #[arg(long, env = "RATTLE_REPORT_ERRORS")]
    report_errors: bool,

    /// Log at debug level (unless `RUST_LOG` is set).
    #[arg(long, env = "RATTLE_DEBUG")]
    debug: bool,
}

impl Cli {
    /// Builds the effective [`ServerConfig`]: config file (or defaults) with
    /// the CLI overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or the
    /// result is invalid.
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(ws_path) = &self.ws_path {
            config.ws_path = ws_path.clone();
        }
        if self.report_errors {
            config.report_errors = true;
        }
        if self.debug {
            config.debug = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged with the config file.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over `--debug`.
/// 3. The demo controllers and connection hooks are registered.
/// 4. The WebSocket listener is bound.
/// 5. A Ctrl+C handler clears a shared `AtomicBool`; the server notices
///    within 200 ms and closes every connection.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.server_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!(
        "Rattle demo server starting: bind={}, ws_path={:?}, upload_dir={}",
        config.bind_addr,
        config.ws_path,
        cli.upload_dir.display()
    );

    // ── Controllers and hooks ─────────────────────────────────────────────────
    let mut server = RattleServer::new(config.clone());
    controllers::register(&mut server, cli.upload_dir.clone());
    server
        .on_connect(|conn| async move {
            info!("client connected: {} ({})", conn.id(), conn.peer());
        })
        .on_disconnect(|conn| async move {
            info!("client disconnected: {} ({})", conn.id(), conn.peer());
        });

    let acceptor = WsAcceptor::bind(&config).await?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    server
        .serve_until(acceptor, running)
        .await
        .context("WebSocket acceptor failed")?;

    info!("Rattle demo server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
