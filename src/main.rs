//! Unblocking web proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                   UNBLOCK PROXY                       │
//!                     │                                                       │
//!   GET /<target>     │  ┌─────────┐   ┌─────────┐   ┌─────────┐              │
//!   ──────────────────┼─▶│  http   │──▶│  codec  │──▶│  cache  │── hit ──┐    │
//!                     │  │ handler │   │ decode  │   │ mem/disk│         │    │
//!                     │  └─────────┘   └─────────┘   └────┬────┘         │    │
//!                     │                                   │ miss         │    │
//!                     │                                   ▼              │    │
//!                     │                             ┌──────────┐         │    │    Target
//!                     │                             │ upstream │◀────────┼────┼──── site
//!                     │                             │  fetch   │         │    │
//!                     │                             └────┬─────┘         │    │
//!                     │                                  ▼               │    │
//!   rewritten body    │                             ┌──────────┐         │    │
//!   ◀─────────────────┼─────────────────────────────│ rewrite  │◀────────┘    │
//!                     │                             └──────────┘              │
//!                     │                                                       │
//!                     │  config · observability · lifecycle (signals, drain)  │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use unblock_proxy::config::{loader, ProxyConfig};
use unblock_proxy::lifecycle::{signals, Shutdown};
use unblock_proxy::observability::{logging, metrics};
use unblock_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "unblock-proxy")]
#[command(about = "Web proxy that rewrites pages to keep browsing through it", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "UNBLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port, keeping the configured host.
    #[arg(short, long)]
    port: Option<u16>,

    /// Disk cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Directory holding the landing page and static files.
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl Cli {
    /// File, then environment, then flags; validated last.
    fn load(&self) -> Result<ProxyConfig, loader::ConfigError> {
        let mut config = match &self.config {
            Some(path) => loader::read_config(path)?,
            None => ProxyConfig::default(),
        };
        loader::apply_env_overrides(&mut config)?;

        if let Some(port) = self.port {
            config.listener.set_port(port);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.disk.directory = dir.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.shell.static_dir = Some(dir.clone());
        }
        loader::finalize(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "unblock-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_concurrent_requests = config.listener.max_concurrent_requests,
        memory_cache = config.cache.memory.enabled,
        disk_cache = config.cache.disk.enabled,
        cache_dir = %config.cache.disk.directory.display(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config).await?;

    let shutdown = std::sync::Arc::new(Shutdown::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        trigger.trigger();
    });

    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
