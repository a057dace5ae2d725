// SPDX-License-Identifier: MIT

//! `anytun-controld` — serves a static connection/route configuration
//! to any number of `anytun` data-plane daemons over the sync
//! protocol. Unlike `anytun` itself, this binary never touches a
//! TUN/TAP device or a packet; it is pure control plane.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use anytun_core::sync::SyncServer;

mod config;
mod server;

use config::ControldConfig;

/// Static control-plane server for a group of anytun peers.
#[derive(Parser, Debug)]
#[command(name = "anytun-controld", author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file's bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// TCP port, overrides the config file's port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short = 'U', long = "debug")]
    debug: bool,
}

fn init_logging(debug: bool) {
    env_logger::Builder::new()
        .filter_level(if debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let mut config = match &args.config {
        Some(path) => ControldConfig::from_file(path).map_err(|e| anyhow::anyhow!(e))?,
        None => ControldConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_address = bind.parse().context("invalid --bind address")?;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let bind_addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .context("invalid bind address/port")?;

    log::info!(
        "anytun-controld serving {} connections, {} routes on {bind_addr}",
        config.connections.len(),
        config.routes.len()
    );

    let sync_server = Arc::new(SyncServer::new());
    let run_server = sync_server.clone();
    let snapshot_config = Arc::new(config);
    let run_handle = tokio::spawn(async move {
        let snapshot = move || server::build_snapshot(&snapshot_config);
        if let Err(e) = run_server.run(bind_addr, snapshot).await {
            log::error!("sync listener failed: {e}");
        }
    });

    tokio::signal::ctrl_c().await.ok();
    log::info!("shutdown signal received");
    sync_server.shutdown();
    let _ = run_handle.await;

    Ok(())
}
