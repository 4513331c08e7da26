//! Plugbridge plugin - serves the mock backend over plugbridge IPC.
//!
//! The process binds a TCP port, prints `PLUGIN_ADDR=<addr>` on stdout for
//! the host to read, and serves one fresh backend per host connection until
//! it receives Ctrl-C. Logs go to stderr so they never mix with the
//! handshake line.

use anyhow::{Context as _, Result};
use clap::Parser;
use plugbridge_core::{mock, BackendPlugin, LifecyclePolicy, PluginConfig};
use std::net::{IpAddr, SocketAddr};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plugbridge-plugin")]
#[command(about = "Backend plugin serving the mock logical backend")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = PluginConfig::DEFAULT_HOST)]
    host: IpAddr,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    /// Reject requests until the backend is initialized
    #[arg(long)]
    strict: bool,
}

fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);
    if args.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let policy = if args.strict {
        LifecyclePolicy::Strict
    } else {
        LifecyclePolicy::Lenient
    };
    info!("Starting plugbridge plugin ({:?} lifecycle)", policy);

    let plugin = BackendPlugin::new(mock::factory()).with_policy(policy);
    let handle = plugin
        .serve(SocketAddr::new(args.host, args.port))
        .await
        .context("failed to start plugin server")?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, releasing backends");
    handle.shutdown_and_wait().await;
    info!("All host connections closed, exiting");

    Ok(())
}
