//! hlmd - local Hyperliquid market-data daemon.

use anyhow::{bail, Result};
use clap::Parser;
use hlmd_daemon::{Daemon, DaemonConfig, Network};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Local Hyperliquid market-data daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "HLMD_CONFIG")]
    config: Option<PathBuf>,

    /// Exchange network (overrides the config file)
    #[arg(short, long, value_enum)]
    network: Option<Network>,

    /// Home directory for socket, PID file and logs (overrides the config file)
    #[arg(long)]
    home: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made.
    hlmd_ws::init_crypto();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(network) = args.network {
        config.network = network;
    }
    if let Some(home) = args.home {
        config.home_dir = Some(home);
    }

    hlmd_telemetry::init_logging(&config.log_config())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        network = %config.network,
        "Starting hlmd"
    );

    let shutdown = CancellationToken::new();
    let panicked = install_panic_hook(shutdown.clone());
    spawn_signal_handler(shutdown.clone())?;

    let daemon = Daemon::start(config, shutdown).await?;
    daemon.run().await?;

    if panicked.load(Ordering::SeqCst) {
        bail!("daemon stopped after a panic");
    }
    Ok(())
}

/// Any panic logs and triggers the ordered shutdown; the process then exits
/// non-zero.
fn install_panic_hook(shutdown: CancellationToken) -> Arc<AtomicBool> {
    let panicked = Arc::new(AtomicBool::new(false));
    let flag = panicked.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!(panic = %panic_info, "Fatal error, shutting down");
        flag.store(true, Ordering::SeqCst);
        shutdown.cancel();
        default_hook(panic_info);
    }));
    panicked
}

fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}
