mod config;
mod conn_table;
mod display;
mod dns_resolver;
mod logging;
mod monitor;
mod registry;
mod snapshot;

use crate::config::Config;
use crate::conn_table::{ConnectionSource, ProcNetTcp};
use crate::display::{DisplaySink, Status, TerminalScreen};
use crate::dns_resolver::{ReverseLookup, SystemResolver};
use crate::logging::setup_logging;
use crate::monitor::ConnectionMonitor;
use clap::Parser;
use log::{error, info, warn};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

#[derive(Parser, Debug)]
#[command(name = "connwatch", version, about = "Display network connections.")]
struct Args {
    #[arg(short = 'i', long, help = "Time between updates, in seconds")]
    interval: Option<u64>,

    #[arg(short = 'c', long, help = "YAML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Write the log here instead of the configured file")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration, then apply command line overrides
    let (mut config, config_path) = Config::discover(args.config.as_deref());
    if let Some(seconds) = args.interval {
        config.monitoring.refresh_interval_seconds = seconds;
    }
    if let Some(path) = args.log_file {
        config.logging.log_file = path;
    }

    // Initialize logging
    if let Err(e) = setup_logging(&config.logging) {
        eprintln!("Failed to setup logging: {}", e);
    }
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Using default configuration"),
    }

    // Create runtime
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run(config))?;

    info!("connwatch stopped");
    Ok(())
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let interval_secs = config.refresh_interval_seconds();
    let retention = config.monitoring.inactive_retention_seconds.map(Duration::from_secs);
    info!(
        "connwatch starting: refresh every {}s, ipv6 {}, dns timeout {}ms, retention {:?}",
        interval_secs, config.monitoring.include_ipv6, config.dns.lookup_timeout_ms, retention
    );

    let mut monitor = ConnectionMonitor::new(
        ProcNetTcp::new(config.monitoring.include_ipv6),
        SystemResolver::new(config.dns.lookup_timeout_ms),
    )
    .with_excluded_networks(config.excluded_networks())
    .with_retention(retention);

    // Restores the terminal when dropped
    let screen = TerminalScreen::enter()?;

    let frames = run_loop(&mut monitor, screen, interval_secs, tokio::signal::ctrl_c()).await;

    info!(
        "Shutdown signal received after {} frames, {} connections tracked",
        frames,
        monitor.registry().len()
    );
    Ok(())
}

/// Samples, reconciles and draws every `interval_secs` until `shutdown`
/// completes. The sink is dropped before returning. Returns the number of
/// frames drawn.
async fn run_loop<S, R, D, F>(
    monitor: &mut ConnectionMonitor<S, R>,
    mut sink: D,
    interval_secs: u64,
    shutdown: F,
) -> usize
where
    S: ConnectionSource,
    R: ReverseLookup,
    D: DisplaySink,
    F: Future<Output = io::Result<()>>,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);
    let mut frames = 0;

    loop {
        // Wait for the next tick or an interrupt
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {}
        }

        // An interrupted cycle is abandoned before anything is drawn.
        let registry = tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            registry = monitor.run_cycle(Instant::now()) => registry,
        };

        let status = Status {
            active: registry.active_count(),
            tracked: registry.len(),
            interval_secs,
        };
        match display::render(&mut sink, &status, &registry.sorted()) {
            Ok(_) => frames += 1,
            Err(e) => warn!("Failed to draw screen (capacity {}): {}", sink.capacity(), e),
        }
    }

    frames
}
