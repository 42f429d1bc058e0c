//! Curve Collector
//!
//! Reads thermostat events, aggregates them per installation and spools the
//! results for upload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use curve::config::ConfigLoader;
use curve::identity::{Identity, validate_anonymous_id};
use curve::input::{read_json_lines, run_simulation};
use curve::installation::{InstallationManager, RuntimeSettings};
use curve::simulator::ThermostatSimulator;
use curve::transport::SpoolTransport;

/// Curve thermostat telemetry collector
#[derive(Parser, Debug)]
#[command(name = "curve")]
#[command(about = "Thermostat telemetry collector", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate events from simulated thermostats instead of reading stdin
    #[arg(long)]
    simulate: bool,

    /// Number of simulated installations
    #[arg(long, default_value = "1")]
    installations: usize,

    /// Real milliseconds between simulated 5-minute steps
    #[arg(long, default_value = "250")]
    step_delay_ms: u64,

    /// Seed for reproducible simulations
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(async_main(args));

    // A stdin read may still be parked on a blocking thread
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn async_main(args: Args) -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("curve=info,hvac_analytics=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting curve collector v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigLoader::load(args.config.as_deref())
        .await
        .context("failed to load configuration")?;

    let local_id = match &config.collector.anonymous_id {
        Some(id) => id.clone(),
        None => {
            Identity::load_or_create(&config.collector.state_dir)
                .await
                .context("failed to load installation identity")?
                .anonymous_id
        }
    };
    validate_anonymous_id(&local_id).context("invalid configured anonymous_id")?;
    info!("Installation id: {}", local_id);

    let transport = SpoolTransport::open(&config.collector.outbox_dir)
        .await
        .with_context(|| {
            format!(
                "failed to open outbox {}",
                config.collector.outbox_dir.display()
            )
        })?;

    let manager =
        InstallationManager::new_shared(Arc::new(transport), RuntimeSettings::from_config(&config));
    manager.get_or_spawn(&local_id);

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut input = {
        let manager = Arc::clone(&manager);
        let local_id = local_id.clone();
        let delay = Duration::from_millis(args.step_delay_ms);
        let simulators = args
            .simulate
            .then(|| simulators(&local_id, args.installations, args.seed));

        tokio::spawn(async move {
            match simulators {
                Some(sims) => run_simulation(sims, &manager, &local_id, delay, stop_rx).await,
                None => {
                    let stdin = BufReader::new(tokio::io::stdin());
                    read_json_lines(stdin, &manager, &local_id).await
                }
            }
        })
    };

    tokio::select! {
        _ = shutdown_signal() => {
            let _ = stop_tx.send(true);
            if !args.simulate {
                input.abort();
            }
        }
        result = &mut input => {
            match result {
                Ok(Ok(stats)) => info!("Input finished ({} events)", stats.accepted),
                Ok(Err(e)) => error!("Input failed: {}", e),
                Err(e) => error!("Input task panicked: {}", e),
            }
        }
    }

    // Log final installation status
    for status in manager.statuses() {
        info!(
            "  - {} day={} samples={} cycles={} queued={}",
            status.anonymous_id,
            status.date,
            status.samples_today,
            status.cycles_today,
            status.queue.len
        );
        if let Some(handle) = manager.get(&status.anonymous_id) {
            match handle.estimate_rates().await {
                Ok(rates) => {
                    for rate in rates.values() {
                        info!(
                            "      {} {:+.2}/30min from {} (reliable={})",
                            rate.mode, rate.rate_per_30min, rate.sample_count, rate.reliable
                        );
                    }
                }
                Err(e) => warn!("Rate estimate unavailable for {}: {}", status.anonymous_id, e),
            }
        }
    }

    info!("Shutting down installations...");
    if let Err(e) = manager.shutdown_all().await {
        warn!("Some installations did not shut down cleanly: {}", e);
    }

    info!("Collector shutdown complete");
    Ok(())
}

/// Simulators starting now, the first reporting as the local installation
fn simulators(local_id: &str, count: usize, seed: Option<u64>) -> Vec<ThermostatSimulator> {
    let start = chrono::Local::now().naive_local();
    (0..count.max(1))
        .map(|i| {
            let sim = match seed {
                Some(seed) => ThermostatSimulator::seeded(start, seed + i as u64),
                None => ThermostatSimulator::from_entropy(start),
            };
            if i == 0 {
                sim.for_installation(local_id)
            } else {
                sim.for_installation(Identity::generate().anonymous_id)
            }
        })
        .collect()
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
