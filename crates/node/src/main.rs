use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adr_core::{DeviceId, Outcome};
use adr_wire::{EnvClient, Observation};
use adrd::config::{self, ControllerArgs, ControllerConfig};
use adrd::{Dispatcher, Server};

#[derive(Parser)]
#[command(name = "adrd")]
#[command(about = "Adaptive SF/TP controller - bandit-driven ADR for simulated LoRa networks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    args: ControllerArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller
    Run,
    /// Print the effective configuration as TOML
    Config,
    /// Send test observations to a running controller
    Probe {
        /// Controller address
        #[arg(long, default_value = "127.0.0.1:7654")]
        addr: String,

        /// Device id to report as
        #[arg(long, default_value = "probe-0")]
        device: String,

        /// Number of request/response rounds
        #[arg(long, default_value = "5")]
        rounds: u32,

        /// Reply deadline per round in milliseconds
        #[arg(long, default_value = "1000")]
        wait_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            let config = config::load(&cli.args)?;
            init_tracing(&config, cli.args.log_level.is_some());
            run_controller(config).await?;
        }
        Some(Commands::Config) => {
            let config = config::load(&cli.args)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Probe {
            addr,
            device,
            rounds,
            wait_ms,
        }) => {
            init_tracing(&ControllerConfig::default(), false);
            probe(&addr, &device, rounds, Duration::from_millis(wait_ms)).await?;
        }
    }

    Ok(())
}

/// `--log-level` wins over `ADR_LOG`, which wins over the config file.
fn init_tracing(config: &ControllerConfig, from_cli: bool) {
    let directive = if from_cli {
        config.log_level.clone()
    } else {
        std::env::var("ADR_LOG").unwrap_or_else(|_| config.log_level.clone())
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_controller(config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("ADR controller");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let dispatcher = Arc::new(Dispatcher::from_config(&config)?);
    let catalog = dispatcher.catalog();
    info!(
        arms = catalog.len(),
        spreading_factors = ?catalog.spreading_factors(),
        tx_powers_dbm = ?catalog.tx_powers_dbm(),
        "action catalog"
    );

    let server = Server::bind(&config.listen_addr, Arc::clone(&dispatcher)).await?;

    if config.status_interval_secs > 0 {
        let dispatcher = Arc::clone(&dispatcher);
        let period = Duration::from_secs(config.status_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = dispatcher.stats();
                let best = dispatcher
                    .snapshot()
                    .await
                    .ok()
                    .and_then(|s| s.best_action())
                    .and_then(|a| dispatcher.catalog().decode(a).ok());
                info!(
                    sessions = stats.sessions_active,
                    devices = dispatcher.device_count(),
                    pending = dispatcher.pending_count(),
                    decisions = stats.decisions,
                    timeouts = stats.timeouts,
                    mean_reward = ?dispatcher.mean_reward(),
                    best = ?best,
                    "status"
                );
            }
        });
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("shutting down");
    let stats = dispatcher.stats();
    match dispatcher.shutdown().await {
        Ok(snapshot) => info!(
            updates = snapshot.updates,
            best = ?snapshot.best_action(),
            "final policy state"
        ),
        Err(e) => warn!(error = %e, "policy state unavailable"),
    }
    info!(stats = %serde_json::to_string(&stats)?, "final counters");
    info!("controller stopped");

    Ok(())
}

/// Drive a running controller the way the simulated network would.
async fn probe(
    addr: &str,
    device: &str,
    rounds: u32,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = DeviceId::new(device)?;
    let mut client = EnvClient::connect(addr).await?;
    info!(addr, device = %device, "probe connected");

    let mut previous = None;
    for seq in 0..rounds as u64 {
        let outcome = if previous.is_some() {
            Outcome::new(1.0, 0.02)
        } else {
            Outcome::default()
        };
        let obs = Observation::new(device.clone(), previous, outcome).with_seq(seq);

        let started = std::time::Instant::now();
        let decision = client.request(&obs, wait).await?;
        println!(
            "seq={} action={} rtt={:?}",
            seq,
            decision.action,
            started.elapsed()
        );
        previous = Some(decision.action);
    }

    client.close().await?;
    Ok(())
}
