//! Stratum binary.
//!
//! Usage:
//!   stratum simulate --validators 4 --duration-secs 10
//!   stratum --data-dir ./stratum-data simulate    # picks up stratum.toml
//!   RUST_LOG=stratum=debug stratum simulate       # admission decisions

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use stratum::config::StratumConfig;
use stratum::demo::{print_report, run_simulation, SimulationParams};

/// Strongly-see ancestry index and rate-limited DAG event emission.
#[derive(Parser, Debug)]
#[command(name = "stratum", version, about = "DAG aBFT event emission core")]
struct Cli {
    /// Directory holding an optional stratum.toml.
    #[arg(long, default_value = "./stratum-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run several validators in-process over a shared engine.
    Simulate {
        /// Number of validators.
        #[arg(long, default_value_t = 4)]
        validators: usize,

        /// How long to let the validators emit.
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,

        /// Transactions submitted per second.
        #[arg(long, default_value_t = 100)]
        tx_rate: u32,

        /// Override the minimum emit interval (milliseconds).
        #[arg(long)]
        min_emit_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = StratumConfig::load(&cli.data_dir);

    match cli.command {
        Command::Simulate {
            validators,
            duration_secs,
            tx_rate,
            min_emit_interval_ms,
        } => {
            if let Some(ms) = min_emit_interval_ms {
                config.emitter.min_emit_interval_ms = ms;
            }
            tracing::info!(validators, duration_secs, tx_rate, "Starting simulation");
            let report = run_simulation(SimulationParams {
                validators,
                duration: Duration::from_secs(duration_secs),
                tx_rate,
                config,
            })
            .await?;
            print_report(&report);
        }
    }
    Ok(())
}
