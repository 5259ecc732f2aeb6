use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slidegate::config::{LogFormat, LoggingConfig, SlidegateConfig};
use slidegate::ratelimit::{spawn_sweeper, SlidingWindowLimiter};
use slidegate::simulation::Simulation;

/// Run a message stream through a per-user sliding window limiter.
#[derive(Parser, Debug)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sliding window length in seconds
    #[arg(long)]
    window_size: Option<f64>,

    /// Messages allowed per user within one window
    #[arg(long)]
    max_requests: Option<usize>,

    /// Number of message rounds
    #[arg(long)]
    rounds: Option<usize>,

    /// Messages sent in each round
    #[arg(long)]
    messages: Option<u64>,

    /// Number of distinct users
    #[arg(long)]
    users: Option<u64>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut SlidegateConfig) {
        if let Some(window_size) = self.window_size {
            config.limiter.window_size_secs = window_size;
        }
        if let Some(max_requests) = self.max_requests {
            config.limiter.max_requests = max_requests;
        }
        if let Some(rounds) = self.rounds {
            config.simulation.rounds = rounds;
        }
        if let Some(messages) = self.messages {
            config.simulation.messages_per_round = messages;
        }
        if let Some(users) = self.users {
            config.simulation.users = users;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SlidegateConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Slidegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        path = ?args.config,
        window_size_secs = config.limiter.window_size_secs,
        max_requests = config.limiter.max_requests,
        "Configuration loaded"
    );

    let limiter = Arc::new(SlidingWindowLimiter::from_config(&config.limiter)?);
    info!("Rate limiter initialized");

    let sweeper = config
        .sweeper
        .enabled
        .then(|| spawn_sweeper(limiter.clone(), config.sweeper.interval()));

    let simulation = Simulation::new(limiter.clone(), config.simulation.clone())?;

    tokio::select! {
        report = simulation.run() => {
            info!(
                admitted = report.admitted(),
                rejected = report.rejected(),
                "Simulation complete"
            );
        }
        _ = shutdown_signal() => {}
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Slidegate stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}
