use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::config::{LogFormat, LoggingConfig, SlidegateConfig};
use slidegate::demo::{DemoEvent, TrafficSimulator};
use slidegate::ratelimit::{PolicyRegistry, RateLimiter};

/// Drive synthetic keyed traffic through a sliding window rate limiter.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sliding window length in seconds
    #[arg(long)]
    window_secs: Option<f64>,

    /// Maximum admitted events per key per window
    #[arg(long)]
    max_requests: Option<u32>,

    /// Events per round
    #[arg(long)]
    messages: Option<u32>,

    /// Number of distinct keys
    #[arg(long)]
    users: Option<u32>,

    /// Number of rounds
    #[arg(long)]
    rounds: Option<u32>,

    /// Minimum delay between events in milliseconds
    #[arg(long)]
    min_delay_ms: Option<u64>,

    /// Maximum delay between events in milliseconds
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Pause between rounds in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Seed for the delay generator
    #[arg(long)]
    seed: Option<u64>,

    /// Advance a virtual clock instead of sleeping
    #[arg(long)]
    simulated: bool,

    /// Drive the named policy from the configuration instead of the default limiter
    #[arg(long)]
    policy: Option<String>,

    /// Print the final report as JSON
    #[arg(long)]
    json_report: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Default log filter, e.g. `info` or `slidegate=debug`
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut SlidegateConfig) {
        if let Some(window_secs) = self.window_secs {
            config.limiter.window_size_secs = window_secs;
        }
        if let Some(max_requests) = self.max_requests {
            config.limiter.max_requests = max_requests;
        }
        if let Some(messages) = self.messages {
            config.demo.messages_per_round = messages;
        }
        if let Some(users) = self.users {
            config.demo.users = users;
        }
        if let Some(rounds) = self.rounds {
            config.demo.rounds = rounds;
        }
        if let Some(min_delay_ms) = self.min_delay_ms {
            config.demo.min_delay_ms = min_delay_ms;
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            config.demo.max_delay_ms = max_delay_ms;
        }
        if let Some(pause_ms) = self.pause_ms {
            config.demo.round_pause_ms = pause_ms;
        }
        if self.seed.is_some() {
            config.demo.seed = self.seed;
        }
        if self.simulated {
            config.demo.simulated = true;
        }
        if let Some(policy) = &self.policy {
            config.demo.policy = Some(policy.clone());
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SlidegateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Slidegate demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = PolicyRegistry::from_config(&config.policies)?;
    if !registry.is_empty() {
        info!(policies = ?registry.names(), "Named policies loaded");
    }

    let limiter = demo_limiter(&config, &registry)?;
    info!(
        policy = config.demo.policy.as_deref().unwrap_or("default"),
        window_secs = limiter.window_size().as_secs_f64(),
        max_requests = limiter.max_requests(),
        "Rate limiter initialized"
    );

    let mut simulator = TrafficSimulator::new(limiter, config.demo.clone());
    let run = simulator.run(|event| match event {
        DemoEvent::RoundStarted { round } => println!("\n=== Round {} ===", round),
        DemoEvent::Sent(outcome) => println!("{}", outcome),
        DemoEvent::Pausing { pause } => {
            println!("\nWaiting {:.1}s...", pause.as_secs_f64())
        }
    });

    tokio::select! {
        report = run => {
            println!(
                "\nAdmitted {} | Rejected {}",
                report.admitted, report.rejected
            );
            if cli.json_report {
                println!("{}", report.to_json()?);
            }
        }
        _ = shutdown_signal() => {
            warn!("Demo interrupted before completion");
        }
    }

    info!("Slidegate demo stopped");
    Ok(())
}

/// The limiter the demo drives: the named policy when one is selected,
/// otherwise the default `limiter` section.
fn demo_limiter(
    config: &SlidegateConfig,
    registry: &PolicyRegistry,
) -> slidegate::error::Result<Arc<RateLimiter>> {
    match &config.demo.policy {
        Some(name) => registry.limiter(name),
        None => Ok(Arc::new(RateLimiter::from_secs(
            config.limiter.window_size_secs,
            config.limiter.max_requests,
        )?)),
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

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
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
