//! # STRATA Server
//!
//! Headless process that builds an engine from a TOML config and runs the
//! orchestrator loops until the run time elapses or the process is killed.
//!
//! ```bash
//! strata_server --config strata.toml
//! strata_server --run-for-secs 30 --stats-every-secs 5
//! RUST_LOG=strata=debug strata_server
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use strata::{Engine, EngineConfig};
use strata_shared::TracingMetrics;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a STRATA world engine")]
struct Args {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until killed.
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Interval between stats log lines.
    #[arg(long, default_value_t = 10)]
    stats_every_secs: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.logging.filter);

    let engine = Engine::builder(config)
        .with_metrics(Arc::new(TracingMetrics))
        .build()
        .context("building engine")?;
    engine.start().context("starting orchestrator")?;
    tracing::info!(config = ?args.config, "STRATA server running");

    let deadline = args.run_for_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stats_every = Duration::from_secs(args.stats_every_secs.max(1));
    loop {
        let sleep_for = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                remaining.min(stats_every)
            }
            None => stats_every,
        };
        std::thread::sleep(sleep_for);
        log_stats(&engine)?;
    }

    engine.stop();
    log_stats(&engine)?;
    tracing::info!("STRATA server stopped");
    Ok(())
}

fn init_tracing(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .try_init();
}

fn log_stats(engine: &Engine) -> Result<()> {
    let stats = engine.orchestrator().stats();
    let json = serde_json::to_string(&stats).context("serializing stats")?;
    tracing::info!(stats = %json, "orchestrator stats");
    Ok(())
}
