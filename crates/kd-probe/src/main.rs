//! kd-probe binary
//!
//! Checks a StatsD setup end to end: selects the backend from the environment,
//! times a sleeping probe and emits the samples.

mod cli;
mod probe;

use anyhow::Result;
use cli::Cli;
use kd_statsd::{ProxyRegistry, StatsdClient, StatsdConfig, Tags};
use probe::Probe;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let statsd = Arc::new(StatsdClient::build(&StatsdConfig::from_env()));
    tracing::info!(
        sink = ?statsd.sink_kind(),
        prefix = statsd.prefix().unwrap_or_default(),
        "statsd client ready"
    );
    let registry = ProxyRegistry::new(statsd);
    Probe::instrument(&registry, &cli.metric)?;

    let tags: Tags = cli.tags.into_iter().collect();
    let probe = Probe::new(Duration::from_millis(cli.sleep_ms), tags);

    for i in 0..cli.count {
        let slept = probe.run(&registry).await;
        tracing::info!(run = i + 1, slept_ms = slept.as_millis() as u64, "probe finished");
    }

    tracing::info!("kd-probe done");

    Ok(())
}
