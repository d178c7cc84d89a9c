//! CLI argument parsing for kd-probe

use clap::Parser;

/// Emit probe timings through the configured StatsD backend
///
/// The backend is chosen from STATSD_DEV, STATSD_ADDR and STATSD_IMPLEMENTATION.
#[derive(Parser, Debug, Clone)]
#[command(name = "kd-probe")]
#[command(about = "Emit probe timings through the configured StatsD backend")]
#[command(version)]
pub struct Cli {
    /// Metric name (prefixed with KubernetesDeploy.)
    #[arg(long, default_value = "probe.duration")]
    pub metric: String,

    /// How long each probe sleeps, in milliseconds
    #[arg(long, default_value = "250")]
    pub sleep_ms: u64,

    /// Number of probes to run
    #[arg(long, default_value = "1")]
    pub count: u32,

    /// Tag attached to every sample (repeatable, key=value)
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parse a `key=value` tag
fn parse_tag(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty tag key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
