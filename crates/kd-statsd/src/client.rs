//! StatsD client and backend selection

use crate::config::{BackendChoice, StatsdConfig};
use crate::sink::{DurationSample, LocalSink, MeasurementSink, NullSink, SinkKind, Tags};
use crate::udp::RemoteSink;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Prefix prepended to every metric emitted by [`StatsdClient::build`]
pub const DEFAULT_PREFIX: &str = "KubernetesDeploy";

/// Shared handle to the process-wide client
pub type MetricsHandle = Arc<StatsdClient>;

/// Front of the selected sink
///
/// Applies the metric prefix and the sample rate before a sample reaches the
/// backend. Cheap to share across threads.
#[derive(Debug)]
pub struct StatsdClient {
    backend: Arc<dyn MeasurementSink>,
    prefix: Option<String>,
    default_sample_rate: f64,
}

impl StatsdClient {
    /// Create a client with no prefix and rate 1.0
    pub fn new(backend: Arc<dyn MeasurementSink>) -> Self {
        Self {
            backend,
            prefix: None,
            default_sample_rate: 1.0,
        }
    }

    /// Set the metric prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the sample rate. Values are clamped to `0.0..=1.0`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.default_sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Build the client described by `config`
    ///
    /// Prefix is [`DEFAULT_PREFIX`], sample rate 1.0.
    pub fn build(config: &StatsdConfig) -> Self {
        let backend: Arc<dyn MeasurementSink> = match config.backend_choice() {
            BackendChoice::Local => Arc::new(LocalSink::stderr()),
            BackendChoice::Remote { addr, dialect } => Arc::new(RemoteSink::new(addr, dialect)),
            BackendChoice::Null => Arc::new(NullSink),
        };
        info!(backend = ?backend.kind(), "statsd backend selected");

        Self::new(backend)
            .with_prefix(DEFAULT_PREFIX)
            .with_sample_rate(1.0)
    }

    /// Build from the process environment
    pub fn from_env() -> Self {
        Self::build(&StatsdConfig::from_env())
    }

    /// Active backend
    pub fn backend(&self) -> &Arc<dyn MeasurementSink> {
        &self.backend
    }

    /// Kind of the active backend
    pub fn sink_kind(&self) -> SinkKind {
        self.backend.kind()
    }

    /// Metric prefix, if any
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Sample rate applied to every sample
    pub fn sample_rate(&self) -> f64 {
        self.default_sample_rate
    }

    /// Report a duration distribution sample
    pub fn distribution(&self, name: &str, value: f64, tags: Option<Tags>) {
        let rate = self.default_sample_rate;
        if rate < 1.0 && rand::random::<f64>() >= rate {
            return;
        }

        let name = match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        let sample = DurationSample {
            name,
            value,
            sample_rate: rate,
            tags,
        };
        self.backend.collect_metric(&sample);
    }
}

/// Round an elapsed time to tenths of a second
pub fn round_duration(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}

/// Seconds since `start`, rounded to one decimal place
pub fn duration(start: Instant) -> f64 {
    round_duration(start.elapsed())
}

/// Process-wide client, built from the environment on first use
pub fn global() -> &'static MetricsHandle {
    static GLOBAL: OnceLock<MetricsHandle> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(StatsdClient::from_env()))
}
