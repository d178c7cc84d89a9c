//! Probe component timed by kd-probe

use kd_statsd::{InstrumentResult, Measured, ProxyRegistry, Tags};
use std::time::Duration;
use tracing::debug;

/// Sleeps for a fixed time; each run is one sample
#[derive(Debug, Clone)]
pub struct Probe {
    sleep: Duration,
    tags: Tags,
}

impl Probe {
    /// Create a probe
    pub fn new(sleep: Duration, tags: Tags) -> Self {
        Self { sleep, tags }
    }

    /// Start measuring `run` under `metric`
    pub fn instrument(registry: &ProxyRegistry, metric: &str) -> InstrumentResult<bool> {
        registry.measure_method::<Self>("run", Some(metric))
    }

    /// One timed run
    pub async fn run(&self, registry: &ProxyRegistry) -> Duration {
        registry.call_async(self, "run", |p| p.sleep_once()).await
    }

    async fn sleep_once(&self) -> Duration {
        debug!(sleep_ms = self.sleep.as_millis() as u64, "probe sleeping");
        tokio::time::sleep(self.sleep).await;
        self.sleep
    }
}

impl Measured for Probe {
    const OPERATIONS: &'static [&'static str] = &["run"];

    fn statsd_tags(&self) -> Option<Tags> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.clone())
        }
    }
}
