//! Measurement sinks
//!
//! A sink receives fully-prefixed duration samples from [`crate::StatsdClient`].
//! Exactly one sink is active per process; see [`crate::StatsdConfig::backend_choice`].

use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use tracing::warn;

/// Tag name to tag value
pub type Tags = BTreeMap<String, String>;

/// A single timing measurement
#[derive(Debug, Clone, PartialEq)]
pub struct DurationSample {
    /// Metric name, including any prefix
    pub name: String,
    /// Elapsed seconds, rounded to one decimal place
    pub value: f64,
    /// Sample rate the value was recorded at
    pub sample_rate: f64,
    /// Optional contextual tags
    pub tags: Option<Tags>,
}

impl DurationSample {
    /// Create a sample recorded at rate 1.0
    pub fn new(name: impl Into<String>, value: f64, tags: Option<Tags>) -> Self {
        Self {
            name: name.into(),
            value,
            sample_rate: 1.0,
            tags,
        }
    }

    /// Metric name with reserved wire characters replaced
    pub fn normalized_name(&self) -> Cow<'_, str> {
        if self.name.contains([':', '|', '@']) {
            Cow::Owned(self.name.replace([':', '|', '@'], "_"))
        } else {
            Cow::Borrowed(&self.name)
        }
    }

    /// Tags rendered as `key:value`, with separators stripped
    pub fn normalized_tags(&self) -> Vec<String> {
        self.tags
            .iter()
            .flatten()
            .map(|(k, v)| format!("{}:{}", strip_separators(k), strip_separators(v)))
            .collect()
    }

    /// Value as written on the wire (`0.3`, `12.0`)
    pub fn formatted_value(&self) -> String {
        format!("{:?}", self.value)
    }

    /// Human-readable rendering used by the local sink
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "distribution {}:{}",
            self.normalized_name(),
            self.formatted_value()
        );
        if self.sample_rate != 1.0 {
            line.push_str(&format!(" @{:?}", self.sample_rate));
        }
        for tag in self.normalized_tags() {
            line.push_str(" #");
            line.push_str(&tag);
        }
        line
    }
}

fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| *c != '|' && *c != ',').collect()
}

/// Sink variant, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Discards samples
    Null,
    /// Writes readable lines to a diagnostic stream
    Local,
    /// Sends packets to a remote collector
    Remote,
    /// Keeps samples in memory
    Capture,
}

/// Destination for duration samples
///
/// Implementations are shared by every instrumented call in the process and
/// must tolerate concurrent use.
pub trait MeasurementSink: Send + Sync + fmt::Debug {
    /// Accept one sample. Delivery problems are the sink's own business.
    fn collect_metric(&self, sample: &DurationSample);

    /// Which variant this is
    fn kind(&self) -> SinkKind;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Sink that discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MeasurementSink for NullSink {
    fn collect_metric(&self, _sample: &DurationSample) {}

    fn kind(&self) -> SinkKind {
        SinkKind::Null
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sink that writes one `[StatsD] ...` line per sample
pub struct LocalSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl LocalSink {
    /// Write to the process's stderr
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write to an arbitrary stream
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }
}

impl fmt::Debug for LocalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSink").finish_non_exhaustive()
    }
}

impl MeasurementSink for LocalSink {
    fn collect_metric(&self, sample: &DurationSample) {
        let line = format!("[StatsD] {}\n", sample.to_line());
        // One locked write per line keeps concurrent samples from interleaving.
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            warn!("failed to write statsd sample: {}", e);
        }
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Local
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sink that records samples in memory
#[derive(Debug, Default)]
pub struct CaptureSink {
    samples: Mutex<Vec<DurationSample>>,
}

impl CaptureSink {
    /// Create an empty capture sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far
    pub fn samples(&self) -> Vec<DurationSample> {
        self.samples.lock().clone()
    }

    /// Drain collected samples
    pub fn take(&self) -> Vec<DurationSample> {
        std::mem::take(&mut *self.samples.lock())
    }

    /// Number of samples collected
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether nothing has been collected
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

impl MeasurementSink for CaptureSink {
    fn collect_metric(&self, sample: &DurationSample) {
        self.samples.lock().push(sample.clone());
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Capture
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
