//! # kd-statsd
//!
//! Method timing instrumentation for KubernetesDeploy.
//!
//! Features:
//! - Backend selection from `STATSD_*` environment variables
//! - Null, local (stderr) and remote (UDP) sinks
//! - Per-type instrumentation proxies that time named operations
//! - Optional per-instance tags attached to each sample
//!
//! ## Architecture
//!
//! ```text
//! +-------------------+      +-------------------+
//! |   ProxyRegistry   | ---> | InstrumentationProxy<C> |  <- one per component type
//! +-------------------+      +-------------------+
//!                                      |
//!                            +-------------------+
//!                            |   StatsdClient    |  <- prefix, sample rate
//!                            +-------------------+
//!                                      |
//!                  +--------+----------+----------+
//!                  |  Null  |  Local   |  Remote  |  <- chosen once per process
//!                  +--------+----------+----------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use kd_statsd::{Measured, ProxyRegistry, StatsdClient};
//!
//! let registry = ProxyRegistry::new(Arc::new(StatsdClient::from_env()));
//! registry.measure_method::<Deployment>("sync", None)?;
//! registry.call(&deployment, "sync", |d| d.sync_resources());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod config;
mod error;
mod instrument;
mod sink;
mod udp;

pub use client::{duration, global, round_duration, MetricsHandle, StatsdClient, DEFAULT_PREFIX};
pub use config::{BackendChoice, Dialect, EnvVar, StatsdConfig};
pub use error::{InstrumentError, InstrumentResult, StatsdError, StatsdResult};
pub use instrument::{
    global_registry, measure_fn, measure_method, InstrumentationProxy, InstrumentedOperation,
    Measured, MeasuredOperation, ProxyRegistry,
};
pub use sink::{
    CaptureSink, DurationSample, LocalSink, MeasurementSink, NullSink, SinkKind, Tags,
};
pub use udp::RemoteSink;

/// Macro for timing a block of code as a measured operation.
///
/// The sample is only reported when the block completes; an early exit through
/// `?` or `return` skips it.
#[macro_export]
macro_rules! measure {
    ($proxy:expr, $component:expr, $operation:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        $proxy.record($component, $operation, start);
        result
    }};
}
