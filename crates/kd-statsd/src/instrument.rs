//! Per-type instrumentation of named operations
//!
//! A component type declares the operations it owns through [`Measured`].
//! [`ProxyRegistry::measure_method`] installs a single [`InstrumentationProxy`]
//! for that type the first time it is called and records which operations it
//! should time. The component then routes each operation body through the
//! proxy:
//!
//! ```ignore
//! impl Deployment {
//!     pub fn sync(&self, resources: &[Resource]) -> SyncResult {
//!         registry().call(self, "sync", |d| d.sync_resources(resources))
//!     }
//! }
//! ```
//!
//! Samples are reported only when the body returns normally. A panic unwinds
//! through the proxy without a sample, and [`InstrumentationProxy::try_call`]
//! reports nothing for an `Err`.

use crate::client::{duration, global, MetricsHandle};
use crate::error::{InstrumentError, InstrumentResult};
use crate::sink::Tags;
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, warn};

/// A component whose operations can be timed
pub trait Measured: 'static {
    /// Every operation defined on the component, whatever its visibility
    const OPERATIONS: &'static [&'static str];

    /// Tags attached to samples taken on this instance
    ///
    /// `None` means the component has no tag provider.
    fn statsd_tags(&self) -> Option<Tags> {
        None
    }
}

/// An operation registered for timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedOperation {
    /// Owning component type
    pub component: &'static str,
    /// Operation name
    pub operation: &'static str,
    /// Metric reported for each call
    pub metric: String,
}

impl InstrumentedOperation {
    /// Metric name used when none is given
    pub fn default_metric(operation: &str) -> String {
        format!("{}.duration", operation)
    }
}

/// Look up `operation` among the component's declared operations
fn resolve<C: Measured>(operation: &str) -> InstrumentResult<&'static str> {
    C::OPERATIONS
        .iter()
        .copied()
        .find(|op| *op == operation)
        .ok_or_else(|| InstrumentError::UndefinedOperation {
            component: type_name::<C>(),
            operation: operation.to_string(),
        })
}

/// Reject call-site names the component does not declare
///
/// Panics in debug builds; release builds log and run the body untimed.
fn check_declared<C: Measured>(operation: &str) {
    if C::OPERATIONS.iter().any(|op| *op == operation) {
        return;
    }
    if cfg!(debug_assertions) {
        panic!(
            "call to undeclared operation {} on {}",
            operation,
            type_name::<C>()
        );
    }
    warn!(
        component = type_name::<C>(),
        operation, "call to undeclared operation is not measured"
    );
}

/// A measured operation resolved for repeated calls
///
/// Holds everything a call needs, so timing through it takes no locks.
/// Components on hot paths can keep one in a `OnceLock`.
pub struct MeasuredOperation<C> {
    statsd: MetricsHandle,
    operation: Arc<InstrumentedOperation>,
    _component: PhantomData<fn(&C)>,
}

impl<C> Clone for MeasuredOperation<C> {
    fn clone(&self) -> Self {
        Self {
            statsd: Arc::clone(&self.statsd),
            operation: Arc::clone(&self.operation),
            _component: PhantomData,
        }
    }
}

impl<C> fmt::Debug for MeasuredOperation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasuredOperation")
            .field("operation", &self.operation)
            .finish()
    }
}

impl<C: Measured> MeasuredOperation<C> {
    /// Registration this handle reports under
    pub fn operation(&self) -> &InstrumentedOperation {
        &self.operation
    }

    /// Run `body` on `component` and report on return
    pub fn call<R, F>(&self, component: &C, body: F) -> R
    where
        F: FnOnce(&C) -> R,
    {
        let start = Instant::now();
        let result = body(component);
        self.record(component, start);
        result
    }

    /// Run a body that needs mutable access to the component
    pub fn call_mut<R, F>(&self, component: &mut C, body: F) -> R
    where
        F: FnOnce(&mut C) -> R,
    {
        let start = Instant::now();
        let result = body(component);
        self.record(component, start);
        result
    }

    /// Run a fallible body; only `Ok` results are reported
    pub fn try_call<T, E, F>(&self, component: &C, body: F) -> Result<T, E>
    where
        F: FnOnce(&C) -> Result<T, E>,
    {
        let start = Instant::now();
        let value = body(component)?;
        self.record(component, start);
        Ok(value)
    }

    /// Build and await the future returned by `body`
    ///
    /// The future is created after the start timestamp is taken.
    pub async fn call_async<'a, F, Fut>(&self, component: &'a C, body: F) -> Fut::Output
    where
        F: FnOnce(&'a C) -> Fut,
        Fut: Future,
    {
        let start = Instant::now();
        let result = body(component).await;
        self.record(component, start);
        result
    }

    /// Report a call that began at `start`
    pub fn record(&self, component: &C, start: Instant) {
        let elapsed = duration(start);
        let tags = component.statsd_tags();
        self.statsd.distribution(&self.operation.metric, elapsed, tags);
    }
}

/// Override layer for one component type
pub struct InstrumentationProxy<C> {
    statsd: MetricsHandle,
    operations: RwLock<HashMap<&'static str, MeasuredOperation<C>>>,
}

impl<C> fmt::Debug for InstrumentationProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationProxy")
            .field("component", &type_name::<C>())
            .field("operations", &self.operations.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C: Measured> InstrumentationProxy<C> {
    /// Create an empty layer reporting to `statsd`
    pub fn new(statsd: MetricsHandle) -> Self {
        Self {
            statsd,
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Start timing `operation`
    ///
    /// Returns `Ok(false)` when the operation was already measured; the first
    /// registration and its metric name are kept.
    pub fn measure_method(&self, operation: &str, metric: Option<&str>) -> InstrumentResult<bool> {
        let operation = resolve::<C>(operation)?;
        if self.operations.read().contains_key(operation) {
            return Ok(false);
        }

        let mut operations = self.operations.write();
        match operations.entry(operation) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let metric = metric
                    .map(str::to_string)
                    .unwrap_or_else(|| InstrumentedOperation::default_metric(operation));
                debug!(component = type_name::<C>(), operation, %metric, "measuring operation");
                slot.insert(MeasuredOperation {
                    statsd: Arc::clone(&self.statsd),
                    operation: Arc::new(InstrumentedOperation {
                        component: type_name::<C>(),
                        operation,
                        metric,
                    }),
                    _component: PhantomData,
                });
                Ok(true)
            }
        }
    }

    /// Resolved handle for `operation`, if it is measured
    ///
    /// Panics in debug builds when `operation` is not declared on `C`.
    pub fn measured(&self, operation: &str) -> Option<MeasuredOperation<C>> {
        check_declared::<C>(operation);
        self.operations.read().get(operation).cloned()
    }

    /// Registration for `operation`, if it is measured
    pub fn operation(&self, operation: &str) -> Option<Arc<InstrumentedOperation>> {
        self.operations
            .read()
            .get(operation)
            .map(|m| Arc::clone(&m.operation))
    }

    /// Whether `operation` is measured
    pub fn is_measured(&self, operation: &str) -> bool {
        self.operations.read().contains_key(operation)
    }

    /// Names of all measured operations
    pub fn measured_operations(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operations.read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run `body` as `operation` on `component`
    pub fn call<R, F>(&self, component: &C, operation: &str, body: F) -> R
    where
        F: FnOnce(&C) -> R,
    {
        match self.measured(operation) {
            Some(measured) => measured.call(component, body),
            None => body(component),
        }
    }

    /// Run a body that needs mutable access to the component
    pub fn call_mut<R, F>(&self, component: &mut C, operation: &str, body: F) -> R
    where
        F: FnOnce(&mut C) -> R,
    {
        match self.measured(operation) {
            Some(measured) => measured.call_mut(component, body),
            None => body(component),
        }
    }

    /// Run a fallible body; only `Ok` results are reported
    pub fn try_call<T, E, F>(&self, component: &C, operation: &str, body: F) -> Result<T, E>
    where
        F: FnOnce(&C) -> Result<T, E>,
    {
        match self.measured(operation) {
            Some(measured) => measured.try_call(component, body),
            None => body(component),
        }
    }

    /// Build and await the future returned by `body` as `operation`
    pub async fn call_async<'a, F, Fut>(
        &self,
        component: &'a C,
        operation: &str,
        body: F,
    ) -> Fut::Output
    where
        F: FnOnce(&'a C) -> Fut,
        Fut: Future,
    {
        match self.measured(operation) {
            Some(measured) => measured.call_async(component, body).await,
            None => body(component).await,
        }
    }

    /// Report a call to `operation` that began at `start`
    ///
    /// Used by [`crate::measure!`]. Unmeasured operations are ignored.
    pub fn record(&self, component: &C, operation: &str, start: Instant) {
        if let Some(measured) = self.measured(operation) {
            measured.record(component, start);
        }
    }
}

/// One [`InstrumentationProxy`] per component type
pub struct ProxyRegistry {
    statsd: MetricsHandle,
    proxies: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("statsd", &self.statsd)
            .field("proxies", &self.proxies.read().len())
            .finish()
    }
}

impl ProxyRegistry {
    /// Create an empty registry whose proxies report to `statsd`
    pub fn new(statsd: MetricsHandle) -> Self {
        Self {
            statsd,
            proxies: RwLock::new(HashMap::new()),
        }
    }

    /// Client shared by every proxy
    pub fn statsd(&self) -> &MetricsHandle {
        &self.statsd
    }

    /// Start timing `operation` on `C`, installing `C`'s proxy if needed
    ///
    /// An undefined operation fails before anything is installed.
    pub fn measure_method<C: Measured>(
        &self,
        operation: &str,
        metric: Option<&str>,
    ) -> InstrumentResult<bool> {
        resolve::<C>(operation)?;
        self.install::<C>().measure_method(operation, metric)
    }

    /// Proxy for `C`, if one has been installed
    pub fn proxy<C: Measured>(&self) -> Option<Arc<InstrumentationProxy<C>>> {
        let proxy = self.proxies.read().get(&TypeId::of::<C>()).cloned()?;
        proxy.downcast().ok()
    }

    /// Resolved handle for `operation` on `C`, in a single lookup
    ///
    /// Panics in debug builds when `operation` is not declared on `C`.
    pub fn measured<C: Measured>(&self, operation: &str) -> Option<MeasuredOperation<C>> {
        check_declared::<C>(operation);
        let proxies = self.proxies.read();
        let proxy = proxies
            .get(&TypeId::of::<C>())?
            .downcast_ref::<InstrumentationProxy<C>>()?;
        let measured = proxy.operations.read().get(operation).cloned();
        measured
    }

    fn install<C: Measured>(&self) -> Arc<InstrumentationProxy<C>> {
        if let Some(proxy) = self.proxy::<C>() {
            return proxy;
        }

        let mut proxies = self.proxies.write();
        let proxy = proxies.entry(TypeId::of::<C>()).or_insert_with(|| {
            debug!(component = type_name::<C>(), "installing instrumentation proxy");
            let proxy: Arc<dyn Any + Send + Sync> =
                Arc::new(InstrumentationProxy::<C>::new(Arc::clone(&self.statsd)));
            proxy
        });
        Arc::clone(proxy)
            .downcast()
            .expect("proxy table is keyed by TypeId")
    }

    /// Run `body` through `C`'s proxy, or directly when `operation` is not measured
    pub fn call<C, R, F>(&self, component: &C, operation: &str, body: F) -> R
    where
        C: Measured,
        F: FnOnce(&C) -> R,
    {
        match self.measured::<C>(operation) {
            Some(measured) => measured.call(component, body),
            None => body(component),
        }
    }

    /// Fallible variant of [`ProxyRegistry::call`]
    pub fn try_call<C, T, E, F>(&self, component: &C, operation: &str, body: F) -> Result<T, E>
    where
        C: Measured,
        F: FnOnce(&C) -> Result<T, E>,
    {
        match self.measured::<C>(operation) {
            Some(measured) => measured.try_call(component, body),
            None => body(component),
        }
    }

    /// Async variant of [`ProxyRegistry::call`]
    pub async fn call_async<'a, C, F, Fut>(
        &self,
        component: &'a C,
        operation: &str,
        body: F,
    ) -> Fut::Output
    where
        C: Measured,
        F: FnOnce(&'a C) -> Fut,
        Fut: Future,
    {
        match self.measured::<C>(operation) {
            Some(measured) => measured.call_async(component, body).await,
            None => body(component).await,
        }
    }
}

/// Registry bound to [`crate::global`]
pub fn global_registry() -> &'static ProxyRegistry {
    static REGISTRY: OnceLock<ProxyRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| ProxyRegistry::new(Arc::clone(global())))
}

/// Start timing `operation` on `C` through the process-wide registry
pub fn measure_method<C: Measured>(operation: &str, metric: Option<&str>) -> InstrumentResult<bool> {
    global_registry().measure_method::<C>(operation, metric)
}

/// Wrap a plain function so each call is timed under `metric`
///
/// `tags` is consulted after every call; return `None` for untagged samples.
pub fn measure_fn<A, R, F, T>(
    statsd: MetricsHandle,
    metric: impl Into<String>,
    f: F,
    tags: T,
) -> impl Fn(A) -> R
where
    F: Fn(A) -> R,
    T: Fn() -> Option<Tags>,
{
    let metric = metric.into();
    move |args| {
        let start = Instant::now();
        let result = f(args);
        statsd.distribution(&metric, duration(start), tags());
        result
    }
}
