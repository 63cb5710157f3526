//! Filter runtime: common state, lifecycle, sink wiring, and the worker
//! thread contract.
//!
//! A filter is a processing unit owning one ring buffer per input port and
//! holding shared references to the downstream rings it feeds (its sinks).
//! The transformation itself is a worker closure supplied at construction
//! and driven on a dedicated OS thread between `start` and `stop`.
//!
//! # Worker contract
//!
//! A worker must:
//!
//! 1. monitor [`FilterCore::is_running`] and return `Ok` when it clears;
//! 2. obtain input via [`BatchRing::get_tail`], releasing each batch after
//!    use;
//! 3. obtain output via [`BatchRing::get_head`], publishing with
//!    [`BatchRing::submit`];
//! 4. on [`Ec::Complete`] at any input, forward a single COMPLETE batch to
//!    every connected sink ([`FilterCore::forward_complete`]) and return;
//! 5. on any fatal condition, return a [`WorkerError`] built with
//!    [`worker_error!`](crate::worker_error) — the runtime records it,
//!    clears `running`, and [`health`](FilterCore::health) reports
//!    [`Health::Failed`].
//!
//! [`Ec::Timeout`] is retryable; [`Ec::Stopped`] and [`Ec::FilterStopping`]
//! mean "terminate gracefully".

use crate::config::{RingConfig, MAX_INPUTS, MAX_NAME_LEN, MAX_SINKS};
use crate::error::{Ec, WorkerError};
use crate::properties::{
    self, FilterContract, InputConstraint, OutputBehavior, PropertyError, PropertyTable,
};
use crate::ring::BatchRing;
use crate::stats::{FilterMetrics, FilterStats};
use crate::worker_error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Boxed worker closure driven by the filter's thread.
pub type Worker = Box<dyn FnMut(&FilterCore) -> Result<(), WorkerError> + Send>;

/// Worker-visible health of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// No failure recorded.
    Healthy,
    /// The worker recorded a non-OK diagnostic and exited.
    Failed,
}

/// Configuration common to every filter.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Filter name, also used as the worker thread name. At most
    /// [`MAX_NAME_LEN`] bytes.
    pub name: String,
    /// Number of input ports; one ring buffer is created per port.
    pub n_inputs: usize,
    /// Number of sink slots this filter can feed. May be 0 for terminal
    /// filters.
    pub max_sinks: usize,
    /// Ring configuration applied to every created input ring.
    pub ring: RingConfig,
    /// Timeout in microseconds for the worker's blocking calls.
    /// 0 waits indefinitely.
    pub timeout_us: u64,
}

impl FilterConfig {
    /// One input, one sink, 10 ms timeout.
    pub fn new(name: impl Into<String>, ring: RingConfig) -> Self {
        Self { name: name.into(), n_inputs: 1, max_sinks: 1, ring, timeout_us: 10_000 }
    }

    pub fn with_inputs(mut self, n_inputs: usize) -> Self {
        self.n_inputs = n_inputs;
        self
    }

    pub fn with_max_sinks(mut self, max_sinks: usize) -> Self {
        self.max_sinks = max_sinks;
        self
    }

    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    /// Validates the configuration the way filter init does.
    pub fn validate(&self) -> Result<(), Ec> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(Ec::InvalidConfigName);
        }
        if self.n_inputs > MAX_INPUTS {
            return Err(Ec::InvalidConfigMaxInputs);
        }
        if self.max_sinks > MAX_SINKS {
            return Err(Ec::InvalidConfigMaxSinks);
        }
        if self.n_inputs > 0 || self.max_sinks > 0 {
            self.ring.validate()?;
        }
        Ok(())
    }
}

/// Sink slot table, guarded by the filter mutex.
#[derive(Debug, Default)]
struct SinkTable {
    slots: Vec<Option<Arc<BatchRing>>>,
    n_sinks: usize,
}

/// Computed per-port property tables, filled in by pipeline validation.
#[derive(Debug, Default)]
struct PortProperties {
    inputs: Vec<Option<PropertyTable>>,
    outputs: Vec<Option<PropertyTable>>,
}

/// Shared state of a filter: everything the worker thread, the control
/// thread, and observers touch.
///
/// Always held behind an `Arc`; the worker thread keeps its own clone while
/// running.
pub struct FilterCore {
    name: String,
    timeout_us: u64,
    inputs: Vec<Arc<BatchRing>>,
    max_sinks: usize,
    sinks: Mutex<SinkTable>,
    running: AtomicBool,
    /// Lock-free mirror of "diagnostic record holds a failure".
    failed: AtomicBool,
    diag: Mutex<Option<WorkerError>>,
    metrics: FilterMetrics,
    contract: Mutex<FilterContract>,
    props: Mutex<PortProperties>,
    worker: Mutex<Option<Worker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FilterCore {
    /// Creates a core, building one input ring per port from
    /// `config.ring`.
    pub fn new(config: FilterConfig, worker: Worker) -> Result<Arc<Self>, Ec> {
        config.validate()?;
        let mut inputs = Vec::with_capacity(config.n_inputs);
        for _ in 0..config.n_inputs {
            inputs.push(Arc::new(BatchRing::new(config.ring)?));
        }
        Ok(Self::assemble(config, inputs, Some(worker)))
    }

    /// Creates a core around pre-built input rings. Used by the pipeline
    /// composite, whose input ring is an alias of an internal filter's ring
    /// and which has no worker of its own.
    pub(crate) fn with_input_rings(
        config: FilterConfig,
        inputs: Vec<Arc<BatchRing>>,
        worker: Option<Worker>,
    ) -> Result<Arc<Self>, Ec> {
        config.validate()?;
        Ok(Self::assemble(config, inputs, worker))
    }

    fn assemble(
        config: FilterConfig,
        inputs: Vec<Arc<BatchRing>>,
        worker: Option<Worker>,
    ) -> Arc<Self> {
        let n_inputs = inputs.len();
        Arc::new(Self {
            name: config.name,
            timeout_us: config.timeout_us,
            inputs,
            max_sinks: config.max_sinks,
            sinks: Mutex::new(SinkTable {
                slots: vec![None; config.max_sinks],
                n_sinks: 0,
            }),
            running: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            diag: Mutex::new(None),
            metrics: FilterMetrics::new(),
            contract: Mutex::new(FilterContract::new()),
            props: Mutex::new(PortProperties {
                inputs: vec![None; n_inputs],
                outputs: vec![None; config.max_sinks],
            }),
            worker: Mutex::new(worker),
            thread: Mutex::new(None),
        })
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // ACCESSORS
    // ---------------------------------------------------------------------

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeout for the worker's blocking calls, microseconds.
    #[inline]
    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn max_sinks(&self) -> usize {
        self.max_sinks
    }

    /// Input ring of `port`.
    pub fn input(&self, port: usize) -> Result<&Arc<BatchRing>, Ec> {
        self.inputs.get(port).ok_or(Ec::NoInput)
    }

    /// Shared handle to the input ring of `port`, for wiring an upstream
    /// filter's sink to it.
    pub fn input_ring(&self, port: usize) -> Result<Arc<BatchRing>, Ec> {
        self.input(port).map(Arc::clone)
    }

    /// Connected sink rings, in slot order.
    pub fn sinks(&self) -> Vec<Arc<BatchRing>> {
        Self::lock(&self.sinks).slots.iter().flatten().cloned().collect()
    }

    /// Sink ring in `slot`, if connected.
    pub fn sink(&self, slot: usize) -> Option<Arc<BatchRing>> {
        Self::lock(&self.sinks).slots.get(slot).and_then(Clone::clone)
    }

    /// Number of connected sinks.
    pub fn n_sinks(&self) -> usize {
        Self::lock(&self.sinks).n_sinks
    }

    /// `true` while the worker should keep processing.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claims the running flag. Returns the previous value.
    pub(crate) fn begin_run(&self) -> bool {
        self.running.swap(true, Ordering::AcqRel)
    }

    /// Clears the running flag.
    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn metrics(&self) -> &FilterMetrics {
        &self.metrics
    }

    /// Sum of input-ring occupancies.
    pub fn backlog(&self) -> usize {
        self.inputs.iter().map(|ring| ring.occupancy()).sum()
    }

    /// Lock-free health check: `Failed` once the worker has recorded a
    /// non-OK diagnostic.
    pub fn health(&self) -> Health {
        if self.failed.load(Ordering::Acquire) {
            Health::Failed
        } else {
            Health::Healthy
        }
    }

    /// Clone of the recorded diagnostic, if any.
    pub fn error(&self) -> Option<WorkerError> {
        Self::lock(&self.diag).clone()
    }

    /// Records the worker's diagnostic. First non-OK record wins.
    pub fn record_failure(&self, error: WorkerError) {
        let mut diag = Self::lock(&self.diag);
        if diag.is_none() {
            log::warn!("filter '{}' failed: {error}", self.name);
            *diag = Some(error);
            self.failed.store(true, Ordering::Release);
        }
    }

    // ---------------------------------------------------------------------
    // CONTRACT & PROPERTIES
    // ---------------------------------------------------------------------

    /// Declares an input constraint.
    pub fn declare_constraint(&self, constraint: InputConstraint) -> Result<(), Ec> {
        Self::lock(&self.contract).push_constraint(constraint)
    }

    /// Declares an output behavior.
    pub fn declare_behavior(&self, behavior: OutputBehavior) -> Result<(), Ec> {
        Self::lock(&self.contract).push_behavior(behavior)
    }

    /// Snapshot of the declared contract.
    pub fn contract(&self) -> FilterContract {
        Self::lock(&self.contract).clone()
    }

    /// Stores the property table validated for an input port.
    pub fn set_input_properties(&self, port: usize, table: PropertyTable) {
        let mut props = Self::lock(&self.props);
        if let Some(slot) = props.inputs.get_mut(port) {
            *slot = Some(table);
        }
    }

    /// Property table attached to an input port, if validated.
    pub fn input_properties(&self, port: usize) -> Option<PropertyTable> {
        Self::lock(&self.props).inputs.get(port).and_then(Clone::clone)
    }

    /// Stores the property table propagated to an output port.
    pub fn set_output_properties(&self, port: usize, table: PropertyTable) {
        let mut props = Self::lock(&self.props);
        if let Some(slot) = props.outputs.get_mut(port) {
            *slot = Some(table);
        }
    }

    /// Property table leaving an output port, if propagated.
    pub fn output_properties(&self, port: usize) -> Option<PropertyTable> {
        Self::lock(&self.props).outputs.get(port).and_then(Clone::clone)
    }

    // ---------------------------------------------------------------------
    // SINK WIRING
    // ---------------------------------------------------------------------

    /// Stores `ring` in sink slot `sink_idx`.
    ///
    /// Fails with [`Ec::InvalidSinkIdx`] for an out-of-range slot or
    /// [`Ec::ConnectionOccupied`] if the slot is taken.
    pub fn connect_sink(&self, sink_idx: usize, ring: Arc<BatchRing>) -> Result<(), Ec> {
        let mut table = Self::lock(&self.sinks);
        let slot = table.slots.get_mut(sink_idx).ok_or(Ec::InvalidSinkIdx)?;
        if slot.is_some() {
            return Err(Ec::ConnectionOccupied);
        }
        *slot = Some(ring);
        table.n_sinks += 1;
        log::debug!("filter '{}': sink {} connected", self.name, sink_idx);
        Ok(())
    }

    /// Clears sink slot `sink_idx`.
    ///
    /// Fails with [`Ec::InvalidSinkIdx`] for an out-of-range slot or
    /// [`Ec::NoSink`] if the slot is already empty.
    pub fn disconnect_sink(&self, sink_idx: usize) -> Result<(), Ec> {
        let mut table = Self::lock(&self.sinks);
        let slot = table.slots.get_mut(sink_idx).ok_or(Ec::InvalidSinkIdx)?;
        if slot.take().is_none() {
            return Err(Ec::NoSink);
        }
        table.n_sinks -= 1;
        log::debug!("filter '{}': sink {} disconnected", self.name, sink_idx);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Default `start`: spawn one worker thread named after the filter.
    pub fn default_start(core: &Arc<Self>) -> Result<(), Ec> {
        let mut thread_slot = Self::lock(&core.thread);

        if core.running.swap(true, Ordering::AcqRel) {
            return Err(Ec::AlreadyRunning);
        }

        // Retire a previous run's thread before looking at the worker slot:
        // an exiting worker parks its closure back only on full exit.
        if let Some(stale) = thread_slot.take() {
            let _ = stale.join();
        }
        if Self::lock(&core.worker).is_none() {
            core.running.store(false, Ordering::Release);
            return Err(Ec::InvalidConfigWorker);
        }

        *Self::lock(&core.diag) = None;
        core.failed.store(false, Ordering::Release);
        for ring in &core.inputs {
            ring.start();
        }

        let thread_core = Arc::clone(core);
        let spawned = thread::Builder::new()
            .name(core.name.clone())
            .spawn(move || Self::run_worker(&thread_core));

        match spawned {
            Ok(handle) => {
                *thread_slot = Some(handle);
                log::debug!("filter '{}' started", core.name);
                Ok(())
            }
            Err(_) => {
                core.running.store(false, Ordering::Release);
                Err(Ec::ThreadCreateFail)
            }
        }
    }

    fn run_worker(core: &Arc<Self>) {
        let Some(mut worker) = Self::lock(&core.worker).take() else {
            core.record_failure(worker_error!(Ec::InvalidConfigWorker, "worker missing at start"));
            core.running.store(false, Ordering::Release);
            return;
        };

        log::debug!("worker '{}' running", core.name);
        match worker(core.as_ref()) {
            Ok(()) => log::debug!("worker '{}' exited cleanly", core.name),
            Err(error) => core.record_failure(error),
        }

        core.running.store(false, Ordering::Release);
        // Park the worker so the filter can be restarted.
        *Self::lock(&core.worker) = Some(worker);
    }

    /// Default `stop`: clear `running`, wake this filter's worker wherever
    /// it can be blocked with a one-shot [`Ec::FilterStopping`], then join.
    ///
    /// The worker only ever waits on the consumer side of its own input
    /// rings and the producer side of its sinks, so exactly those sides are
    /// force-returned. The producer side of an input ring belongs to an
    /// upstream filter's worker and is left alone; sink rings are owned by
    /// downstream filters and keep running.
    pub fn default_stop(&self) -> Result<(), Ec> {
        if self.running.swap(false, Ordering::AcqRel) {
            for ring in &self.inputs {
                ring.force_return_tail(Ec::FilterStopping);
            }
            for sink in self.sinks() {
                sink.force_return_head(Ec::FilterStopping);
            }
        }

        let handle = Self::lock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // A worker must not stop (and join) itself.
                return Err(Ec::PhaseError);
            }
            handle.join().map_err(|_| Ec::ThreadJoinFail)?;
            log::debug!("filter '{}' stopped", self.name);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // WORKER HELPERS
    // ---------------------------------------------------------------------

    /// Forwards one COMPLETE batch to every connected sink, retrying
    /// timeouts while the filter is running.
    pub fn forward_complete(&self) {
        for sink in self.sinks() {
            {
                let mut head = sink.get_head();
                head.reset();
                head.ec = Ec::Complete;
            }
            loop {
                match sink.submit(self.timeout_us) {
                    Ok(()) => break,
                    Err(Ec::Timeout) if self.is_running() => {}
                    Err(code) => {
                        log::debug!(
                            "filter '{}': complete not delivered to a sink: {}",
                            self.name,
                            code.name()
                        );
                        break;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for FilterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCore")
            .field("name", &self.name)
            .field("n_inputs", &self.n_inputs())
            .field("n_sinks", &self.n_sinks())
            .field("running", &self.is_running())
            .field("health", &self.health())
            .finish()
    }
}

/// The ops table every filter exposes.
///
/// Default method bodies implement the framework behavior; subtypes
/// override the hooks they specialize (a re-batching filter hooks
/// `sink_connect`, the pipeline composite overrides `start`/`stop`).
pub trait FilterOps: Send + Sync {
    /// The shared core embedded in this filter.
    fn core(&self) -> &Arc<FilterCore>;

    /// Starts the worker thread. [`Ec::AlreadyRunning`] if started twice.
    fn start(&self) -> Result<(), Ec> {
        FilterCore::default_start(self.core())
    }

    /// Stops and joins the worker, waking it wherever it is blocked.
    fn stop(&self) -> Result<(), Ec> {
        self.core().default_stop()
    }

    /// Wires `ring` into sink slot `sink_idx`.
    fn sink_connect(&self, sink_idx: usize, ring: Arc<BatchRing>) -> Result<(), Ec> {
        self.core().connect_sink(sink_idx, ring)
    }

    /// Removes the connection in sink slot `sink_idx`.
    fn sink_disconnect(&self, sink_idx: usize) -> Result<(), Ec> {
        self.core().disconnect_sink(sink_idx)
    }

    /// Validates upstream properties against this filter's declared
    /// constraints for `input_port`.
    fn validate_connection(
        &self,
        upstream: &PropertyTable,
        input_port: usize,
    ) -> Result<(), PropertyError> {
        properties::validate_connection(upstream, &self.core().contract(), input_port)
    }

    /// Framework metrics, overlaid by subtypes with their own statistics.
    fn stats(&self) -> FilterStats {
        self.core().metrics().snapshot()
    }

    /// Lock-free worker health.
    fn health(&self) -> Health {
        self.core().health()
    }

    /// Batches buffered across all input rings.
    fn backlog(&self) -> usize {
        self.core().backlog()
    }

    /// Flushes buffered state to the sinks, where the subtype has any.
    fn flush(&self) -> Result<(), Ec> {
        Err(Ec::NotImplemented)
    }

    /// Blocks until the backlog is drained, where the subtype supports it.
    fn drain(&self, _timeout_us: u64) -> Result<(), Ec> {
        Err(Ec::NotImplemented)
    }

    /// Resets subtype state between runs, where supported.
    fn reset(&self) -> Result<(), Ec> {
        Err(Ec::NotImplemented)
    }

    /// Applies a new configuration, where the subtype supports it.
    fn reconfigure(&self, _config: &FilterConfig) -> Result<(), Ec> {
        Err(Ec::NotImplemented)
    }

    /// One-line description of the filter.
    fn describe(&self) -> String {
        let core = self.core();
        format!(
            "{}: {} input(s), {} sink(s)",
            core.name(),
            core.n_inputs(),
            core.n_sinks()
        )
    }

    /// Multi-line diagnostic dump of the runtime state.
    fn dump_state(&self) -> String {
        let core = self.core();
        let stats = self.stats();
        let mut out = format!(
            "{}\n  running: {}\n  health: {:?}\n  backlog: {}\n  batches: {}\n  samples: {}\n",
            self.describe(),
            core.is_running(),
            self.health(),
            self.backlog(),
            stats.n_batches,
            stats.samples_processed,
        );
        if let Some(error) = core.error() {
            out.push_str(&format!("  error: {error}\n"));
        }
        out
    }
}

/// Concrete filter driving a worker closure with the default ops.
///
/// Subtype filters wrap a `WorkerFilter` (composition) and re-expose
/// [`FilterOps`], overriding the hooks they need.
pub struct WorkerFilter {
    core: Arc<FilterCore>,
}

impl WorkerFilter {
    /// Builds the filter and its input rings.
    pub fn new<W>(config: FilterConfig, worker: W) -> Result<Self, Ec>
    where
        W: FnMut(&FilterCore) -> Result<(), WorkerError> + Send + 'static,
    {
        Ok(Self { core: FilterCore::new(config, Box::new(worker))? })
    }
}

impl FilterOps for WorkerFilter {
    fn core(&self) -> &Arc<FilterCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use std::time::Duration;

    fn config(name: &str) -> FilterConfig {
        FilterConfig::new(name, RingConfig::new(DType::F32, 3, 2)).with_timeout_us(5_000)
    }

    fn idle_worker() -> impl FnMut(&FilterCore) -> Result<(), WorkerError> + Send + 'static {
        |core: &FilterCore| {
            while core.is_running() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config("ok").validate().is_ok());
        assert_eq!(config("").validate().unwrap_err(), Ec::InvalidConfigName);
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(config(&long).validate().unwrap_err(), Ec::InvalidConfigName);
        assert_eq!(
            config("f").with_inputs(MAX_INPUTS + 1).validate().unwrap_err(),
            Ec::InvalidConfigMaxInputs
        );
        assert_eq!(
            config("f").with_max_sinks(MAX_SINKS + 1).validate().unwrap_err(),
            Ec::InvalidConfigMaxSinks
        );
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let filter = WorkerFilter::new(config("idle"), idle_worker()).unwrap();
        assert!(!filter.core().is_running());

        filter.start().unwrap();
        assert!(filter.core().is_running());
        assert_eq!(filter.start().unwrap_err(), Ec::AlreadyRunning);

        filter.stop().unwrap();
        assert!(!filter.core().is_running());
        assert_eq!(filter.health(), Health::Healthy);

        // Stopping a stopped filter is fine, and it can be restarted.
        filter.stop().unwrap();
        filter.start().unwrap();
        filter.stop().unwrap();
    }

    #[test]
    fn test_worker_failure_marks_health() {
        let filter = WorkerFilter::new(config("broken"), |_core: &FilterCore| {
            Err(worker_error!(Ec::NoSink, "nothing to feed"))
        })
        .unwrap();

        filter.start().unwrap();
        filter.stop().unwrap();

        assert_eq!(filter.health(), Health::Failed);
        let error = filter.core().error().expect("diagnostic recorded");
        assert_eq!(error.code, Ec::NoSink);
        assert!(error.message.unwrap().contains("nothing to feed"));
    }

    #[test]
    fn test_restart_clears_diagnostics() {
        let fail_once = {
            let mut first = true;
            move |_core: &FilterCore| {
                if first {
                    first = false;
                    Err(worker_error!(Ec::NoSink))
                } else {
                    Ok(())
                }
            }
        };
        let filter = WorkerFilter::new(config("flaky"), fail_once).unwrap();

        filter.start().unwrap();
        filter.stop().unwrap();
        assert_eq!(filter.health(), Health::Failed);

        filter.start().unwrap();
        filter.stop().unwrap();
        assert_eq!(filter.health(), Health::Healthy);
        assert!(filter.core().error().is_none());
    }

    #[test]
    fn test_sink_wiring() {
        let filter = WorkerFilter::new(config("wired"), idle_worker()).unwrap();
        let downstream = WorkerFilter::new(config("down"), idle_worker()).unwrap();
        let ring = downstream.core().input_ring(0).unwrap();

        assert_eq!(
            filter.sink_connect(MAX_SINKS + 1, Arc::clone(&ring)).unwrap_err(),
            Ec::InvalidSinkIdx
        );

        filter.sink_connect(0, Arc::clone(&ring)).unwrap();
        assert_eq!(filter.core().n_sinks(), 1);
        assert_eq!(
            filter.sink_connect(0, ring).unwrap_err(),
            Ec::ConnectionOccupied
        );

        filter.sink_disconnect(0).unwrap();
        assert_eq!(filter.core().n_sinks(), 0);
        assert_eq!(filter.sink_disconnect(0).unwrap_err(), Ec::NoSink);
    }

    #[test]
    fn test_stop_wakes_blocked_worker() {
        // Worker blocks indefinitely on its empty input ring.
        let filter = WorkerFilter::new(
            config("blocked").with_timeout_us(0),
            |core: &FilterCore| {
                let input = core.input(0).map_err(|code| worker_error!(code))?;
                loop {
                    match input.get_tail(core.timeout_us()) {
                        Ok(tail) => {
                            tail.release().map_err(|code| worker_error!(code))?;
                        }
                        Err(code) if code.is_shutdown() => return Ok(()),
                        Err(Ec::Timeout) => {}
                        Err(code) => return Err(worker_error!(code)),
                    }
                }
            },
        )
        .unwrap();

        filter.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // Join succeeds because stop force-returns the blocked wait.
        filter.stop().unwrap();
        assert_eq!(filter.health(), Health::Healthy);
    }

    #[test]
    fn test_backlog_counts_input_occupancy() {
        let filter = WorkerFilter::new(config("backlog"), idle_worker()).unwrap();
        let input = filter.core().input(0).unwrap();
        input.get_head().batch_id = 1;
        input.submit(0).unwrap();
        input.get_head().batch_id = 2;
        input.submit(0).unwrap();
        assert_eq!(filter.backlog(), 2);
    }

    #[test]
    fn test_describe_and_dump_state() {
        let filter = WorkerFilter::new(config("probe"), idle_worker()).unwrap();
        assert!(filter.describe().contains("probe"));
        assert!(filter.dump_state().contains("running: false"));
    }
}
