//! Pipeline composite filter.
//!
//! A [`Pipeline`] presents a DAG of internal filters and their point-to-point
//! ring connections as a single [`FilterOps`] filter. Internal connections
//! share ring buffers directly (an upstream sink slot holds the downstream
//! filter's input ring), and the pipeline's own input is an alias of the
//! designated entry filter's input ring, so no copy crosses the composite
//! boundary.
//!
//! Before starting, [`Pipeline::validate_properties`] walks the DAG in
//! topological order, propagating property tables from sources downstream
//! and validating every connection against the receiving filter's contract.

use crate::config::{RingConfig, MAX_NAME_LEN};
use crate::error::Ec;
use crate::filter::{FilterConfig, FilterCore, FilterOps, Health};
use crate::properties::{propagate, validate_multi_input_alignment, PropertyTable};
use crate::ring::BatchRing;
use crate::stats::FilterStats;
use std::sync::{Arc, Mutex, PoisonError};

/// One internal edge: `filters[from]` sink `from_port` feeds
/// `filters[to]` input `to_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: usize,
    pub from_port: usize,
    pub to: usize,
    pub to_port: usize,
}

impl Connection {
    pub const fn new(from: usize, from_port: usize, to: usize, to_port: usize) -> Self {
        Self { from, from_port, to, to_port }
    }
}

/// Configuration of a [`Pipeline`].
///
/// `filters` are shared handles: ownership of the internal filters stays
/// with the caller, the pipeline only coordinates them. `input` / `output`
/// designate the externally visible endpoints by index into `filters`.
pub struct PipelineConfig {
    pub name: String,
    pub filters: Vec<Arc<dyn FilterOps>>,
    pub connections: Vec<Connection>,
    /// `(filter, input_port)` the pipeline's input aliases.
    pub input: (usize, usize),
    /// `(filter, output_port)` external sink connections forward to.
    pub output: (usize, usize),
    /// `(filter, input_port)` pairs fed from outside the pipeline. Used by
    /// nested pipelines; empty for a root pipeline.
    pub external_inputs: Vec<(usize, usize)>,
}

/// A filter composed of other filters connected by explicit edges.
pub struct Pipeline {
    core: Arc<FilterCore>,
    filters: Vec<Arc<dyn FilterOps>>,
    connections: Vec<Connection>,
    input: (usize, usize),
    output: (usize, usize),
    external_inputs: Vec<(usize, usize)>,
    /// Topological start order, computed by property validation.
    order: Mutex<Option<Vec<usize>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("filters", &self.filters.len())
            .field("connections", &self.connections)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("external_inputs", &self.external_inputs)
            .finish()
    }
}

impl Pipeline {
    /// Builds the composite: checks every referenced endpoint, wires the
    /// internal connections (rolling back on failure), and aliases the
    /// pipeline input to the entry filter's input ring.
    pub fn new(config: PipelineConfig) -> Result<Self, Ec> {
        let PipelineConfig { name, filters, connections, input, output, external_inputs } = config;

        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Ec::InvalidConfigName);
        }
        if filters.is_empty() {
            return Err(Ec::ConfigRequired);
        }

        let in_range = |(filter, _): &(usize, usize)| *filter < filters.len();
        if !in_range(&input) || !in_range(&output) || !external_inputs.iter().all(in_range) {
            return Err(Ec::InvalidConfig);
        }
        for connection in &connections {
            let Connection { from, from_port, to, to_port } = *connection;
            if from >= filters.len() || to >= filters.len() {
                return Err(Ec::InvalidConfig);
            }
            if from_port >= filters[from].core().max_sinks() {
                return Err(Ec::InvalidSinkIdx);
            }
            if to_port >= filters[to].core().n_inputs() {
                return Err(Ec::NoInput);
            }
        }

        // Wire internal edges; undo everything on the first failure.
        for (wired, connection) in connections.iter().enumerate() {
            let ring = filters[connection.to].core().input_ring(connection.to_port)?;
            if let Err(code) = filters[connection.from].sink_connect(connection.from_port, ring) {
                for undone in connections[..wired].iter() {
                    let _ = filters[undone.from].sink_disconnect(undone.from_port);
                }
                return Err(code);
            }
        }

        // The pipeline's input ring IS the entry filter's input ring. An
        // entry filter with no inputs (a source) leaves the pipeline with
        // zero input ports.
        let entry = filters[input.0].core().input_ring(input.1).ok();
        let ring_config = entry
            .as_ref()
            .map_or_else(RingConfig::default, |ring| *ring.config());
        let core_config = FilterConfig {
            name,
            n_inputs: usize::from(entry.is_some()),
            max_sinks: 1,
            ring: ring_config,
            timeout_us: 0,
        };
        let core =
            FilterCore::with_input_rings(core_config, entry.into_iter().collect(), None)?;

        Ok(Self {
            core,
            filters,
            connections,
            input,
            output,
            external_inputs,
            order: Mutex::new(None),
        })
    }

    fn order_lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<usize>>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn filter_name(&self, index: usize) -> String {
        self.filters[index].core().name().to_string()
    }

    /// Validates the DAG's signal properties and computes the topological
    /// start order.
    ///
    /// Sources seed their output tables from their contracts; every other
    /// filter receives its upstream's propagated table per input port, has
    /// each connection validated against its constraints, has multi-input
    /// alignment enforced, and finally propagates its own outputs.
    pub fn validate_properties(&self) -> Result<(), Ec> {
        let n = self.filters.len();

        let mut upstream: Vec<Vec<Option<(usize, usize)>>> = self
            .filters
            .iter()
            .map(|filter| vec![None; filter.core().n_inputs()])
            .collect();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for connection in &self.connections {
            let slot = &mut upstream[connection.to][connection.to_port];
            if slot.is_some() {
                log::warn!(
                    "pipeline '{}': input {}:{} connected twice",
                    self.core.name(),
                    self.filter_name(connection.to),
                    connection.to_port
                );
                return Err(Ec::ConnectionOccupied);
            }
            *slot = Some((connection.from, connection.from_port));
            adjacency[connection.from].push(connection.to);
        }

        let is_root_pipeline = self.external_inputs.is_empty();
        if is_root_pipeline
            && !self.filters.iter().any(|filter| filter.core().n_inputs() == 0)
        {
            log::warn!("pipeline '{}': no source filter", self.core.name());
            return Err(Ec::InvalidConfig);
        }

        let order = self.topological_order(&upstream, &adjacency)?;

        let mut out_tables: Vec<Vec<Option<PropertyTable>>> = self
            .filters
            .iter()
            .map(|filter| vec![None; filter.core().max_sinks()])
            .collect();

        for &index in &order {
            let filter = &self.filters[index];
            let core = filter.core();
            let n_inputs = core.n_inputs();

            let mut in_tables: Vec<Option<PropertyTable>> = vec![None; n_inputs];
            for port in 0..n_inputs {
                let table = if let Some((up_filter, up_port)) = upstream[index][port] {
                    out_tables[up_filter][up_port]
                        .clone()
                        .ok_or(Ec::InvalidConfig)?
                } else if self.external_inputs.contains(&(index, port))
                    || (is_root_pipeline && (index, port) == self.input)
                {
                    // Fed from outside: nothing is known yet.
                    PropertyTable::unknown()
                } else {
                    log::warn!(
                        "pipeline '{}': input {}:{} is not connected",
                        self.core.name(),
                        self.filter_name(index),
                        port
                    );
                    return Err(Ec::InvalidConfig);
                };

                filter.validate_connection(&table, port).map_err(|violation| {
                    log::warn!(
                        "pipeline '{}': {} input {}: {}",
                        self.core.name(),
                        self.filter_name(index),
                        port,
                        violation
                    );
                    violation.ec()
                })?;

                core.set_input_properties(port, table.clone());
                in_tables[port] = Some(table);
            }

            let contract = core.contract();
            for port in 0..n_inputs {
                validate_multi_input_alignment(&in_tables, &contract, port).map_err(
                    |violation| {
                        log::warn!(
                            "pipeline '{}': {} inputs misaligned: {}",
                            self.core.name(),
                            self.filter_name(index),
                            violation
                        );
                        violation.ec()
                    },
                )?;
            }

            let inputs: Vec<PropertyTable> = in_tables.into_iter().flatten().collect();
            for port in 0..core.max_sinks() {
                let table = propagate(&inputs, &contract, port);
                core.set_output_properties(port, table.clone());
                out_tables[index][port] = Some(table);
            }
        }

        *self.order_lock() = Some(order);
        Ok(())
    }

    /// Depth-first topological sort rooted at sources, pipeline inputs, and
    /// filters with no internal upstream edge. Rejects cycles.
    fn topological_order(
        &self,
        upstream: &[Vec<Option<(usize, usize)>>],
        adjacency: &[Vec<usize>],
    ) -> Result<Vec<usize>, Ec> {
        let n = self.filters.len();
        let mut roots = Vec::new();
        for index in 0..n {
            let has_upstream = upstream[index].iter().any(Option::is_some);
            let is_mapped_input = self.input.0 == index
                || self.external_inputs.iter().any(|(filter, _)| *filter == index);
            if !has_upstream || is_mapped_input {
                roots.push(index);
            }
        }

        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; n];
        let mut post_order = Vec::with_capacity(n);
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in roots {
            if color[root] != WHITE {
                continue;
            }
            color[root] = GRAY;
            stack.push((root, 0));
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if frame.1 < adjacency[node].len() {
                    let child = adjacency[node][frame.1];
                    frame.1 += 1;
                    match color[child] {
                        WHITE => {
                            color[child] = GRAY;
                            stack.push((child, 0));
                        }
                        GRAY => {
                            log::warn!(
                                "pipeline '{}': cycle through '{}'",
                                self.core.name(),
                                self.filter_name(child)
                            );
                            return Err(Ec::InvalidConfig);
                        }
                        _ => {}
                    }
                } else {
                    color[node] = BLACK;
                    post_order.push(node);
                    stack.pop();
                }
            }
        }

        // A node no root reaches can only sit on a cycle.
        if color.iter().any(|&c| c == WHITE) {
            log::warn!("pipeline '{}': unreachable filters (cycle)", self.core.name());
            return Err(Ec::InvalidConfig);
        }

        post_order.reverse();
        Ok(post_order)
    }

    fn start_internal(&self) -> Result<(), Ec> {
        self.validate_properties()?;
        let order = self.order_lock().clone().unwrap_or_default();

        for (started, &index) in order.iter().enumerate() {
            if let Err(code) = self.filters[index].start() {
                log::warn!(
                    "pipeline '{}': start of '{}' failed ({}), rolling back",
                    self.core.name(),
                    self.filter_name(index),
                    code.name()
                );
                for &undone in order[..started].iter().rev() {
                    let _ = self.filters[undone].stop();
                }
                return Err(code);
            }
        }
        log::debug!("pipeline '{}' started {} filters", self.core.name(), order.len());
        Ok(())
    }
}

impl FilterOps for Pipeline {
    fn core(&self) -> &Arc<FilterCore> {
        &self.core
    }

    /// Validates properties, then starts the internal filters in
    /// topological order, rolling everything back on the first failure.
    fn start(&self) -> Result<(), Ec> {
        if self.core.begin_run() {
            return Err(Ec::AlreadyRunning);
        }
        self.start_internal().inspect_err(|_| self.core.end_run())
    }

    /// Stops the internal filters in reverse topological order. Every
    /// filter is attempted; the first failure code is reported.
    fn stop(&self) -> Result<(), Ec> {
        self.core.end_run();
        let order = self
            .order_lock()
            .clone()
            .unwrap_or_else(|| (0..self.filters.len()).collect());

        let mut result = Ok(());
        for &index in order.iter().rev() {
            if let Err(code) = self.filters[index].stop() {
                log::warn!(
                    "pipeline '{}': stop of '{}' failed: {}",
                    self.core.name(),
                    self.filter_name(index),
                    code.name()
                );
                if result.is_ok() {
                    result = Err(code);
                }
            }
        }
        result
    }

    /// External sink connections attach to the designated output filter.
    fn sink_connect(&self, sink_idx: usize, ring: Arc<BatchRing>) -> Result<(), Ec> {
        if sink_idx != 0 {
            return Err(Ec::InvalidSinkIdx);
        }
        self.filters[self.output.0].sink_connect(self.output.1, ring)
    }

    fn sink_disconnect(&self, sink_idx: usize) -> Result<(), Ec> {
        if sink_idx != 0 {
            return Err(Ec::InvalidSinkIdx);
        }
        self.filters[self.output.0].sink_disconnect(self.output.1)
    }

    /// Failed if any internal filter failed.
    fn health(&self) -> Health {
        if self.filters.iter().any(|filter| filter.health() == Health::Failed) {
            Health::Failed
        } else {
            Health::Healthy
        }
    }

    /// Aggregate of the internal filters' framework metrics.
    fn stats(&self) -> FilterStats {
        let mut total = FilterStats::default();
        for filter in &self.filters {
            let stats = filter.stats();
            total.n_batches += stats.n_batches;
            total.samples_processed += stats.samples_processed;
        }
        total
    }

    /// Batches buffered anywhere inside the pipeline.
    fn backlog(&self) -> usize {
        self.filters.iter().map(|filter| filter.backlog()).sum()
    }

    /// Emits the topology: nodes, edges, and the designated endpoints.
    fn describe(&self) -> String {
        let mut out = format!("pipeline '{}':", self.core.name());
        for connection in &self.connections {
            out.push_str(&format!(
                " {}.{}->{}.{}",
                self.filter_name(connection.from),
                connection.from_port,
                self.filter_name(connection.to),
                connection.to_port
            ));
        }
        out.push_str(&format!(
            " [in {}.{}, out {}.{}]",
            self.filter_name(self.input.0),
            self.input.1,
            self.filter_name(self.output.0),
            self.output.1
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::error::WorkerError;
    use crate::filter::WorkerFilter;
    use crate::worker_error;

    fn idle_filter(name: &str, n_inputs: usize, max_sinks: usize) -> Arc<dyn FilterOps> {
        let config = FilterConfig::new(name, RingConfig::new(DType::F32, 3, 2))
            .with_inputs(n_inputs)
            .with_max_sinks(max_sinks)
            .with_timeout_us(1_000);
        let filter = WorkerFilter::new(config, |core: &crate::FilterCore| {
            while core.is_running() {
                match core.input(0).map_err(|code| worker_error!(code))?.get_tail(core.timeout_us()) {
                    Ok(tail) => tail.release().map_err(|code| worker_error!(code))?,
                    Err(code) if code.is_shutdown() => return Ok(()),
                    Err(crate::Ec::Timeout) => {}
                    Err(code) => return Err(worker_error!(code)),
                }
            }
            Ok::<(), WorkerError>(())
        })
        .unwrap();
        Arc::new(filter)
    }

    fn source_filter(name: &str) -> Arc<dyn FilterOps> {
        let config = FilterConfig::new(name, RingConfig::new(DType::F32, 3, 2))
            .with_inputs(0)
            .with_max_sinks(1)
            .with_timeout_us(1_000);
        let filter = WorkerFilter::new(config, |core: &crate::FilterCore| {
            while core.is_running() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
        Arc::new(filter)
    }

    fn linear_config(
        filters: Vec<Arc<dyn FilterOps>>,
        connections: Vec<Connection>,
    ) -> PipelineConfig {
        let last = filters.len() - 1;
        PipelineConfig {
            name: "test".into(),
            filters,
            connections,
            input: (0, 0),
            output: (last, 0),
            external_inputs: Vec::new(),
        }
    }

    #[test]
    fn test_rejects_out_of_range_references() {
        let filters = vec![source_filter("a"), idle_filter("b", 1, 1)];
        let config = PipelineConfig {
            name: "bad".into(),
            filters,
            connections: vec![Connection::new(0, 0, 5, 0)],
            input: (0, 0),
            output: (1, 0),
            external_inputs: Vec::new(),
        };
        assert_eq!(Pipeline::new(config).unwrap_err(), Ec::InvalidConfig);
    }

    #[test]
    fn test_root_pipeline_requires_source() {
        let filters = vec![idle_filter("a", 1, 1), idle_filter("b", 1, 1)];
        let pipeline = Pipeline::new(linear_config(
            filters,
            vec![Connection::new(0, 0, 1, 0)],
        ))
        .unwrap();
        assert_eq!(pipeline.validate_properties().unwrap_err(), Ec::InvalidConfig);
    }

    #[test]
    fn test_cycle_detection() {
        let filters = vec![
            source_filter("src"),
            idle_filter("a", 2, 1),
            idle_filter("b", 1, 2),
        ];
        // src -> a, a -> b, b -> a: a/b form a cycle
        let pipeline = Pipeline::new(linear_config(
            filters,
            vec![
                Connection::new(0, 0, 1, 0),
                Connection::new(1, 0, 2, 0),
                Connection::new(2, 0, 1, 1),
            ],
        ))
        .unwrap();
        assert_eq!(pipeline.validate_properties().unwrap_err(), Ec::InvalidConfig);
    }

    #[test]
    fn test_double_connection_rejected() {
        let filters = vec![source_filter("src"), source_filter("src2"), idle_filter("sink", 1, 1)];
        let config = PipelineConfig {
            name: "dup".into(),
            filters,
            connections: vec![Connection::new(0, 0, 2, 0), Connection::new(1, 0, 2, 0)],
            input: (2, 0),
            output: (2, 0),
            external_inputs: Vec::new(),
        };
        // Second sink_connect targets the same input ring but a different
        // sink slot on a different filter, so wiring succeeds; validation
        // catches the doubly fed port.
        let pipeline = Pipeline::new(config).unwrap();
        assert_eq!(pipeline.validate_properties().unwrap_err(), Ec::ConnectionOccupied);
    }

    #[test]
    fn test_topological_order_and_describe() {
        let filters = vec![
            idle_filter("mid", 1, 1),
            source_filter("src"),
            idle_filter("end", 1, 1),
        ];
        let config = PipelineConfig {
            name: "topo".into(),
            filters,
            connections: vec![Connection::new(1, 0, 0, 0), Connection::new(0, 0, 2, 0)],
            input: (1, 0),
            output: (2, 0),
            external_inputs: Vec::new(),
        };
        let pipeline = Pipeline::new(config).unwrap();
        pipeline.validate_properties().unwrap();

        let order = pipeline.order_lock().clone().unwrap();
        let position = |i: usize| order.iter().position(|&x| x == i).unwrap();
        assert!(position(1) < position(0));
        assert!(position(0) < position(2));

        let description = pipeline.describe();
        assert!(description.contains("src.0->mid.0"));
        assert!(description.contains("mid.0->end.0"));
    }
}
