//! Signal-property contract system.
//!
//! Filters declare what they require of their inputs (constraints) and what
//! they guarantee on their outputs (behaviors). Connection validation runs
//! at wiring / pre-start time so incompatible graphs fail before any sample
//! flows; propagation carries property tables through a pipeline DAG so
//! downstream constraints see accurate metadata.

use crate::config::{RingConfig, MAX_BEHAVIORS, MAX_CONSTRAINTS};
use crate::dtype::DType;
use crate::error::Ec;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Number of known signal properties.
pub const N_PROPERTIES: usize = 4;

/// Typed metadata attached to a filter port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalProperty {
    /// Sample data type of the stream.
    DataType,
    /// Smallest batch fill the producer will emit.
    MinBatchCapacity,
    /// Largest batch fill the producer will emit.
    MaxBatchCapacity,
    /// Sampling period in nanoseconds; 0 means variable / unknown rate.
    SamplePeriodNs,
}

impl SignalProperty {
    /// All known properties, in table order.
    pub const ALL: [SignalProperty; N_PROPERTIES] = [
        SignalProperty::DataType,
        SignalProperty::MinBatchCapacity,
        SignalProperty::MaxBatchCapacity,
        SignalProperty::SamplePeriodNs,
    ];

    #[inline]
    const fn index(self) -> usize {
        match self {
            SignalProperty::DataType => 0,
            SignalProperty::MinBatchCapacity => 1,
            SignalProperty::MaxBatchCapacity => 2,
            SignalProperty::SamplePeriodNs => 3,
        }
    }

    /// Static diagnostic name.
    pub const fn name(self) -> &'static str {
        match self {
            SignalProperty::DataType => "DATA_TYPE",
            SignalProperty::MinBatchCapacity => "MIN_BATCH_CAPACITY",
            SignalProperty::MaxBatchCapacity => "MAX_BATCH_CAPACITY",
            SignalProperty::SamplePeriodNs => "SAMPLE_PERIOD_NS",
        }
    }
}

impl fmt::Display for SignalProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a signal property. The variant is selected by property
/// identity: `DataType` carries a dtype, the capacities a `u32`, the sample
/// period a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropValue {
    DType(DType),
    U32(u32),
    U64(u64),
}

impl PropValue {
    /// Ordering between values of the same kind. Dtypes compare for
    /// equality only; mixed kinds do not compare.
    fn compare(self, other: PropValue) -> Option<Ordering> {
        match (self, other) {
            (PropValue::DType(a), PropValue::DType(b)) => (a == b).then_some(Ordering::Equal),
            (PropValue::U32(a), PropValue::U32(b)) => Some(a.cmp(&b)),
            (PropValue::U64(a), PropValue::U64(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::DType(dtype) => write!(f, "{dtype}"),
            PropValue::U32(v) => write!(f, "{v}"),
            PropValue::U64(v) => write!(f, "{v}"),
        }
    }
}

/// Fixed-indexed table with one optional entry per known property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyTable {
    entries: [Option<PropValue>; N_PROPERTIES],
}

impl PropertyTable {
    /// Table with every property unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Extracts the properties a ring configuration implies: the dtype plus
    /// min = max batch capacity. The sample period must be set separately by
    /// the owning filter.
    pub fn from_ring_config(cfg: &RingConfig) -> Self {
        let mut table = Self::unknown();
        table.set(SignalProperty::DataType, PropValue::DType(cfg.dtype));
        let capacity = PropValue::U32(cfg.batch_capacity() as u32);
        table.set(SignalProperty::MinBatchCapacity, capacity);
        table.set(SignalProperty::MaxBatchCapacity, capacity);
        table
    }

    /// Value of `property`, if known.
    #[inline]
    pub fn get(&self, property: SignalProperty) -> Option<PropValue> {
        self.entries[property.index()]
    }

    /// `true` if `property` has a known value.
    #[inline]
    pub fn is_known(&self, property: SignalProperty) -> bool {
        self.get(property).is_some()
    }

    /// Sets `property` to `value`.
    pub fn set(&mut self, property: SignalProperty, value: PropValue) {
        self.entries[property.index()] = Some(value);
    }

    /// Copies `property`'s entry (known or not) from `other`.
    pub fn copy_entry(&mut self, property: SignalProperty, other: &PropertyTable) {
        self.entries[property.index()] = other.get(property);
    }

    /// Clears `property` back to unknown.
    pub fn clear(&mut self, property: SignalProperty) {
        self.entries[property.index()] = None;
    }

    /// Sets the sample period, the piece a ring configuration cannot supply.
    pub fn set_sample_period_ns(&mut self, period_ns: u64) {
        self.set(SignalProperty::SamplePeriodNs, PropValue::U64(period_ns));
    }
}

/// Bitmask selecting the ports a constraint or behavior applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMask(pub u32);

impl PortMask {
    /// Every port.
    pub const ALL: PortMask = PortMask(u32::MAX);

    /// Mask selecting a single port.
    #[inline]
    pub const fn single(port: usize) -> Self {
        PortMask(1 << port)
    }

    /// `true` if `port` is selected.
    #[inline]
    pub const fn contains(self, port: usize) -> bool {
        self.0 & (1 << port) != 0
    }

    /// Mask with `port` added.
    #[inline]
    pub const fn with(self, port: usize) -> Self {
        PortMask(self.0 | (1 << port))
    }
}

/// Relation an input constraint demands of an upstream property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// The property must be known.
    Exists,
    /// The property must equal the operand.
    Eq(PropValue),
    /// The property must be ≥ the operand.
    Gte(PropValue),
    /// The property must be ≤ the operand.
    Lte(PropValue),
    /// The property must agree across all masked input ports. Checked at
    /// connection time against lower-indexed, already-connected ports.
    MultiInputAligned,
}

/// Declared requirement on the properties arriving at masked input ports.
#[derive(Debug, Clone, Copy)]
pub struct InputConstraint {
    pub property: SignalProperty,
    pub op: ConstraintOp,
    pub input_mask: PortMask,
}

/// How a filter derives an output property from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorOp {
    /// The output property takes the operand value.
    Set(PropValue),
    /// The output property copies the entry of the given input port
    /// (falling back to input 0 when out of range).
    Preserve(usize),
}

/// Declared guarantee on the properties leaving masked output ports.
#[derive(Debug, Clone, Copy)]
pub struct OutputBehavior {
    pub property: SignalProperty,
    pub op: BehaviorOp,
    pub output_mask: PortMask,
}

/// A filter's declared input constraints and output behaviors.
#[derive(Debug, Clone, Default)]
pub struct FilterContract {
    constraints: Vec<InputConstraint>,
    behaviors: Vec<OutputBehavior>,
}

impl FilterContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input constraint. Bounded by [`MAX_CONSTRAINTS`].
    pub fn push_constraint(&mut self, constraint: InputConstraint) -> Result<(), Ec> {
        if self.constraints.len() >= MAX_CONSTRAINTS {
            return Err(Ec::InvalidConfig);
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Appends an output behavior. Bounded by [`MAX_BEHAVIORS`].
    pub fn push_behavior(&mut self, behavior: OutputBehavior) -> Result<(), Ec> {
        if self.behaviors.len() >= MAX_BEHAVIORS {
            return Err(Ec::InvalidConfig);
        }
        self.behaviors.push(behavior);
        Ok(())
    }

    pub fn constraints(&self) -> &[InputConstraint] {
        &self.constraints
    }

    pub fn behaviors(&self) -> &[OutputBehavior] {
        &self.behaviors
    }
}

/// A violated property constraint, with the human-readable explanation
/// surfaced by diagnostics. Maps onto [`Ec::PropertyMismatch`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("property {property} is not known upstream")]
    Unknown { property: SignalProperty },

    #[error("property {property} mismatch: expected {relation} {expected}, actual {actual}")]
    Mismatch {
        property: SignalProperty,
        relation: &'static str,
        expected: PropValue,
        actual: PropValue,
    },

    #[error(
        "property {property} not aligned across inputs: port {port_a} has {value_a}, port {port_b} has {value_b}"
    )]
    NotAligned {
        property: SignalProperty,
        port_a: usize,
        value_a: PropValue,
        port_b: usize,
        value_b: PropValue,
    },
}

impl PropertyError {
    /// Canonical code for this violation.
    pub const fn ec(&self) -> Ec {
        Ec::PropertyMismatch
    }
}

/// Validates the properties advertised by an upstream port against the
/// constraints a downstream contract declares for `input_port`.
///
/// `MultiInputAligned` constraints are skipped here; they are evaluated by
/// [`validate_multi_input_alignment`] once the port's peers are known.
///
/// Pure: no hidden state, same inputs give the same result.
pub fn validate_connection(
    upstream: &PropertyTable,
    contract: &FilterContract,
    input_port: usize,
) -> Result<(), PropertyError> {
    for constraint in contract.constraints() {
        if !constraint.input_mask.contains(input_port) {
            continue;
        }

        let property = constraint.property;
        match constraint.op {
            ConstraintOp::Exists => {
                if !upstream.is_known(property) {
                    return Err(PropertyError::Unknown { property });
                }
            }
            ConstraintOp::Eq(expected) => {
                check_relation(upstream, property, expected, "==", |ord| ord == Ordering::Equal)?;
            }
            ConstraintOp::Gte(expected) => {
                check_relation(upstream, property, expected, ">=", |ord| ord != Ordering::Less)?;
            }
            ConstraintOp::Lte(expected) => {
                check_relation(upstream, property, expected, "<=", |ord| ord != Ordering::Greater)?;
            }
            ConstraintOp::MultiInputAligned => {}
        }
    }
    Ok(())
}

fn check_relation(
    upstream: &PropertyTable,
    property: SignalProperty,
    expected: PropValue,
    relation: &'static str,
    accept: impl Fn(Ordering) -> bool,
) -> Result<(), PropertyError> {
    let actual = upstream
        .get(property)
        .ok_or(PropertyError::Unknown { property })?;

    match actual.compare(expected) {
        Some(ord) if accept(ord) => Ok(()),
        _ => Err(PropertyError::Mismatch { property, relation, expected, actual }),
    }
}

/// Enforces `MultiInputAligned` constraints for `input_port` against the
/// lower-indexed ports whose property tables are already attached.
///
/// `tables` holds one entry per input port; `None` marks a port that is not
/// connected yet. Ports whose value for the constrained property is unknown
/// are skipped — authors pair alignment with `Exists` when presence is
/// mandatory.
pub fn validate_multi_input_alignment(
    tables: &[Option<PropertyTable>],
    contract: &FilterContract,
    input_port: usize,
) -> Result<(), PropertyError> {
    let Some(Some(mine)) = tables.get(input_port) else {
        return Ok(());
    };

    for constraint in contract.constraints() {
        if !matches!(constraint.op, ConstraintOp::MultiInputAligned)
            || !constraint.input_mask.contains(input_port)
        {
            continue;
        }

        let property = constraint.property;
        let Some(value) = mine.get(property) else {
            continue;
        };

        for (port, table) in tables[..input_port].iter().enumerate() {
            if !constraint.input_mask.contains(port) {
                continue;
            }
            let Some(other) = table.as_ref().and_then(|t| t.get(property)) else {
                continue;
            };
            if other != value {
                return Err(PropertyError::NotAligned {
                    property,
                    port_a: port,
                    value_a: other,
                    port_b: input_port,
                    value_b: value,
                });
            }
        }
    }
    Ok(())
}

/// Constructs the property table leaving `output_port`.
///
/// With no inputs the table starts all-unknown; otherwise it starts as a
/// copy of input 0 (default inheritance). Each behavior whose mask covers
/// `output_port` then applies: `Set` stores the operand, `Preserve` copies
/// the chosen input's entry.
pub fn propagate(
    inputs: &[PropertyTable],
    contract: &FilterContract,
    output_port: usize,
) -> PropertyTable {
    let mut out = inputs.first().cloned().unwrap_or_else(PropertyTable::unknown);

    for behavior in contract.behaviors() {
        if !behavior.output_mask.contains(output_port) {
            continue;
        }
        match behavior.op {
            BehaviorOp::Set(value) => out.set(behavior.property, value),
            BehaviorOp::Preserve(input) => {
                let source = inputs.get(input).or_else(|| inputs.first());
                if let Some(source) = source {
                    out.copy_entry(behavior.property, source);
                }
            }
        }
    }
    out
}

/// Converts a sample rate in Hz to a period in nanoseconds. 0 (or a
/// non-positive rate) maps to the reserved "variable / unknown" period 0.
pub fn rate_hz_to_period_ns(rate_hz: f64) -> u64 {
    if rate_hz <= 0.0 {
        return 0;
    }
    (1.0e9 / rate_hz).round() as u64
}

/// Converts a period in nanoseconds to a sample rate in Hz. The reserved
/// period 0 maps to 0.0.
pub fn period_ns_to_rate_hz(period_ns: u64) -> f64 {
    if period_ns == 0 {
        return 0.0;
    }
    1.0e9 / period_ns as f64
}
