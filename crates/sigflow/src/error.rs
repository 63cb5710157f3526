//! Canonical error codes and the per-worker diagnostic record.
//!
//! Every fallible framework operation reports an [`Ec`]. Codes fall into
//! three planes:
//!
//! - **Status**: [`Ec::Ok`], [`Ec::Complete`], [`Ec::Stopped`] — not failures.
//!   `Complete` travels in-band on a batch as the end-of-stream sentinel.
//! - **Flow control**: [`Ec::Timeout`] is retryable; [`Ec::FilterStopping`]
//!   is delivered by a forced return during graceful shutdown and means
//!   "terminate the worker normally".
//! - **Errors**: configuration, wiring, and runtime failures.

use thiserror::Error;

/// Canonical error/status code.
///
/// Workers and buffer operations exchange these instead of rich error types
/// so a code can travel inside a [`Batch`](crate::Batch) and across thread
/// boundaries without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum Ec {
    /// Success / normal data batch.
    #[error("ok")]
    Ok,
    /// End-of-stream sentinel carried on a batch.
    #[error("stream complete")]
    Complete,
    /// The buffer (or filter) was stopped while waiting.
    #[error("stopped")]
    Stopped,

    /// A timed wait expired. Retryable.
    #[error("timed out")]
    Timeout,
    /// A condition-variable wait failed for an unexpected reason.
    #[error("condition wait failed unexpectedly")]
    CondWaitUnknown,
    /// Referenced input port does not exist.
    #[error("no such input")]
    NoInput,
    /// Not enough room in the destination batch.
    #[error("insufficient space in batch")]
    NoSpace,
    /// A filter that requires a sink has none connected.
    #[error("no sink connected")]
    NoSink,

    /// Typed sample access with the wrong sample type.
    #[error("sample type does not match buffer dtype")]
    TypeMismatch,
    /// Connected buffers carry different dtypes.
    #[error("dtype mismatch between connected buffers")]
    DtypeMismatch,
    /// Connected buffers carry incompatible batch capacities.
    #[error("batch capacity mismatch between connected buffers")]
    CapacityMismatch,

    /// Buffer configured with an undefined dtype.
    #[error("invalid dtype")]
    InvalidDtype,
    /// Configuration rejected at init.
    #[error("invalid configuration")]
    InvalidConfig,
    /// Missing or unusable worker function.
    #[error("invalid configuration: worker")]
    InvalidConfigWorker,
    /// Too many input ports requested.
    #[error("invalid configuration: max inputs exceeded")]
    InvalidConfigMaxInputs,
    /// Too many sink slots requested.
    #[error("invalid configuration: max sinks exceeded")]
    InvalidConfigMaxSinks,
    /// Rejected timeout value.
    #[error("invalid configuration: timeout")]
    InvalidConfigTimeout,
    /// Rejected filter name.
    #[error("invalid configuration: name")]
    InvalidConfigName,
    /// An operation that needs explicit configuration was called without it.
    #[error("configuration required")]
    ConfigRequired,

    /// `start` on a filter that is already running.
    #[error("already running")]
    AlreadyRunning,
    /// Worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    ThreadCreateFail,
    /// Worker thread panicked or could not be joined.
    #[error("failed to join worker thread")]
    ThreadJoinFail,

    /// `del_tail` on an empty buffer.
    #[error("buffer is empty")]
    BufferEmpty,
    /// Sink slot already holds a connection.
    #[error("sink slot already occupied")]
    ConnectionOccupied,
    /// Sink index out of range.
    #[error("sink index out of range")]
    InvalidSinkIdx,
    /// Duplicate registration.
    #[error("already registered")]
    AlreadyRegistered,
    /// Operation not supported by this filter.
    #[error("not implemented")]
    NotImplemented,
    /// Inconsistent lifecycle phase for the requested operation.
    #[error("operation invalid in current phase")]
    PhaseError,
    /// A declared property constraint was violated.
    #[error("signal property mismatch")]
    PropertyMismatch,
    /// Forced return issued while the owning filter shuts down.
    #[error("filter stopping")]
    FilterStopping,
}

impl Default for Ec {
    fn default() -> Self {
        Ec::Ok
    }
}

impl Ec {
    /// Static identifier-style name, stable for diagnostics and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Ec::Ok => "OK",
            Ec::Complete => "COMPLETE",
            Ec::Stopped => "STOPPED",
            Ec::Timeout => "TIMEOUT",
            Ec::CondWaitUnknown => "COND_WAIT_UNKNOWN",
            Ec::NoInput => "NO_INPUT",
            Ec::NoSpace => "NO_SPACE",
            Ec::NoSink => "NO_SINK",
            Ec::TypeMismatch => "TYPE_MISMATCH",
            Ec::DtypeMismatch => "DTYPE_MISMATCH",
            Ec::CapacityMismatch => "CAPACITY_MISMATCH",
            Ec::InvalidDtype => "INVALID_DTYPE",
            Ec::InvalidConfig => "INVALID_CONFIG",
            Ec::InvalidConfigWorker => "INVALID_CONFIG_WORKER",
            Ec::InvalidConfigMaxInputs => "INVALID_CONFIG_MAX_INPUTS",
            Ec::InvalidConfigMaxSinks => "INVALID_CONFIG_MAX_SINKS",
            Ec::InvalidConfigTimeout => "INVALID_CONFIG_TIMEOUT",
            Ec::InvalidConfigName => "INVALID_CONFIG_NAME",
            Ec::ConfigRequired => "CONFIG_REQUIRED",
            Ec::AlreadyRunning => "ALREADY_RUNNING",
            Ec::ThreadCreateFail => "THREAD_CREATE_FAIL",
            Ec::ThreadJoinFail => "THREAD_JOIN_FAIL",
            Ec::BufferEmpty => "BUFFER_EMPTY",
            Ec::ConnectionOccupied => "CONNECTION_OCCUPIED",
            Ec::InvalidSinkIdx => "INVALID_SINK_IDX",
            Ec::AlreadyRegistered => "ALREADY_REGISTERED",
            Ec::NotImplemented => "NOT_IMPLEMENTED",
            Ec::PhaseError => "PHASE_ERROR",
            Ec::PropertyMismatch => "PROPERTY_MISMATCH",
            Ec::FilterStopping => "FILTER_STOPPING",
        }
    }

    /// `true` for the status codes that do not indicate a failure.
    #[inline]
    pub const fn is_status(self) -> bool {
        matches!(self, Ec::Ok | Ec::Complete | Ec::Stopped)
    }

    /// `true` if a worker should retry the operation.
    #[inline]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Ec::Timeout)
    }

    /// `true` if a worker should terminate gracefully without recording an error.
    #[inline]
    pub const fn is_shutdown(self) -> bool {
        matches!(self, Ec::Stopped | Ec::FilterStopping)
    }
}

/// Diagnostic record populated by a worker before it exits on a fatal
/// condition.
///
/// Write-once by the worker thread; the runtime keeps the first record and
/// ignores later ones. Readers observe it through
/// [`FilterCore::error`](crate::FilterCore::error) and the lock-free
/// [`health`](crate::FilterCore::health) flag.
#[derive(Debug, Clone)]
pub struct WorkerError {
    /// Canonical code describing the failure.
    pub code: Ec,
    /// Source file that raised the error.
    pub file: &'static str,
    /// Source line that raised the error.
    pub line: u32,
    /// Optional free-form context.
    pub message: Option<String>,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}:{}", self.code.name(), self.file, self.line)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkerError {}

impl WorkerError {
    /// Builds a record without a message. Prefer [`worker_error!`](crate::worker_error).
    pub fn new(code: Ec, file: &'static str, line: u32) -> Self {
        Self { code, file, line, message: None }
    }

    /// Builds a record with a context message.
    pub fn with_message(code: Ec, file: &'static str, line: u32, message: String) -> Self {
        Self { code, file, line, message: Some(message) }
    }
}

/// Builds a [`WorkerError`] capturing the current source location.
///
/// ```
/// use sigflow::{worker_error, Ec};
///
/// let err = worker_error!(Ec::NoSink);
/// assert_eq!(err.code, Ec::NoSink);
/// let err = worker_error!(Ec::CapacityMismatch, "sink holds {} samples", 32);
/// assert!(err.message.unwrap().contains("32"));
/// ```
#[macro_export]
macro_rules! worker_error {
    ($code:expr) => {
        $crate::WorkerError::new($code, file!(), line!())
    };
    ($code:expr, $($arg:tt)+) => {
        $crate::WorkerError::with_message($code, file!(), line!(), format!($($arg)+))
    };
}

/// Early-returns a [`WorkerError`] when `cond` does not hold.
///
/// Standardizes the worker contract's fatal-condition step: populate the
/// diagnostic record and bail out of the worker body.
#[macro_export]
macro_rules! worker_ensure {
    ($cond:expr, $code:expr) => {
        if !$cond {
            return Err($crate::worker_error!($code));
        }
    };
    ($cond:expr, $code:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::worker_error!($code, $($arg)+));
        }
    };
}
