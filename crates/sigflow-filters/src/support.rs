//! Shared worker-loop plumbing.

use sigflow::{BatchRing, Ec, FilterCore, TailRef};

/// Publishes the sink's head slot, retrying timeouts while the filter is
/// running. Returns the terminal code otherwise.
pub(crate) fn submit_retrying(core: &FilterCore, sink: &BatchRing) -> Result<(), Ec> {
    loop {
        match sink.submit(core.timeout_us()) {
            Ok(()) => return Ok(()),
            Err(Ec::Timeout) if core.is_running() => {}
            Err(code) => return Err(code),
        }
    }
}

/// What a consuming worker should do after polling its input ring.
pub(crate) enum Polled<'a> {
    /// A data batch is ready.
    Batch(TailRef<'a>),
    /// Nothing arrived inside the timeout; poll again.
    Idle,
    /// End-of-stream sentinel consumed; forward COMPLETE and exit.
    Complete,
    /// The filter is shutting down; exit without forwarding anything.
    Shutdown,
}

/// Polls `input` with the filter's timeout and normalizes the outcome.
///
/// A COMPLETE batch is released here; the caller forwards the sentinel to
/// its sinks and exits. Errors other than flow control are returned
/// unchanged.
pub(crate) fn poll_input<'a>(core: &FilterCore, input: &'a BatchRing) -> Result<Polled<'a>, Ec> {
    match input.get_tail(core.timeout_us()) {
        Ok(tail) => {
            if tail.is_complete() {
                let _ = tail.release();
                Ok(Polled::Complete)
            } else {
                Ok(Polled::Batch(tail))
            }
        }
        Err(Ec::Timeout) => Ok(Polled::Idle),
        Err(code) if code.is_shutdown() => Ok(Polled::Shutdown),
        Err(code) => Err(code),
    }
}
