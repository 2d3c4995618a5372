use std::fmt;
use std::time::Duration;

use crate::error::Error;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// A failed attempt that is about to be retried
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub pipeline: &'static str,
    /// Number of the attempt that failed (1-based)
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a Error,
}

/// Hook for metrics or tests
///
/// Pipelines log every event through `tracing` on their own; an observer
/// only receives a copy and cannot change the outcome.
pub trait PipelineObserver: Send + Sync {
    fn on_retry(&self, _event: &RetryEvent<'_>) {}

    fn on_timeout(&self, _pipeline: &'static str, _budget: Duration) {}

    fn on_circuit_transition(
        &self,
        _pipeline: &'static str,
        _from: CircuitState,
        _to: CircuitState,
    ) {
    }

    fn on_circuit_rejected(&self, _pipeline: &'static str, _retry_after: Duration) {}
}

/// Observer that ignores every event
impl PipelineObserver for () {}
