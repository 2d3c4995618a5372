use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::resilience::observer::{CircuitState, PipelineObserver};

struct Inner {
    state: CircuitState,
    window_start: Instant,
    successes: u32,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Inner {
    fn reset_window(&mut self, now: Instant) {
        self.window_start = now;
        self.successes = 0;
        self.failures = 0;
    }
}

/// Failure-ratio circuit breaker
///
/// ```text
///   Closed --(ratio >= threshold, total >= min throughput)--> Open
///   Open   --(break duration elapsed, next call)-----------> HalfOpen (one probe)
///   HalfOpen --probe ok--> Closed      HalfOpen --probe failed--> Open
/// ```
pub struct CircuitBreaker {
    pipeline: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    observer: Arc<dyn PipelineObserver>,
}

impl CircuitBreaker {
    pub fn new(
        pipeline: &'static str,
        config: CircuitBreakerConfig,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            pipeline,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window_start: Instant::now(),
                successes: 0,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            observer,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask permission to run one call
    ///
    /// The returned permit settles the call. Dropping it unsettled frees a
    /// half-open probe slot without judging the outcome.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>> {
        let now = Instant::now();
        let mut transition = None;

        let outcome = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => Ok(()),
                CircuitState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed >= self.config.break_duration() {
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        Ok(())
                    } else {
                        Err(self.config.break_duration() - elapsed)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        Err(self.config.break_duration())
                    } else {
                        inner.probe_in_flight = true;
                        Ok(())
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }

        outcome
            .map(|()| CallPermit {
                breaker: self,
                settled: false,
            })
            .map_err(|retry_after| {
                tracing::warn!(
                    pipeline = self.pipeline,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "circuit open, rejecting call"
                );
                self.observer.on_circuit_rejected(self.pipeline, retry_after);
                Error::CircuitOpen { retry_after }
            })
    }

    fn record_success(&self) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Closed;
                    inner.probe_in_flight = false;
                    inner.opened_at = None;
                    inner.reset_window(now);
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                }
                CircuitState::Closed => {
                    self.roll_window(&mut inner, now);
                    inner.successes += 1;
                    None
                }
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.probe_in_flight = false;
                    inner.opened_at = Some(now);
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Closed => {
                    self.roll_window(&mut inner, now);
                    inner.failures += 1;
                    let total = inner.successes + inner.failures;
                    let ratio = f64::from(inner.failures) / f64::from(total);
                    if total >= self.config.minimum_throughput()
                        && ratio >= self.config.failure_ratio()
                    {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        inner.reset_window(now);
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn roll_window(&self, inner: &mut Inner, now: Instant) {
        if now.saturating_duration_since(inner.window_start) >= self.config.sampling_duration() {
            inner.reset_window(now);
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => tracing::warn!(
                pipeline = self.pipeline,
                from = %from,
                break_ms = self.config.break_duration().as_millis() as u64,
                "circuit opened"
            ),
            _ => tracing::info!(
                pipeline = self.pipeline,
                from = %from,
                to = %to,
                "circuit state changed"
            ),
        }
        self.observer.on_circuit_transition(self.pipeline, from, to);
    }
}

/// Permission to run one call through a [`CircuitBreaker`]
#[derive(Debug)]
#[must_use = "dropping the permit releases it without recording an outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("pipeline", &self.pipeline)
            .field("state", &self.state())
            .finish()
    }
}
