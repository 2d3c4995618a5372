use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use futures_lite::future;

use crate::cancel::CancellationToken;
use crate::config::IpcConfig;
use crate::error::{Error, Result};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::observer::{CircuitState, PipelineObserver, RetryEvent};
use crate::resilience::retry::RetryPolicy;

/// Name of the pipeline wrapping client round trips
pub const CLIENT_CALL: &str = "client-call";
/// Name of the pipeline wrapping server handler invocations
pub const COMMAND_PROCESSING: &str = "command-processing";

/// Composed resilience policies
///
/// Policies nest in a fixed order, outermost first:
///
/// ```text
/// cancellation -> circuit breaker -> timeout budget -> retry -> attempt
/// ```
///
/// The timeout covers every attempt and the delays between them; when it
/// fires the current attempt is dropped and no further attempt starts.
pub struct ResiliencePipeline {
    name: &'static str,
    retry: RetryPolicy,
    breaker: Option<CircuitBreaker>,
    default_timeout: Duration,
    observer: Arc<dyn PipelineObserver>,
}

impl ResiliencePipeline {
    /// Pipeline for outbound client calls: breaker, timeout and retry
    pub fn client_call(config: &IpcConfig, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            name: CLIENT_CALL,
            retry: RetryPolicy::new(config.retry().clone()),
            breaker: Some(CircuitBreaker::new(
                CLIENT_CALL,
                config.circuit_breaker().clone(),
                Arc::clone(&observer),
            )),
            default_timeout: config.timeouts().ipc(),
            observer,
        }
    }

    /// Pipeline for server-side handler invocation: business timeout only
    pub fn command_processing(config: &IpcConfig, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            name: COMMAND_PROCESSING,
            retry: RetryPolicy::none(),
            breaker: None,
            default_timeout: config.timeouts().business(),
            observer,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Current breaker state, if this pipeline has a breaker
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(CircuitBreaker::state)
    }

    /// Run `operation` under every policy of this pipeline
    ///
    /// `operation` receives the 1-based attempt number and is invoked again
    /// for each retry.
    pub async fn execute<T, F, Fut>(
        &self,
        budget: Duration,
        cancellation: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.guarded(budget, cancellation, self.retry(operation)).await
    }

    /// Run a single attempt under the breaker, timeout and cancellation
    /// policies, without retry
    pub async fn execute_once<T>(
        &self,
        budget: Duration,
        cancellation: &CancellationToken,
        attempt: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.guarded(budget, cancellation, attempt).await
    }

    async fn guarded<T>(
        &self,
        budget: Duration,
        cancellation: &CancellationToken,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // Dropping this future mid-call drops the permit, which frees a
        // half-open probe slot.
        let permit = match &self.breaker {
            Some(breaker) => Some(breaker.try_acquire()?),
            None => None,
        };

        let outcome = future::or(self.with_timeout(budget, work), async {
            cancellation.cancelled().await;
            Err(Error::Cancelled)
        })
        .await;

        if let Some(permit) = permit {
            match &outcome {
                Ok(_) => permit.success(),
                Err(e) if e.is_transient() => permit.failure(),
                Err(Error::Cancelled) => drop(permit),
                // The peer answered; the fault is not the connection's.
                Err(_) => permit.success(),
            }
        }

        outcome
    }

    async fn with_timeout<T>(
        &self,
        budget: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let name = self.name;
        future::or(fut, async move {
            Timer::after(budget).await;
            tracing::warn!(
                pipeline = name,
                budget_ms = budget.as_millis() as u64,
                "operation timed out"
            );
            self.observer.on_timeout(name, budget);
            Err(Error::Timeout(budget))
        })
        .await
    }

    async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            pipeline = self.name,
                            attempt,
                            "attempt succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        pipeline = self.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    self.observer.on_retry(&RetryEvent {
                        pipeline: self.name,
                        attempt,
                        delay,
                        error: &error,
                    });
                    Timer::after(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::debug!(
                        pipeline = self.name,
                        attempt,
                        error = %error,
                        "attempt failed, giving up"
                    );
                    return Err(error);
                }
            }
        }
    }
}

impl std::fmt::Debug for ResiliencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("name", &self.name)
            .field("max_attempts", &self.retry.max_attempts())
            .field("circuit", &self.circuit_state())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cancel::CancellationSource;
    use crate::config::{Backoff, CircuitBreakerConfig, RetryConfig};

    #[derive(Default)]
    struct Recorder {
        retries: Mutex<Vec<u32>>,
        transitions: Mutex<Vec<(CircuitState, CircuitState)>>,
        rejections: AtomicU32,
        timeouts: AtomicU32,
    }

    impl PipelineObserver for Recorder {
        fn on_retry(&self, event: &RetryEvent<'_>) {
            self.retries.lock().unwrap().push(event.attempt);
        }

        fn on_timeout(&self, _pipeline: &'static str, _budget: Duration) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_circuit_transition(
            &self,
            _pipeline: &'static str,
            from: CircuitState,
            to: CircuitState,
        ) {
            self.transitions.lock().unwrap().push((from, to));
        }

        fn on_circuit_rejected(&self, _pipeline: &'static str, _retry_after: Duration) {
            self.rejections.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(max_attempts: u32, min_throughput: u32, break_duration: Duration) -> IpcConfig {
        IpcConfig::builder()
            .retry(
                RetryConfig::builder()
                    .max_attempts(max_attempts)
                    .initial_delay(Duration::from_millis(1))
                    .backoff(Backoff::Linear)
                    .use_jitter(false)
                    .build(),
            )
            .circuit_breaker(
                CircuitBreakerConfig::builder()
                    .failure_ratio(0.5)
                    .minimum_throughput(min_throughput)
                    .break_duration(break_duration)
                    .build(),
            )
            .build()
            .unwrap()
    }

    fn broken_pipe() -> Error {
        Error::Io(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn client_call(max_attempts: u32, observer: Arc<dyn PipelineObserver>) -> ResiliencePipeline {
        let config = config(max_attempts, 100, Duration::from_secs(1));
        ResiliencePipeline::client_call(&config, observer)
    }

    fn processing() -> ResiliencePipeline {
        ResiliencePipeline::command_processing(&config(5, 1, Duration::from_secs(1)), Arc::new(()))
    }

    #[test]
    fn test_retries_until_success() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = client_call(3, recorder.clone());
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        let result = smol::block_on(pipeline.execute(Duration::from_secs(2), &token, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 { Err(broken_pipe()) } else { Ok("done") }
            }
        }));

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*recorder.retries.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let pipeline = client_call(3, Arc::new(()));
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        let result: Result<()> =
            smol::block_on(pipeline.execute(Duration::from_secs(2), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NoResponse) }
            }));

        assert!(matches!(result, Err(Error::NoResponse)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_transient_errors_are_not_retried() {
        let pipeline = client_call(5, Arc::new(()));
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        let result: Result<()> =
            smol::block_on(pipeline.execute(Duration::from_secs(2), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Serialization("bad".into())) }
            }));

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_stops_retrying() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = client_call(100, recorder.clone());
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        let result: Result<()> =
            smol::block_on(pipeline.execute(Duration::from_millis(50), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Timer::after(Duration::from_millis(20)).await;
                    Err(Error::NoResponse)
                }
            }));

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 1);
        let calls_at_timeout = calls.load(Ordering::SeqCst);
        assert!(calls_at_timeout < 100);

        // Nothing keeps running once the call returned
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), calls_at_timeout);
    }

    #[test]
    fn test_cancellation_aborts_call() {
        let pipeline = client_call(3, Arc::new(()));
        let source = CancellationSource::new();
        let token = source.token();

        let result: Result<()> = smol::block_on(async {
            future::or(
                pipeline.execute(Duration::from_secs(5), &token, |_| async {
                    Timer::after(Duration::from_secs(5)).await;
                    Ok(())
                }),
                async {
                    Timer::after(Duration::from_millis(20)).await;
                    source.cancel();
                    future::pending().await
                },
            )
            .await
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::Closed));
    }

    #[test]
    fn test_open_circuit_fails_fast_then_recovers() {
        let recorder = Arc::new(Recorder::default());
        let config = config(1, 2, Duration::from_millis(50));
        let pipeline = ResiliencePipeline::client_call(&config, recorder.clone());
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        for _ in 0..2 {
            let result: Result<()> =
                smol::block_on(pipeline.execute(Duration::from_secs(1), &token, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(broken_pipe()) }
                }));
            assert!(matches!(result, Err(Error::Io(_))));
        }
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::Open));

        // Rejected without touching the operation
        let result: Result<()> =
            smol::block_on(pipeline.execute(Duration::from_secs(1), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }));
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.rejections.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(60));
        let result = smol::block_on(pipeline.execute(Duration::from_secs(1), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        }));
        assert_eq!(result.unwrap(), 7);
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::Closed));
        assert_eq!(
            *recorder.transitions.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_abandoned_probe_does_not_wedge_the_circuit() {
        let config = config(1, 1, Duration::from_millis(30));
        let pipeline = ResiliencePipeline::client_call(&config, Arc::new(()));
        let token = CancellationToken::never();

        let result: Result<()> = smol::block_on(
            pipeline.execute(Duration::from_secs(1), &token, |_| async { Err(broken_pipe()) }),
        );
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::Open));

        std::thread::sleep(Duration::from_millis(40));
        // The caller gives up on the probe before it answers
        let abandoned = smol::block_on(future::or(
            async {
                let probe = pipeline.execute(Duration::from_secs(5), &token, |_| async {
                    Timer::after(Duration::from_secs(5)).await;
                    Ok(())
                });
                Some(probe.await)
            },
            async {
                Timer::after(Duration::from_millis(10)).await;
                None
            },
        ));
        assert!(abandoned.is_none());
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::HalfOpen));

        let result =
            smol::block_on(pipeline.execute(Duration::from_secs(1), &token, |_| async { Ok(1) }));
        assert_eq!(result.unwrap(), 1);
        assert_eq!(pipeline.circuit_state(), Some(CircuitState::Closed));
    }

    #[test]
    fn test_execute_once_applies_timeout() {
        let pipeline = processing();

        let result: Result<()> = smol::block_on(pipeline.execute_once(
            Duration::from_millis(20),
            &CancellationToken::never(),
            async {
                Timer::after(Duration::from_secs(5)).await;
                Ok(())
            },
        ));

        assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(20)));
    }

    #[test]
    fn test_command_processing_never_retries() {
        let pipeline = processing();
        let calls = AtomicU32::new(0);
        let token = CancellationToken::never();

        let result: Result<()> =
            smol::block_on(pipeline.execute(Duration::from_secs(1), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NoResponse) }
            }));

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.circuit_state(), None);
    }
}
