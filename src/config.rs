use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::Codec;
use crate::transport::Endpoint;

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    Linear,
    #[default]
    Exponential,
}

/// Retry policy for the client-call pipeline
#[derive(Debug, Clone)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
    use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new builder for RetryConfig
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Total attempts, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn use_jitter(&self) -> bool {
        self.use_jitter
    }
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    inner: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.inner.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.inner.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.inner.max_delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.inner.backoff = backoff;
        self
    }

    pub fn use_jitter(mut self, enabled: bool) -> Self {
        self.inner.use_jitter = enabled;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.inner
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    failure_ratio: f64,
    minimum_throughput: u32,
    break_duration: Duration,
    sampling_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            minimum_throughput: 10,
            break_duration: Duration::from_secs(30),
            sampling_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new builder for CircuitBreakerConfig
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn failure_ratio(&self) -> f64 {
        self.failure_ratio
    }

    pub fn minimum_throughput(&self) -> u32 {
        self.minimum_throughput
    }

    pub fn break_duration(&self) -> Duration {
        self.break_duration
    }

    pub fn sampling_duration(&self) -> Duration {
        self.sampling_duration
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    inner: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_ratio(mut self, ratio: f64) -> Self {
        self.inner.failure_ratio = ratio;
        self
    }

    pub fn minimum_throughput(mut self, calls: u32) -> Self {
        self.inner.minimum_throughput = calls;
        self
    }

    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.inner.break_duration = duration;
        self
    }

    pub fn sampling_duration(mut self, duration: Duration) -> Self {
        self.inner.sampling_duration = duration;
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        self.inner
    }
}

/// Timeout budgets
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    business: Duration,
    ipc: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            business: Duration::from_secs(30),
            ipc: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn new(business: Duration, ipc: Duration) -> Self {
        Self { business, ipc }
    }

    /// Budget for a single handler invocation on the server
    pub fn business(&self) -> Duration {
        self.business
    }

    /// Default budget for a client round trip, retries included
    pub fn ipc(&self) -> Duration {
        self.ipc
    }
}

/// Largest named pipe instance limit Windows accepts below "unlimited"
const MAX_PIPE_INSTANCES: u32 = 254;

/// Endpoint naming and instance counts
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pipe_name: String,
    unix_socket_path: Option<PathBuf>,
    transport_count: usize,
    client_pool_size: usize,
    max_server_instances: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pipe_name: "courier".to_string(),
            unix_socket_path: None,
            transport_count: 4,
            client_pool_size: 4,
            max_server_instances: MAX_PIPE_INSTANCES,
        }
    }
}

impl TransportConfig {
    /// Create a new builder for TransportConfig
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    /// Base socket path; defaults to `<tmp>/<pipe_name>.sock`
    pub fn unix_socket_path(&self) -> PathBuf {
        self.unix_socket_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("{}.sock", self.pipe_name)))
    }

    /// Number of server listener instances
    pub fn transport_count(&self) -> usize {
        self.transport_count
    }

    pub fn client_pool_size(&self) -> usize {
        self.client_pool_size
    }

    /// Connections each listener instance serves at once
    ///
    /// On Windows this is the instance limit of each named pipe.
    pub fn max_server_instances(&self) -> u32 {
        self.max_server_instances
    }

    /// Endpoint of listener instance `index`
    pub fn endpoint(&self, index: usize) -> Endpoint {
        if cfg!(windows) {
            Endpoint::NamedPipe(format!(r"\\.\pipe\{}-{}", self.pipe_name, index))
        } else {
            let base = self.unix_socket_path();
            let mut path = base.into_os_string();
            path.push(format!(".{index}"));
            Endpoint::UnixSocket(PathBuf::from(path))
        }
    }

    /// All listener endpoints, in instance order
    pub fn endpoints(&self) -> Vec<Endpoint> {
        (0..self.transport_count).map(|i| self.endpoint(i)).collect()
    }
}

/// Builder for TransportConfig
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    inner: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn pipe_name(mut self, name: impl Into<String>) -> Self {
        self.inner.pipe_name = name.into();
        self
    }

    pub fn unix_socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.unix_socket_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn transport_count(mut self, count: usize) -> Self {
        self.inner.transport_count = count;
        self
    }

    pub fn client_pool_size(mut self, size: usize) -> Self {
        self.inner.client_pool_size = size;
        self
    }

    pub fn max_server_instances(mut self, max: u32) -> Self {
        self.inner.max_server_instances = max;
        self
    }

    pub fn build(self) -> TransportConfig {
        self.inner
    }
}

/// Complete protocol configuration
#[derive(Debug, Clone, Default)]
pub struct IpcConfig {
    retry: RetryConfig,
    circuit_breaker: CircuitBreakerConfig,
    timeouts: TimeoutConfig,
    transport: TransportConfig,
    codec: Codec,
}

impl IpcConfig {
    /// Create a new builder for IpcConfig
    pub fn builder() -> IpcConfigBuilder {
        IpcConfigBuilder::default()
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn circuit_breaker(&self) -> &CircuitBreakerConfig {
        &self.circuit_breaker
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }
}

/// Builder for IpcConfig
#[derive(Debug, Default)]
pub struct IpcConfigBuilder {
    inner: IpcConfig,
}

impl IpcConfigBuilder {
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.inner.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.inner.circuit_breaker = breaker;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.inner.timeouts = timeouts;
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.inner.transport = transport;
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.inner.codec = codec;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<IpcConfig> {
        let config = self.inner;

        if config.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }

        let ratio = config.circuit_breaker.failure_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::Config(format!(
                "circuit_breaker.failure_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if config.circuit_breaker.minimum_throughput == 0 {
            return Err(Error::Config(
                "circuit_breaker.minimum_throughput must be at least 1".into(),
            ));
        }
        if config.circuit_breaker.sampling_duration.is_zero() {
            return Err(Error::Config(
                "circuit_breaker.sampling_duration must be non-zero".into(),
            ));
        }

        if config.timeouts.ipc.is_zero() || config.timeouts.business.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }

        let transport = &config.transport;
        if transport.pipe_name.trim().is_empty() {
            return Err(Error::Config("transport.pipe_name is required".into()));
        }
        if transport.transport_count == 0 {
            return Err(Error::Config(
                "transport.transport_count must be at least 1".into(),
            ));
        }
        if !(1..=MAX_PIPE_INSTANCES).contains(&transport.max_server_instances) {
            return Err(Error::Config(format!(
                "transport.max_server_instances must be between 1 and {MAX_PIPE_INSTANCES}, got {}",
                transport.max_server_instances
            )));
        }
        if transport.client_pool_size == 0 {
            return Err(Error::Config(
                "transport.client_pool_size must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}
