use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use courier::{
    Backoff, CircuitBreakerConfig, Codec, IpcConfig, RetryConfig, TimeoutConfig, TransportConfig,
};

use crate::cli::{BackoffArg, CodecArg, CommonArgs};

/// TOML config file structure
///
/// Durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// "msgpack" or "json"
    pub codec: Option<String>,

    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub timeouts: TimeoutsSection,
    pub transport: TransportSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// "linear" or "exponential"
    pub backoff: Option<String>,
    pub use_jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSection {
    pub failure_ratio: Option<f64>,
    pub minimum_throughput: Option<u32>,
    pub break_duration_ms: Option<u64>,
    pub sampling_duration_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsSection {
    pub business_ms: Option<u64>,
    pub ipc_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSection {
    pub pipe_name: Option<String>,
    pub unix_socket_path: Option<PathBuf>,
    pub transport_count: Option<usize>,
    pub client_pool_size: Option<usize>,
    pub max_server_instances: Option<u32>,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Merge file config with CLI args (CLI takes precedence)
pub fn merge_config(file: FileConfig, cli: &CommonArgs) -> Result<IpcConfig> {
    let codec = match (cli.codec, file.codec.as_deref()) {
        (Some(CodecArg::Msgpack), _) => Codec::MessagePack,
        (Some(CodecArg::Json), _) => Codec::Json,
        (None, Some(name)) => name.parse().context("invalid codec in config")?,
        (None, None) => Codec::default(),
    };

    let config = IpcConfig::builder()
        .retry(build_retry(&file.retry, cli)?)
        .circuit_breaker(build_circuit_breaker(&file.circuit_breaker))
        .timeouts(build_timeouts(&file.timeouts, cli))
        .transport(build_transport(&file.transport, cli))
        .codec(codec)
        .build()?;
    Ok(config)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn build_retry(file: &RetrySection, cli: &CommonArgs) -> Result<RetryConfig> {
    let mut builder = RetryConfig::builder();

    if let Some(v) = cli.max_attempts.or(file.max_attempts) {
        builder = builder.max_attempts(v);
    }
    if let Some(v) = file.initial_delay_ms {
        builder = builder.initial_delay(millis(v));
    }
    if let Some(v) = file.max_delay_ms {
        builder = builder.max_delay(millis(v));
    }

    let backoff = match (cli.backoff, file.backoff.as_deref()) {
        (Some(BackoffArg::Linear), _) => Some(Backoff::Linear),
        (Some(BackoffArg::Exponential), _) => Some(Backoff::Exponential),
        (None, Some("linear")) => Some(Backoff::Linear),
        (None, Some("exponential")) => Some(Backoff::Exponential),
        (None, Some(other)) => anyhow::bail!("invalid backoff in config: {other}"),
        (None, None) => None,
    };
    if let Some(v) = backoff {
        builder = builder.backoff(v);
    }

    if cli.no_jitter {
        builder = builder.use_jitter(false);
    } else if let Some(v) = file.use_jitter {
        builder = builder.use_jitter(v);
    }

    Ok(builder.build())
}

fn build_circuit_breaker(file: &CircuitBreakerSection) -> CircuitBreakerConfig {
    let mut builder = CircuitBreakerConfig::builder();

    if let Some(v) = file.failure_ratio {
        builder = builder.failure_ratio(v);
    }
    if let Some(v) = file.minimum_throughput {
        builder = builder.minimum_throughput(v);
    }
    if let Some(v) = file.break_duration_ms {
        builder = builder.break_duration(millis(v));
    }
    if let Some(v) = file.sampling_duration_ms {
        builder = builder.sampling_duration(millis(v));
    }

    builder.build()
}

fn build_timeouts(file: &TimeoutsSection, cli: &CommonArgs) -> TimeoutConfig {
    let defaults = TimeoutConfig::default();
    let business = cli
        .business_timeout_ms
        .or(file.business_ms)
        .map(millis)
        .unwrap_or(defaults.business());
    let ipc = cli
        .timeout_ms
        .or(file.ipc_ms)
        .map(millis)
        .unwrap_or(defaults.ipc());
    TimeoutConfig::new(business, ipc)
}

fn build_transport(file: &TransportSection, cli: &CommonArgs) -> TransportConfig {
    let mut builder = TransportConfig::builder();

    if let Some(v) = cli.pipe_name.clone().or_else(|| file.pipe_name.clone()) {
        builder = builder.pipe_name(v);
    }
    if let Some(v) = cli.socket.as_ref().or(file.unix_socket_path.as_ref()) {
        builder = builder.unix_socket_path(v);
    }
    if let Some(v) = cli.instances.or(file.transport_count) {
        builder = builder.transport_count(v);
    }
    if let Some(v) = cli.pool_size.or(file.client_pool_size) {
        builder = builder.client_pool_size(v);
    }
    if let Some(v) = file.max_server_instances {
        builder = builder.max_server_instances(v);
    }

    builder.build()
}
