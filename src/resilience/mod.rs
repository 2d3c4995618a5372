//! Retry, circuit breaking and timeouts around IPC calls

mod circuit_breaker;
mod observer;
mod pipeline;
mod retry;

pub use circuit_breaker::{CallPermit, CircuitBreaker};
pub use observer::{CircuitState, PipelineObserver, RetryEvent};
pub use pipeline::{CLIENT_CALL, COMMAND_PROCESSING, ResiliencePipeline};
pub use retry::RetryPolicy;
