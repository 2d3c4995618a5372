//! IPC client
//!
//! Every call goes through the client-call pipeline and borrows one pooled
//! transport per attempt:
//!
//! ```text
//! breaker -> timeout -> retry -> [acquire, connect?, write, read?, release]
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationSource;
use crate::command::IpcCommand;
use crate::config::IpcConfig;
use crate::error::{Error, Result};
use crate::pool::{PoolStats, TransportPool};
use crate::protocol::{Codec, IpcCommandResponse, IpcMessage};
use crate::registry::TypeRegistry;
use crate::resilience::{CircuitState, PipelineObserver, ResiliencePipeline};
use crate::transport::{ClientTransport, Platform, PlatformClient};

/// Client sending commands to an [`IpcServer`](crate::IpcServer)
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct IpcClient<T: ClientTransport = PlatformClient> {
    config: IpcConfig,
    codec: Codec,
    types: Arc<TypeRegistry>,
    pool: TransportPool<T>,
    pipeline: ResiliencePipeline,
    shutdown: CancellationSource,
}

impl IpcClient<PlatformClient> {
    /// Client for the platform transport, spreading connections over the
    /// configured endpoints
    pub fn new(config: IpcConfig) -> Result<Self> {
        Platform::current()?;
        let endpoints = config.transport().endpoints();
        if endpoints.is_empty() {
            return Err(Error::Config("no endpoints configured".into()));
        }
        Ok(Self::with_factory(config, move |index| {
            PlatformClient::new(endpoints[index % endpoints.len()].clone())
        }))
    }
}

impl<T: ClientTransport> IpcClient<T> {
    /// Client using custom transports
    ///
    /// `factory` receives a running creation index.
    pub fn with_factory(
        config: IpcConfig,
        factory: impl Fn(usize) -> T + Send + Sync + 'static,
    ) -> Self {
        let pool = TransportPool::new(config.transport().client_pool_size(), factory);
        Self {
            codec: config.codec(),
            pipeline: ResiliencePipeline::client_call(&config, Arc::new(())),
            types: TypeRegistry::global(),
            pool,
            config,
            shutdown: CancellationSource::new(),
        }
    }

    /// Use a specific type registry instead of the process-wide one
    pub fn with_types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    /// Report pipeline events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.pipeline = ResiliencePipeline::client_call(&self.config, observer);
        self
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.pipeline.circuit_state()
    }

    /// Wrap `command` in an envelope
    ///
    /// Use with [`IpcMessage::with_target`] and [`send_command`](Self::send_command)
    /// to address a specific target.
    pub fn message<C: IpcCommand>(
        &self,
        command: &C,
        requires_response: bool,
    ) -> Result<IpcMessage> {
        let hash = self.types.type_hash::<C>()?;
        let payload = self.codec.encode(command)?;
        Ok(IpcMessage::new(hash, payload, requires_response))
    }

    /// Send a raw envelope; `None` if the call failed
    pub async fn send_command(
        &self,
        message: &IpcMessage,
        timeout: Option<Duration>,
    ) -> Option<IpcCommandResponse> {
        match self.try_send_command(message, timeout).await {
            Ok(response) => Some(response),
            Err(e) => {
                match &e {
                    Error::CircuitOpen { retry_after } => tracing::warn!(
                        message_id = %message.message_id,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "command rejected, circuit open"
                    ),
                    _ => tracing::error!(
                        message_id = %message.message_id,
                        error = %e,
                        "command send failed"
                    ),
                }
                None
            }
        }
    }

    /// Send a raw envelope and wait for its response
    pub async fn try_send_command(
        &self,
        message: &IpcMessage,
        timeout: Option<Duration>,
    ) -> Result<IpcCommandResponse> {
        if message.one_way {
            return Err(Error::Config("one-way messages carry no response; use post".into()));
        }
        let frame = self.codec.encode(message)?;
        let frame = frame.as_slice();
        let message_id = message.message_id.as_str();
        let budget = timeout.unwrap_or(self.config.timeouts().ipc());

        self.pipeline
            .execute(budget, &self.shutdown.token(), |attempt| {
                self.exchange(frame, message_id, budget, attempt)
            })
            .await
    }

    async fn exchange(
        &self,
        frame: &[u8],
        message_id: &str,
        budget: Duration,
        attempt: u32,
    ) -> Result<IpcCommandResponse> {
        let mut transport = self.pool.acquire();
        if !transport.is_connected() {
            transport.connect(budget).await?;
        }
        transport.write(frame).await?;
        let reply = transport.read().await?;

        let response: IpcCommandResponse = self.codec.decode(&reply)?;
        if !response.command_id.is_empty() && response.command_id != message_id {
            return Err(Error::InvalidFrame(format!(
                "response {} does not answer {message_id}",
                response.command_id
            )));
        }

        transport.mark_healthy();
        tracing::trace!(message_id, attempt, success = response.success, "response received");
        Ok(response)
    }

    /// Send `command` and return the raw response; `None` if the call failed
    pub async fn send<C: IpcCommand>(
        &self,
        command: &C,
        timeout: Option<Duration>,
    ) -> Option<IpcCommandResponse> {
        let message = match self.message(command, true) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    command = %C::command_name(),
                    error = %e,
                    "failed to build message"
                );
                return None;
            }
        };
        self.send_command(&message, timeout).await
    }

    /// Send `command` and decode its handler's result
    pub async fn request<C: IpcCommand>(
        &self,
        command: &C,
        timeout: Option<Duration>,
    ) -> Result<C::Response> {
        let message = self.message(command, true)?;
        self.request_message::<C>(&message, timeout).await
    }

    /// Like [`request`](Self::request), addressed to `target_id`
    pub async fn request_to<C: IpcCommand>(
        &self,
        command: &C,
        target_id: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<C::Response> {
        let message = self.message(command, true)?.with_target(target_id);
        self.request_message::<C>(&message, timeout).await
    }

    async fn request_message<C: IpcCommand>(
        &self,
        message: &IpcMessage,
        timeout: Option<Duration>,
    ) -> Result<C::Response> {
        let response = self.try_send_command(message, timeout).await?;
        ensure_success::<C>(&response)?;
        response.decode_data(self.codec)
    }

    /// Send `command` and wait only for the acknowledgement
    pub async fn notify<C: IpcCommand>(
        &self,
        command: &C,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let message = self.message(command, false)?;
        let response = self.try_send_command(&message, timeout).await?;
        ensure_success::<C>(&response)
    }

    /// Write `command` as a one-way frame; the server sends nothing back
    pub async fn post<C: IpcCommand>(&self, command: &C, timeout: Option<Duration>) -> Result<()> {
        let message = self.message(command, false)?.one_way();
        let frame = self.codec.encode(&message)?;
        let frame = frame.as_slice();
        let pool = &self.pool;
        let budget = timeout.unwrap_or(self.config.timeouts().ipc());

        self.pipeline
            .execute(budget, &self.shutdown.token(), |_| async move {
                let mut transport = pool.acquire();
                if !transport.is_connected() {
                    transport.connect(budget).await?;
                }
                transport.write(frame).await?;
                transport.mark_healthy();
                Ok(())
            })
            .await
    }

    /// Cancel in-flight calls and close pooled transports
    pub fn shutdown(&self) {
        if self.shutdown.cancel() {
            tracing::debug!("IPC client shutting down");
        }
        self.pool.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn ensure_success<C: IpcCommand>(response: &IpcCommandResponse) -> Result<()> {
    if response.success {
        return Ok(());
    }
    Err(Error::CommandFailed {
        command: C::command_name().into_owned(),
        message: response.message.clone().unwrap_or_default(),
    })
}

impl<T: ClientTransport> Drop for IpcClient<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: ClientTransport> std::fmt::Debug for IpcClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcClient")
            .field("pool", &self.pool.stats())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
