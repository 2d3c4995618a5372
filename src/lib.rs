//! Courier - typed command IPC over Unix sockets and named pipes
//!
//! A client sends commands to a server process; the server looks up the
//! handler registered for the command's type and sends back its result.
//! Commands are identified on the wire by a short hash of their name, see
//! [`TypeRegistry`].
//!
//! Transports are platform-native:
//! - Unix: domain sockets, one socket file per listener instance
//! - Windows: named pipes
//!
//! Client calls run through a resilience pipeline (circuit breaker, timeout,
//! retry with backoff). Handlers run under a business timeout.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::{CommandContext, CommandHandler, IpcClient, IpcCommand, IpcConfig, IpcServer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Pong {
//!     value: String,
//! }
//!
//! impl IpcCommand for Ping {
//!     type Response = Pong;
//! }
//!
//! struct PingHandler;
//!
//! impl CommandHandler<Ping> for PingHandler {
//!     async fn handle(&self, _: Ping, _: CommandContext) -> anyhow::Result<Pong> {
//!         Ok(Pong { value: "ok".into() })
//!     }
//! }
//!
//! async fn run() -> courier::Result<()> {
//!     let config = IpcConfig::builder().build()?;
//!
//!     let server = IpcServer::builder(config.clone())
//!         .handler::<Ping, _>(|| PingHandler)
//!         .build()?;
//!     server.start()?;
//!
//!     let client = IpcClient::new(config)?;
//!     let pong = client.request(&Ping, None).await?;
//!     assert_eq!(pong.value, "ok");
//!     Ok(())
//! }
//! ```

mod cancel;
mod client;
mod command;
mod config;
mod dispatcher;
mod error;
mod handler;
mod pool;
mod protocol;
mod registry;
mod server;

pub mod resilience;
pub mod transport;

pub use cancel::{CancellationSource, CancellationToken};
pub use client::IpcClient;
pub use command::{CommandContext, CommandHandler, IpcCommand};
pub use config::{
    Backoff, CircuitBreakerConfig, CircuitBreakerConfigBuilder, IpcConfig, IpcConfigBuilder,
    RetryConfig, RetryConfigBuilder, TimeoutConfig, TransportConfig, TransportConfigBuilder,
};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use handler::HandlerRegistry;
pub use pool::{PoolStats, PooledTransport, TransportPool};
pub use protocol::{Codec, IpcCommandResponse, IpcMessage};
pub use registry::{CommandMetadata, TYPE_HASH_LEN, TypeRegistry, compute_type_hash};
pub use server::{IpcServer, IpcServerBuilder};
pub use transport::{ClientTransport, Endpoint, Listener, Platform};
