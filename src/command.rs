//! Command and handler trait definitions

use std::any::type_name;
use std::borrow::Cow;
use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};

use crate::cancel::CancellationToken;

/// A command that can be sent to another process
///
/// The command struct is the payload; `Response` is what its handler returns.
/// Commands with nothing to return use `()`.
///
/// # Example
///
/// ```rust,ignore
/// use serde::{Serialize, Deserialize};
/// use courier::IpcCommand;
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping;
///
/// #[derive(Serialize, Deserialize)]
/// struct Pong {
///     value: String,
/// }
///
/// impl IpcCommand for Ping {
///     type Response = Pong;
/// }
/// ```
pub trait IpcCommand: Serialize + DeserializeOwned + Send + 'static {
    /// The response type returned by this command's handler
    type Response: Serialize + DeserializeOwned + Send + 'static;

    /// Stable name both peers hash to identify this command
    ///
    /// Defaults to the fully qualified Rust type name. Override it when client
    /// and server live in different crates or module paths.
    fn command_name() -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    /// Optional version mixed into the type hash
    fn version() -> Option<&'static str> {
        None
    }
}

/// Per-message information handed to a handler
#[derive(Debug, Clone)]
pub struct CommandContext {
    message_id: String,
    target_id: Option<String>,
    cancellation: CancellationToken,
}

impl CommandContext {
    pub fn new(
        message_id: String,
        target_id: Option<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message_id,
            target_id,
            cancellation,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    /// Fires when the server shuts down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Server-side handler for one command type
///
/// A fresh handler is produced by its registered factory for every message,
/// so handlers may keep per-message state. Errors are reported to the caller
/// by their display message only.
pub trait CommandHandler<C: IpcCommand>: Send + Sync + 'static {
    fn handle(
        &self,
        command: C,
        context: CommandContext,
    ) -> impl Future<Output = anyhow::Result<C::Response>> + Send;
}
