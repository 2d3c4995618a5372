//! Server-side dispatch of received frames
//!
//! ```text
//! frame -> IpcMessage -> metadata (by hash) -> decoded command
//!       -> handler (fresh from factory) -> IpcCommandResponse
//! ```
//!
//! Every failure along the way becomes a failed response; nothing is
//! propagated to the listener.

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::command::CommandContext;
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::protocol::{Codec, IpcCommandResponse, IpcMessage};
use crate::registry::TypeRegistry;
use crate::resilience::ResiliencePipeline;

/// Resolves and invokes handlers for incoming messages
pub struct Dispatcher {
    types: Arc<TypeRegistry>,
    handlers: Arc<HandlerRegistry>,
    pipeline: ResiliencePipeline,
    codec: Codec,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        types: Arc<TypeRegistry>,
        handlers: Arc<HandlerRegistry>,
        pipeline: ResiliencePipeline,
        codec: Codec,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            types,
            handlers,
            pipeline,
            codec,
            shutdown,
        }
    }

    /// Process one raw frame and encode the reply
    ///
    /// Returns `None` when nothing should be written back.
    pub async fn dispatch_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let response = self.dispatch(frame).await?;
        match self.codec.encode(&response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(
                    command_id = %response.command_id,
                    error = %e,
                    "failed to encode response"
                );
                let fallback = IpcCommandResponse::failure(response.command_id, e.to_string());
                self.codec.encode(&fallback).ok()
            }
        }
    }

    /// Process one raw frame
    ///
    /// Returns `None` for one-way messages.
    pub async fn dispatch(&self, frame: &[u8]) -> Option<IpcCommandResponse> {
        let message: IpcMessage = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "failed to decode envelope");
                return Some(IpcCommandResponse::failure(
                    String::new(),
                    format!("invalid message envelope: {e}"),
                ));
            }
        };

        let message_id = message.message_id.clone();
        let one_way = message.one_way;
        let requires_response = message.requires_response;
        let type_hash = message.type_hash.clone();

        match self.process(message).await {
            Ok(_) if one_way => None,
            Ok(data) => {
                tracing::debug!(
                    message_id = %message_id,
                    type_hash = %type_hash,
                    "command handled"
                );
                let data = if requires_response { Some(data) } else { None };
                Some(IpcCommandResponse::success(message_id, data))
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message_id,
                    type_hash = %type_hash,
                    one_way,
                    error = %e,
                    "command failed"
                );
                if one_way {
                    None
                } else {
                    Some(IpcCommandResponse::failure(message_id, failure_message(&e)))
                }
            }
        }
    }

    async fn process(&self, message: IpcMessage) -> Result<Vec<u8>> {
        let metadata = self
            .types
            .metadata(&message.type_hash)
            .ok_or_else(|| Error::UnknownCommand(message.type_hash.clone()))?;

        let command = metadata.decode(self.codec, &message.payload).map_err(|e| {
            Error::Deserialization(format!(
                "failed to deserialize command {}: {e}",
                metadata.command_name()
            ))
        })?;

        let context = CommandContext::new(
            message.message_id,
            message.target_id,
            self.shutdown.clone(),
        );
        let invocation = self
            .handlers
            .invoke(metadata.command_type(), command, context, self.codec)
            .ok_or_else(|| Error::HandlerNotFound(metadata.handler_name()))?;

        // Handlers observe shutdown through their context; the pipeline
        // itself only enforces the business timeout.
        let budget = self.pipeline.default_timeout();
        self.pipeline
            .execute_once(budget, &CancellationToken::never(), invocation)
            .await
    }
}

fn failure_message(error: &Error) -> String {
    match error {
        // Handler errors travel as their own message
        Error::Handler(message) => message.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("codec", &self.codec)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
