//! Handler registry
//!
//! Maps each command type to a factory for its handler. Invocation is type
//! erased: the dispatcher holds a decoded command as `Box<dyn Any>` and the
//! closure built at registration time downcasts it back.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use crate::command::{CommandContext, CommandHandler, IpcCommand};
use crate::error::{Error, Result};
use crate::protocol::Codec;

type BoxFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;

type AnyCommand = Box<dyn Any + Send>;

/// Type-erased handler invocation
type ErasedInvoker = Arc<dyn Fn(AnyCommand, CommandContext, Codec) -> BoxFuture + Send + Sync>;

/// Registry of handler factories keyed by command type
#[derive(Default)]
pub struct HandlerRegistry {
    invokers: RwLock<HashMap<TypeId, ErasedInvoker>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler factory for command `C`
    ///
    /// The factory runs once per message. Registering `C` again replaces the
    /// previous factory.
    pub fn register<C, H, F>(&self, factory: F)
    where
        C: IpcCommand,
        H: CommandHandler<C>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let invoker: ErasedInvoker = Arc::new(
            move |command: AnyCommand, context: CommandContext, codec: Codec| -> BoxFuture {
                let handler = factory();
                Box::pin(async move {
                    let command = command.downcast::<C>().map_err(|_| {
                        Error::Deserialization(format!("payload is not a {}", type_name::<C>()))
                    })?;
                    let response = handler
                        .handle(*command, context)
                        .await
                        .map_err(|e| Error::Handler(e.to_string()))?;
                    codec.encode(&response)
                })
            },
        );

        let previous = self
            .invokers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<C>(), invoker);
        if previous.is_some() {
            tracing::debug!(command = type_name::<C>(), "replaced command handler");
        }
    }

    pub fn contains(&self, command_type: TypeId) -> bool {
        self.invokers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&command_type)
    }

    /// Build a fresh handler and run it on `command`
    ///
    /// Returns `None` if no handler is registered for `command_type`.
    pub(crate) fn invoke(
        &self,
        command_type: TypeId,
        command: AnyCommand,
        context: CommandContext,
        codec: Codec,
    ) -> Option<BoxFuture> {
        let invoker = self
            .invokers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command_type)
            .cloned()?;
        Some(invoker(command, context, codec))
    }

    pub fn len(&self) -> usize {
        self.invokers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cancel::CancellationToken;

    #[derive(Debug, Serialize, Deserialize)]
    struct Double {
        value: i32,
    }

    impl IpcCommand for Double {
        type Response = i32;
    }

    struct Doubler;

    impl CommandHandler<Double> for Doubler {
        async fn handle(&self, command: Double, _context: CommandContext) -> anyhow::Result<i32> {
            if command.value < 0 {
                anyhow::bail!("negative input");
            }
            Ok(command.value * 2)
        }
    }

    fn context() -> CommandContext {
        CommandContext::new("m-1".into(), None, CancellationToken::never())
    }

    #[test]
    fn test_invokes_registered_handler() {
        let registry = HandlerRegistry::new();
        registry.register::<Double, _, _>(|| Doubler);

        let future = registry
            .invoke(TypeId::of::<Double>(), Box::new(Double { value: 21 }), context(), Codec::Json)
            .unwrap();
        let bytes = smol::block_on(future).unwrap();
        assert_eq!(bytes, b"42");
    }

    #[test]
    fn test_handler_error_keeps_message_only() {
        let registry = HandlerRegistry::new();
        registry.register::<Double, _, _>(|| Doubler);

        let future = registry
            .invoke(TypeId::of::<Double>(), Box::new(Double { value: -1 }), context(), Codec::Json)
            .unwrap();
        match smol::block_on(future) {
            Err(Error::Handler(message)) => assert_eq!(message, "negative input"),
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry
            .invoke(TypeId::of::<Double>(), Box::new(Double { value: 1 }), context(), Codec::Json)
            .is_none());
    }

    #[test]
    fn test_factory_runs_per_invocation() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        let registry = HandlerRegistry::new();
        registry.register::<Double, _, _>(|| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Doubler
        });

        for value in 0..3 {
            let future = registry
                .invoke(TypeId::of::<Double>(), Box::new(Double { value }), context(), Codec::Json)
                .unwrap();
            smol::block_on(future).unwrap();
        }
        assert_eq!(BUILT.load(Ordering::SeqCst), 3);
    }
}
