//! Command type registry
//!
//! Peers agree on "which command is this" through a short hash of the
//! command's stable name instead of sending type names across the wire:
//!
//! ```text
//! sha256("<command_name>|<version>")[..8]  ->  hex  ->  "3fa1c09b5e27d4a8"
//! ```
//!
//! Renaming a command or bumping its version changes its hash. Two distinct
//! types that land on the same hash are a configuration error.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use sha2::{Digest, Sha256};

use crate::command::IpcCommand;
use crate::error::{Error, Result};
use crate::protocol::Codec;

/// Number of digest bytes kept in a type hash (hex doubles the length)
pub const TYPE_HASH_LEN: usize = 8;

/// Decodes an envelope payload into the concrete command, boxed
pub type PayloadDecoder = fn(Codec, &[u8]) -> Result<Box<dyn Any + Send>>;

/// Compute the type hash for a command name and optional version
pub fn compute_type_hash(name: &str, version: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    if let Some(version) = version {
        hasher.update(b"|");
        hasher.update(version.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..TYPE_HASH_LEN])
}

fn decode_payload<C: IpcCommand>(codec: Codec, bytes: &[u8]) -> Result<Box<dyn Any + Send>> {
    let command: C = codec.decode(bytes)?;
    Ok(Box::new(command))
}

/// Everything known about a registered command type
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    command_type: TypeId,
    command_name: String,
    payload_type: &'static str,
    response_type: Option<&'static str>,
    type_hash: String,
    decoder: PayloadDecoder,
}

impl CommandMetadata {
    /// Build metadata for a command type
    pub fn of<C: IpcCommand>() -> Self {
        let command_name = C::command_name().into_owned();
        let type_hash = compute_type_hash(&command_name, C::version());
        let response_type = if TypeId::of::<C::Response>() == TypeId::of::<()>() {
            None
        } else {
            Some(type_name::<C::Response>())
        };

        Self {
            command_type: TypeId::of::<C>(),
            command_name,
            payload_type: type_name::<C>(),
            response_type,
            type_hash,
            decoder: decode_payload::<C>,
        }
    }

    pub fn command_type(&self) -> TypeId {
        self.command_type
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn response_type(&self) -> Option<&'static str> {
        self.response_type
    }

    pub fn type_hash(&self) -> &str {
        &self.type_hash
    }

    /// Decode a payload into this command type
    pub fn decode(&self, codec: Codec, bytes: &[u8]) -> Result<Box<dyn Any + Send>> {
        (self.decoder)(codec, bytes)
    }

    /// Display name of the handler this command needs
    pub fn handler_name(&self) -> String {
        format!(
            "CommandHandler<{}, {}>",
            self.payload_type,
            self.response_type.unwrap_or("()")
        )
    }
}

#[derive(Default)]
struct Tables {
    by_hash: HashMap<String, Arc<CommandMetadata>>,
    by_type: HashMap<TypeId, String>,
}

/// Bidirectional map between command types and their hashes
///
/// Entries are never removed. Lookups take a shared lock, registration an
/// exclusive one, so both tables always change together.
#[derive(Default)]
pub struct TypeRegistry {
    tables: RwLock<Tables>,
}

impl TypeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<TypeRegistry> {
        static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TypeRegistry::new())))
    }

    /// Register a command type, returning its hash
    ///
    /// Registering the same type again replaces its metadata.
    pub fn register<C: IpcCommand>(&self) -> Result<String> {
        self.insert(CommandMetadata::of::<C>())
    }

    /// Register a whole set of commands at once
    ///
    /// ```rust,ignore
    /// registry.register_set([
    ///     CommandMetadata::of::<Ping>(),
    ///     CommandMetadata::of::<Shutdown>(),
    /// ])?;
    /// ```
    pub fn register_set(&self, set: impl IntoIterator<Item = CommandMetadata>) -> Result<()> {
        for metadata in set {
            self.insert(metadata)?;
        }
        Ok(())
    }

    fn insert(&self, metadata: CommandMetadata) -> Result<String> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let hash = metadata.type_hash.clone();

        if let Some(existing) = tables.by_hash.get(&hash) {
            if existing.command_type != metadata.command_type {
                tracing::error!(
                    hash = %hash,
                    existing = %existing.payload_type,
                    incoming = %metadata.payload_type,
                    "command type hash collision"
                );
                return Err(Error::HashCollision {
                    hash,
                    existing: existing.payload_type.to_string(),
                    incoming: metadata.payload_type.to_string(),
                });
            }
        }

        // A type whose name changed between registrations keeps only its new hash.
        if let Some(previous) = tables.by_type.insert(metadata.command_type, hash.clone()) {
            if previous != hash {
                tables.by_hash.remove(&previous);
            }
        }

        tracing::debug!(
            hash = %hash,
            command = %metadata.command_name,
            "registered command type"
        );
        tables.by_hash.insert(hash.clone(), Arc::new(metadata));
        Ok(hash)
    }

    /// Hash of a command type, registering it on first use
    pub fn type_hash<C: IpcCommand>(&self) -> Result<String> {
        if let Some(hash) = self.type_hash_of(TypeId::of::<C>()) {
            return Ok(hash);
        }
        self.register::<C>()
    }

    /// Hash of an already registered type
    pub fn type_hash_of(&self, command_type: TypeId) -> Option<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_type.get(&command_type).cloned()
    }

    /// Type registered under a hash
    pub fn command_type(&self, hash: &str) -> Option<TypeId> {
        self.metadata(hash).map(|m| m.command_type)
    }

    /// Metadata registered under a hash
    pub fn metadata(&self, hash: &str) -> Option<Arc<CommandMetadata>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_hash.get(hash).cloned()
    }

    /// Snapshot of all registered commands
    pub fn commands(&self) -> Vec<Arc<CommandMetadata>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_hash.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("commands", &self.len())
            .finish()
    }
}
