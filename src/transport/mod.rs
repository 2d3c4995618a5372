//! Byte transports between client and server
//!
//! Platform-specific implementations are selected at compile time:
//! - Unix: domain sockets ([`unix`])
//! - Windows: named pipes ([`windows`])
//!
//! Both carry length-prefixed frames (see [`frame`]).

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures_lite::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

pub mod frame;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(not(any(unix, windows)))]
mod unsupported;

#[cfg(unix)]
pub use unix::{UnixSocketClient as PlatformClient, UnixSocketListener as PlatformListener};

#[cfg(windows)]
pub use windows::{NamedPipeClient as PlatformClient, NamedPipeListener as PlatformListener};

#[cfg(not(any(unix, windows)))]
pub use unsupported::{UnsupportedClient as PlatformClient, UnsupportedListener as PlatformListener};

/// Address of one listener instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    NamedPipe(String),
    UnixSocket(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::NamedPipe(name) => f.write_str(name),
            Endpoint::UnixSocket(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Transport family for the current target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    NamedPipe,
    UnixSocket,
}

impl Platform {
    /// Pick the transport for the compile target
    pub fn current() -> Result<Self> {
        if cfg!(windows) {
            Ok(Platform::NamedPipe)
        } else if cfg!(unix) {
            Ok(Platform::UnixSocket)
        } else {
            Err(Error::UnsupportedPlatform(std::env::consts::OS))
        }
    }
}

/// Client side of a connection
///
/// A transport starts unconnected; `connect` is called lazily before the
/// first write and again after the transport was closed.
pub trait ClientTransport: Send + 'static {
    fn connect(&mut self, timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Write one frame
    fn write(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read one frame; a closed stream is [`Error::NoResponse`]
    fn read(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self);
}

/// Server side of a fixed endpoint
pub trait Listener: Sized + Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bind `endpoint`, expecting at most `max_connections` open at once
    fn bind(endpoint: &Endpoint, max_connections: u32) -> Result<Self>;

    fn accept(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    fn endpoint(&self) -> &Endpoint;
}
