//! Placeholders for targets without a supported transport
//!
//! Construction succeeds so the crate builds everywhere; every operation
//! fails with [`Error::UnsupportedPlatform`].

use std::time::Duration;

use futures_lite::io::Cursor;

use crate::error::{Error, Result};
use crate::transport::{ClientTransport, Endpoint, Listener};

fn unsupported() -> Error {
    Error::UnsupportedPlatform(std::env::consts::OS)
}

#[derive(Debug)]
pub struct UnsupportedClient {
    endpoint: Endpoint,
}

impl UnsupportedClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl ClientTransport for UnsupportedClient {
    async fn connect(&mut self, _timeout: Duration) -> Result<()> {
        Err(unsupported())
    }

    async fn write(&mut self, _frame: &[u8]) -> Result<()> {
        Err(unsupported())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        Err(unsupported())
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}

#[derive(Debug)]
pub struct UnsupportedListener {
    endpoint: Endpoint,
}

impl Listener for UnsupportedListener {
    type Stream = Cursor<Vec<u8>>;

    fn bind(_endpoint: &Endpoint, _max_connections: u32) -> Result<Self> {
        Err(unsupported())
    }

    async fn accept(&self) -> Result<Self::Stream> {
        Err(unsupported())
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
