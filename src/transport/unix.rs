//! Unix domain socket transport

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_io::Timer;
use async_net::unix::{UnixListener, UnixStream};
use futures_lite::future;

use crate::error::{Error, Result};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{ClientTransport, Endpoint, Listener};

fn socket_path(endpoint: &Endpoint) -> Result<&Path> {
    match endpoint {
        Endpoint::UnixSocket(path) => Ok(path),
        Endpoint::NamedPipe(name) => Err(Error::Config(format!(
            "named pipe endpoint {name} is not available on this platform"
        ))),
    }
}

/// Client connection to one socket path
#[derive(Debug)]
pub struct UnixSocketClient {
    endpoint: Endpoint,
    stream: Option<UnixStream>,
}

impl UnixSocketClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stream(&mut self) -> Result<&mut UnixStream> {
        self.stream.as_mut().ok_or(Error::NoResponse)
    }
}

impl ClientTransport for UnixSocketClient {
    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        let path = socket_path(&self.endpoint)?.to_path_buf();
        let stream = future::or(
            async { UnixStream::connect(&path).await.map_err(Error::from) },
            async {
                Timer::after(timeout).await;
                Err(Error::Timeout(timeout))
            },
        )
        .await?;
        tracing::debug!(path = %path.display(), "connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let result = write_frame(self.stream()?, frame).await;
        if result.is_err() {
            self.close();
        }
        result
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        match read_frame(self.stream()?).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                self.close();
                Err(Error::NoResponse)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Listener bound to one socket path
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct UnixSocketListener {
    endpoint: Endpoint,
    path: PathBuf,
    listener: UnixListener,
}

impl Listener for UnixSocketListener {
    type Stream = UnixStream;

    fn bind(endpoint: &Endpoint, _max_connections: u32) -> Result<Self> {
        let path = socket_path(endpoint)?.to_path_buf();

        // Remove a stale socket left by an earlier run
        let _ = std::fs::remove_file(&path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&path)?;
        tracing::debug!(path = %path.display(), "listening");

        Ok(Self {
            endpoint: endpoint.clone(),
            path,
            listener,
        })
    }

    async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_cross_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::UnixSocket(dir.path().join("nested").join("t.sock"));

        smol::block_on(async {
            let listener = UnixSocketListener::bind(&endpoint, 1).unwrap();
            let server = smol::spawn(async move {
                let mut stream = listener.accept().await.unwrap();
                let frame = read_frame(&mut stream).await.unwrap().unwrap();
                write_frame(&mut stream, &frame).await.unwrap();
                listener
            });

            let mut client = UnixSocketClient::new(endpoint.clone());
            assert!(!client.is_connected());
            client.connect(Duration::from_secs(1)).await.unwrap();
            client.write(b"hello").await.unwrap();
            assert_eq!(client.read().await.unwrap(), b"hello");

            drop(server.await);
            // Peer gone: next read reports no response and disconnects
            assert!(matches!(client.read().await, Err(Error::NoResponse)));
            assert!(!client.is_connected());
        });

        let Endpoint::UnixSocket(path) = endpoint else {
            unreachable!()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = UnixSocketClient::new(Endpoint::UnixSocket(dir.path().join("none.sock")));
        let result = smol::block_on(client.connect(Duration::from_secs(1)));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_rejects_named_pipe_endpoint() {
        let result = UnixSocketListener::bind(&Endpoint::NamedPipe(r"\\.\pipe\x".into()), 1);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
