//! Windows named pipe transport
//!
//! Pipe handles are synchronous; blocking calls run on the `blocking`
//! thread pool and the resulting files are driven through [`Unblock`].

use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::io::FromRawHandle;
use std::time::{Duration, Instant};

use async_io::Timer;
use blocking::{Unblock, unblock};
use futures_lite::future;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, INVALID_HANDLE_VALUE,
};
use windows::Win32::Storage::FileSystem::PIPE_ACCESS_DUPLEX;
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};
use windows::core::HSTRING;

use crate::error::{Error, Result};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{ClientTransport, Endpoint, Listener};

const BUFFER_SIZE: u32 = 64 * 1024;
const BUSY_BACKOFF: Duration = Duration::from_millis(20);

fn pipe_name(endpoint: &Endpoint) -> Result<&str> {
    match endpoint {
        Endpoint::NamedPipe(name) => Ok(name),
        Endpoint::UnixSocket(path) => Err(Error::Config(format!(
            "unix socket endpoint {} is not available on this platform",
            path.display()
        ))),
    }
}

/// Client connection to one named pipe
#[derive(Debug)]
pub struct NamedPipeClient {
    endpoint: Endpoint,
    pipe: Option<Unblock<File>>,
}

impl NamedPipeClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            pipe: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn pipe(&mut self) -> Result<&mut Unblock<File>> {
        self.pipe.as_mut().ok_or(Error::NoResponse)
    }
}

impl ClientTransport for NamedPipeClient {
    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        let name = pipe_name(&self.endpoint)?.to_string();
        let deadline = Instant::now() + timeout;

        // All instances busy: wait for one to be recreated
        let file = loop {
            let path = name.clone();
            let opened =
                unblock(move || OpenOptions::new().read(true).write(true).open(path)).await;
            match opened {
                Ok(file) => break file,
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY.0 as i32) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout(timeout));
                    }
                    Timer::after(BUSY_BACKOFF).await;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        };

        tracing::debug!(pipe = %name, "connected");
        self.pipe = Some(Unblock::new(file));
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let result = write_frame(self.pipe()?, frame).await;
        if result.is_err() {
            self.close();
        }
        result
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        match read_frame(self.pipe()?).await {
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
        self.pipe.is_some()
    }

    fn close(&mut self) {
        self.pipe = None;
    }
}

/// Listener creating one pipe instance per accepted connection
#[derive(Debug)]
pub struct NamedPipeListener {
    endpoint: Endpoint,
    name: String,
    max_instances: u32,
}

fn create_and_connect(name: &str, max_instances: u32) -> io::Result<File> {
    let wide = HSTRING::from(name);
    // SAFETY: `wide` outlives the call and the returned handle is checked
    // before use; ownership moves into the `File` below.
    unsafe {
        let handle = CreateNamedPipeW(
            &wide,
            PIPE_ACCESS_DUPLEX,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
            max_instances,
            BUFFER_SIZE,
            BUFFER_SIZE,
            0,
            None,
        );
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        if let Err(e) = ConnectNamedPipe(handle, None) {
            // A client that raced ahead of ConnectNamedPipe is already connected
            if e.code() != ERROR_PIPE_CONNECTED.to_hresult() {
                let _ = CloseHandle(handle);
                return Err(io::Error::from_raw_os_error(e.code().0 & 0xFFFF));
            }
        }

        Ok(File::from_raw_handle(handle.0))
    }
}

impl Listener for NamedPipeListener {
    type Stream = Unblock<File>;

    fn bind(endpoint: &Endpoint, max_connections: u32) -> Result<Self> {
        let name = pipe_name(endpoint)?.to_string();
        tracing::debug!(pipe = %name, max_instances = max_connections, "listening");
        Ok(Self {
            endpoint: endpoint.clone(),
            name,
            max_instances: max_connections.clamp(1, PIPE_UNLIMITED_INSTANCES - 1),
        })
    }

    async fn accept(&self) -> Result<Unblock<File>> {
        let name = self.name.clone();
        let max_instances = self.max_instances;
        let file = unblock(move || create_and_connect(&name, max_instances)).await?;
        Ok(Unblock::new(file))
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_cross_the_pipe() {
        let name = format!(r"\\.\pipe\courier-test-{}", uuid::Uuid::new_v4());
        let endpoint = Endpoint::NamedPipe(name);

        smol::block_on(async {
            let listener = NamedPipeListener::bind(&endpoint, 1).unwrap();
            let server = smol::spawn(async move {
                let mut pipe = listener.accept().await.unwrap();
                let frame = read_frame(&mut pipe).await.unwrap().unwrap();
                write_frame(&mut pipe, &frame).await.unwrap();
            });

            let mut client = NamedPipeClient::new(endpoint.clone());
            let connected = future::or(
                async {
                    loop {
                        if client.connect(Duration::from_secs(1)).await.is_ok() {
                            break true;
                        }
                        Timer::after(Duration::from_millis(10)).await;
                    }
                },
                async {
                    Timer::after(Duration::from_secs(5)).await;
                    false
                },
            )
            .await;
            assert!(connected);

            client.write(b"hello").await.unwrap();
            assert_eq!(client.read().await.unwrap(), b"hello");
            server.await;
        });
    }

    #[test]
    fn test_instance_limit_stays_below_unlimited() {
        let endpoint = Endpoint::NamedPipe(r"\\.\pipe\courier-limit".into());
        assert_eq!(NamedPipeListener::bind(&endpoint, 4).unwrap().max_instances, 4);
        assert_eq!(NamedPipeListener::bind(&endpoint, 0).unwrap().max_instances, 1);
        assert_eq!(
            NamedPipeListener::bind(&endpoint, u32::MAX).unwrap().max_instances,
            PIPE_UNLIMITED_INSTANCES - 1
        );
    }
}
