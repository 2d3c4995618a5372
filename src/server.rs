//! IPC server
//!
//! Runs `transport_count` listener instances. Each instance accepts
//! connections on its own endpoint and runs one dispatch loop, so commands
//! arriving at an instance are processed one at a time:
//!
//! ```text
//! accept -> connection --(frame, reply)--> instance channel -> dispatch loop
//!               ^                                                   |
//!               +------------------- response ---------------------+
//! ```
//!
//! A connection reads its next frame only after the previous response was
//! written, so it never reads and writes at the same time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_io::Timer;
use futures_lite::future;
use futures_lite::io::{AsyncRead, AsyncWrite};
use smol::Task;
use smol::channel::{Receiver, Sender};
use smol::lock::{Semaphore, SemaphoreGuardArc};

use crate::cancel::{CancellationSource, CancellationToken};
use crate::command::{CommandHandler, IpcCommand};
use crate::config::IpcConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::registry::TypeRegistry;
use crate::resilience::{PipelineObserver, ResiliencePipeline};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{Endpoint, Listener, Platform, PlatformListener};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Builder for [`IpcServer`]
pub struct IpcServerBuilder {
    config: IpcConfig,
    types: Arc<TypeRegistry>,
    handlers: HandlerRegistry,
    observer: Arc<dyn PipelineObserver>,
    error: Option<Error>,
}

impl IpcServerBuilder {
    /// Use a specific type registry instead of the process-wide one
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register command `C` and the factory building its handler
    ///
    /// A registration error (such as a hash collision) is reported by
    /// [`build`](Self::build).
    pub fn handler<C, H>(mut self, factory: impl Fn() -> H + Send + Sync + 'static) -> Self
    where
        C: IpcCommand,
        H: CommandHandler<C>,
    {
        match self.types.register::<C>() {
            Ok(hash) => {
                tracing::debug!(command = %C::command_name(), hash = %hash, "registered handler");
                self.handlers.register::<C, H, _>(factory);
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    pub fn build(self) -> Result<IpcServer> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let shutdown = CancellationSource::new();
        let pipeline = ResiliencePipeline::command_processing(&self.config, self.observer);
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.types),
            Arc::new(self.handlers),
            pipeline,
            self.config.codec(),
            shutdown.token(),
        );

        Ok(IpcServer {
            endpoints: self.config.transport().endpoints(),
            config: self.config,
            types: self.types,
            dispatcher: Arc::new(dispatcher),
            shutdown,
            started: AtomicBool::new(false),
            instances: Mutex::new(Vec::new()),
        })
    }
}

/// Server hosting command handlers on a set of listener instances
pub struct IpcServer {
    config: IpcConfig,
    endpoints: Vec<Endpoint>,
    types: Arc<TypeRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationSource,
    started: AtomicBool,
    instances: Mutex<Vec<Task<()>>>,
}

impl IpcServer {
    pub fn builder(config: IpcConfig) -> IpcServerBuilder {
        IpcServerBuilder {
            config,
            types: TypeRegistry::global(),
            handlers: HandlerRegistry::new(),
            observer: Arc::new(()),
            error: None,
        }
    }

    /// Bind every endpoint and start serving
    ///
    /// Fails if the platform has no transport or an endpoint cannot be
    /// bound; nothing keeps running in that case.
    pub fn start(&self) -> Result<()> {
        Platform::current()?;
        if self.shutdown.is_cancelled() {
            return Err(Error::Config("server was stopped and cannot be restarted".into()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Config("server is already running".into()));
        }

        let max_connections = self.config.transport().max_server_instances();
        let listeners = match self
            .endpoints
            .iter()
            .map(|endpoint| PlatformListener::bind(endpoint, max_connections))
            .collect::<Result<Vec<_>>>()
        {
            Ok(listeners) => listeners,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut instances = self.lock_instances();
        for (index, listener) in listeners.into_iter().enumerate() {
            instances.push(smol::spawn(run_instance(
                index,
                listener,
                max_connections,
                Arc::clone(&self.dispatcher),
                self.shutdown.token(),
            )));
        }

        tracing::info!(
            instances = self.endpoints.len(),
            codec = ?self.config.codec(),
            first = %self.endpoints[0],
            "IPC server started"
        );
        Ok(())
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, Vec<Task<()>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting work
    ///
    /// Connections finish the command in flight and then close. Safe to call
    /// repeatedly and before `start`.
    pub fn stop(&self) {
        if self.shutdown.cancel() {
            tracing::debug!("IPC server stopping");
        }
        for task in self.lock_instances().drain(..) {
            task.detach();
        }
    }

    /// Stop and wait until every instance has finished
    ///
    /// Commands already read are processed and answered first.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<Task<()>> = self.lock_instances().drain(..).collect();
        for task in tasks {
            task.await;
        }
        tracing::info!("IPC server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
        if self.started.load(Ordering::SeqCst) {
            for endpoint in &self.endpoints {
                if let Endpoint::UnixSocket(path) = endpoint {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }
}

impl std::fmt::Debug for IpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcServer")
            .field("endpoints", &self.endpoints)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A received frame and where its response goes
struct Job {
    frame: Vec<u8>,
    reply: Sender<Option<Vec<u8>>>,
}

/// Accept loop of one listener instance
async fn run_instance<L: Listener>(
    index: usize,
    listener: L,
    max_connections: u32,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let (jobs_tx, jobs_rx) = smol::channel::bounded::<Job>(1);
    let dispatch = smol::spawn(dispatch_loop(index, jobs_rx, dispatcher));
    let slots = Arc::new(Semaphore::new(max_connections as usize));
    let mut connections: Vec<Task<()>> = Vec::new();

    loop {
        let accepted = future::or(
            async {
                shutdown.cancelled().await;
                None
            },
            async {
                let slot = slots.acquire_arc().await;
                Some((slot, listener.accept().await))
            },
        )
        .await;

        match accepted {
            None => break,
            Some((slot, Ok(stream))) => {
                connections.retain(|task| !task.is_finished());
                tracing::debug!(
                    instance = index,
                    endpoint = %listener.endpoint(),
                    connections = connections.len() + 1,
                    "client connected"
                );
                connections.push(smol::spawn(serve_connection(
                    index,
                    stream,
                    jobs_tx.clone(),
                    shutdown.clone(),
                    slot,
                )));
            }
            Some((_, Err(e))) => {
                tracing::warn!(instance = index, error = %e, "failed to accept IPC connection");
                Timer::after(ACCEPT_BACKOFF).await;
            }
        }
    }

    // The dispatch loop drains once every connection let go of its sender.
    drop(jobs_tx);
    for connection in connections {
        connection.await;
    }
    dispatch.await;
    tracing::debug!(instance = index, "listener instance stopped");
}

async fn dispatch_loop(index: usize, jobs: Receiver<Job>, dispatcher: Arc<Dispatcher>) {
    while let Ok(job) = jobs.recv().await {
        let reply = dispatcher.dispatch_frame(&job.frame).await;
        if job.reply.send(reply).await.is_err() {
            tracing::debug!(instance = index, "connection closed before its response");
        }
    }
}

async fn serve_connection<S>(
    index: usize,
    mut stream: S,
    jobs: Sender<Job>,
    shutdown: CancellationToken,
    _slot: SemaphoreGuardArc,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = smol::channel::bounded(1);

    loop {
        // Shutdown stops reading; a frame already read is still answered.
        let read = future::or(
            async {
                shutdown.cancelled().await;
                Ok(None)
            },
            read_frame(&mut stream),
        );
        let frame = match read.await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(instance = index, error = %e, "failed to read frame");
                break;
            }
        };

        let job = Job {
            frame,
            reply: reply_tx.clone(),
        };
        if jobs.send(job).await.is_err() {
            break;
        }
        let Ok(reply) = reply_rx.recv().await else {
            break;
        };
        let Some(reply) = reply else {
            continue;
        };
        if let Err(e) = write_frame(&mut stream, &reply).await {
            tracing::debug!(instance = index, error = %e, "failed to write response");
            break;
        }
    }
    tracing::debug!(instance = index, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    fn config(dir: &std::path::Path) -> IpcConfig {
        IpcConfig::builder()
            .transport(
                TransportConfig::builder()
                    .unix_socket_path(dir.join("srv.sock"))
                    .pipe_name(format!("courier-srv-{}", uuid::Uuid::new_v4()))
                    .transport_count(2)
                    .client_pool_size(2)
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let server = IpcServer::builder(config(dir.path()))
            .types(Arc::new(TypeRegistry::new()))
            .build()
            .unwrap();
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert!(server.start().is_err());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = IpcServer::builder(config(dir.path()))
            .types(Arc::new(TypeRegistry::new()))
            .build()
            .unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        assert!(matches!(server.start(), Err(Error::Config(_))));
        smol::block_on(server.shutdown());
        assert!(!server.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_removes_socket_files() {
        let dir = tempfile::tempdir().unwrap();
        let server = IpcServer::builder(config(dir.path()))
            .types(Arc::new(TypeRegistry::new()))
            .build()
            .unwrap();
        server.start().unwrap();

        let paths: Vec<_> = server
            .endpoints()
            .iter()
            .map(|endpoint| match endpoint {
                Endpoint::UnixSocket(path) => path.clone(),
                Endpoint::NamedPipe(_) => unreachable!(),
            })
            .collect();
        assert!(paths.iter().all(|path| path.exists()));

        drop(server);
        assert!(paths.iter().all(|path| !path.exists()));
    }
}
