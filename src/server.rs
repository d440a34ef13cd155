//! Inbound event server.
//!
//! The connector opens its own TCP connections to us and pushes one JSON
//! event per line. Every accepted socket gets a reader task; the server keeps
//! a registry of open connections so [`EventServer::close`] can stop them all.
//!
//! ```text
//! accept loop ──► register(id, peer, signal) ──► reader task
//!                                                 │ read line
//!                                                 │ decode (bad line: log, skip)
//!                                                 │ handler.handle(event) on the blocking pool
//!                                                 └ EOF / error / signal: unregister, shut down
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::task::TaskTracker;

use crate::codec::{self, LineEncoding};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::EventHandler;
use crate::lifecycle::Lifecycle;
use crate::protocol::Event;

pub struct EventServer {
    local_addr: SocketAddr,
    lifecycle: Lifecycle,
    registry: Arc<Registry>,
    tasks: TaskTracker,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, TrackedConnection>>,
}

struct TrackedConnection {
    peer: SocketAddr,
    signal: Lifecycle,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TrackedConnection>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, peer: SocketAddr, signal: Lifecycle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, TrackedConnection { peer, signal });
        id
    }

    fn unregister(&self, id: u64) {
        self.lock().remove(&id);
    }
}

/// Read-only view of the server's open connections.
#[derive(Clone)]
pub struct Connections {
    registry: Arc<Registry>,
}

impl Connections {
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.registry.lock().values().map(|c| c.peer).collect()
    }
}

impl EventServer {
    /// Binds `addr` and starts accepting connections in the background.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        handler: impl EventHandler,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Event server listening on {}", local_addr);

        let lifecycle = Lifecycle::new();
        let registry = Arc::new(Registry::default());
        let tasks = TaskTracker::new();

        let acceptor = Acceptor {
            listener,
            config,
            handler: Arc::new(handler),
            lifecycle: lifecycle.clone(),
            registry: Arc::clone(&registry),
            tasks: tasks.clone(),
        };
        tasks.spawn(acceptor.run());

        Ok(Self {
            local_addr,
            lifecycle,
            registry,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn connections(&self) -> Connections {
        Connections {
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Stops accepting, closes every open connection and waits for all
    /// reader tasks to finish.
    pub async fn close(self) {
        info!("Closing event server on {}", self.local_addr);
        self.lifecycle.trip();
        {
            let open = self.registry.lock();
            for conn in open.values() {
                debug!("Closing event connection from {}", conn.peer);
                conn.signal.trip();
            }
        }
        self.tasks.close();
        self.tasks.wait().await;
        info!("Event server on {} stopped", self.local_addr);
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.lifecycle.trip();
    }
}

impl std::fmt::Debug for EventServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventServer")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

struct Acceptor {
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<dyn EventHandler>,
    lifecycle: Lifecycle,
    registry: Arc<Registry>,
    tasks: TaskTracker,
}

impl Acceptor {
    async fn run(self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.lifecycle.tripped() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_reader(stream, peer),
                Err(err) => {
                    error!("Failed to accept event connection: {}", err);
                    tokio::time::sleep(self.config.accept_backoff).await;
                }
            }
        }
        debug!("Accept loop stopped");
    }

    fn spawn_reader(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("Event connection from {}", peer);
        let signal = self.lifecycle.child();
        let id = self.registry.register(peer, signal.clone());

        let reader = Reader {
            id,
            peer,
            signal,
            encoding: self.config.encoding,
            max_line: self.config.max_line,
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
        };
        self.tasks.spawn(reader.run(stream));
    }
}

struct Reader {
    id: u64,
    peer: SocketAddr,
    signal: Lifecycle,
    encoding: LineEncoding,
    max_line: usize,
    handler: Arc<dyn EventHandler>,
    registry: Arc<Registry>,
}

impl Reader {
    async fn run(self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let outcome = self.read_events(&mut reader).await;

        self.registry.unregister(self.id);
        match outcome {
            Ok(()) => debug!("Event connection from {} closed by peer", self.peer),
            Err(err) if err.is_shutdown() => {
                debug!("Event connection from {} closed on shutdown", self.peer)
            }
            Err(err) => error!("Event connection from {} failed: {}", self.peer, err),
        }

        let mut stream = reader.into_inner();
        let _ = stream.shutdown().await;
    }

    /// Returns `Ok(())` on clean EOF.
    async fn read_events(&self, reader: &mut BufReader<TcpStream>) -> Result<()> {
        let mut line = Vec::with_capacity(1024);
        loop {
            if self.signal.is_tripped() {
                return Err(Error::ShutdownInProgress);
            }

            line.clear();
            let read = tokio::select! {
                biased;
                _ = self.signal.tripped() => return Err(Error::ShutdownInProgress),
                read = codec::read_line(reader, &mut line, self.max_line) => read?,
            };
            if read == 0 {
                return Ok(());
            }
            if codec::is_blank(&line) {
                continue;
            }

            match codec::decode_event(&line, self.encoding) {
                Ok(event) => self.dispatch(event).await,
                Err(err) => error!(
                    "Skipping malformed event from {}: {} (raw: {})",
                    self.peer,
                    err,
                    String::from_utf8_lossy(codec::trim_terminator(&line))
                ),
            }
        }
    }

    /// Runs the handler on the blocking pool and waits for it, so a slow
    /// handler holds back this connection only.
    async fn dispatch(&self, event: Event) {
        let handler = Arc::clone(&self.handler);
        if let Err(err) = tokio::task::spawn_blocking(move || handler.handle(event)).await {
            error!("Event handler for {} failed: {}", self.peer, err);
        }
    }
}

/// Serves events until SIGINT or SIGTERM, then shuts the server down.
pub async fn run_until_signal(
    addr: impl ToSocketAddrs,
    config: ServerConfig,
    handler: impl EventHandler,
) -> Result<()> {
    let server = EventServer::bind(addr, config, handler).await?;
    wait_for_signal().await?;
    info!("Termination signal received");
    server.close().await;
    Ok(())
}

/// Completes on SIGINT, or SIGTERM on unix.
pub async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
