//! Outbound command session.
//!
//! The connector's command channel has no request ids: the reply to a command
//! is simply the next line on the socket. A [`Session`] therefore allows one
//! exchange at a time. Concurrent callers queue on a fair async mutex and are
//! served in the order they asked for the lock.
//!
//! ```text
//! call A ──lock──► write A ─► read line ─► unlock
//! call B ──wait────────────────────────────────► lock ─► write B ─► ...
//! ```
//!
//! A call abandoned between its write and its read (deadline expiry or a
//! dropped future) leaves a reply in flight that would be read by the next
//! caller. Any expired deadline, including one that fired while the call was
//! still queued for the lock, poisons the session the same way: the
//! connection is dropped and every later call fails until
//! [`Session::reconnect`] succeeds.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use crate::codec::{self, LINE_TERMINATOR};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::pool::CommandPool;
use crate::protocol::CommandResult;

pub struct Session {
    peer: SocketAddr,
    config: SessionConfig,
    pool: CommandPool,
    /// Set by any expired call; cleared by a successful reconnect.
    poisoned: AtomicBool,
    state: Mutex<State>,
}

struct State {
    conn: Option<Connection>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set from the first written byte until the reply line is complete.
    in_flight: bool,
    line: Vec<u8>,
    max_line: usize,
}

impl Connection {
    async fn open(peer: SocketAddr, config: &SessionConfig) -> Result<Self> {
        let timeout = config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Self::from_stream(stream, config.max_line)
    }

    fn from_stream(stream: TcpStream, max_line: usize) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            in_flight: false,
            line: Vec::with_capacity(512),
            max_line,
        })
    }

    /// Writes one frame and reads the next full line into `self.line`.
    async fn round_trip(&mut self, frame: &[u8]) -> io::Result<()> {
        self.in_flight = true;
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;

        self.line.clear();
        let read = codec::read_line(&mut self.reader, &mut self.line, self.max_line).await?;
        if read == 0 || self.line.last() != Some(&LINE_TERMINATOR) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "terminal closed the command channel",
            ));
        }
        self.in_flight = false;
        Ok(())
    }
}

impl Session {
    /// Connects to the connector's command port.
    pub async fn connect(addr: impl ToSocketAddrs, config: SessionConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;
        let peer = stream.peer_addr()?;
        let conn = Connection::from_stream(stream, config.max_line)?;
        info!("Command session connected to {}", peer);

        Ok(Self {
            peer,
            pool: CommandPool::new(config.pool_capacity),
            config,
            poisoned: AtomicBool::new(false),
            state: Mutex::new(State { conn: Some(conn) }),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `name` with `payload` and waits at most `deadline` for the reply.
    ///
    /// A `null` payload (e.g. `()`) omits the `data` field. A reply with
    /// `success=false` is returned as [`Error::Protocol`].
    pub async fn call(
        &self,
        name: &str,
        payload: impl Serialize,
        deadline: Duration,
    ) -> Result<CommandResult> {
        self.call_raw(name, payload, deadline).await?.into_checked(name)
    }

    /// Like [`Session::call`], but hands back rejected results unchanged.
    pub async fn call_raw(
        &self,
        name: &str,
        payload: impl Serialize,
        deadline: Duration,
    ) -> Result<CommandResult> {
        let mut command = self.pool.acquire();
        command.name.push_str(name);
        command.payload = match serde_json::to_value(payload).map_err(Error::Encode)? {
            Value::Null => None,
            value => Some(value),
        };
        let frame = codec::encode_command(&command)?;

        match tokio::time::timeout(deadline, self.exchange(name, &frame)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Command {} timed out after {:?}", name, deadline);
                self.poison();
                Err(Error::Timeout(deadline))
            }
        }
    }

    async fn exchange(&self, name: &str, frame: &[u8]) -> Result<CommandResult> {
        let mut state = self.state.lock().await;

        let conn = match state.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(Error::SessionClosed),
        };
        if conn.in_flight || self.poisoned.load(Ordering::Acquire) {
            warn!("Dropping desynchronized command session to {}", self.peer);
            state.conn = None;
            return Err(Error::Desynchronized);
        }

        debug!("-> {}", String::from_utf8_lossy(codec::trim_terminator(frame)));
        if let Err(err) = conn.round_trip(frame).await {
            warn!("Command {} failed on {}: {}", name, self.peer, err);
            state.conn = None;
            return Err(Error::Transport(err));
        }
        debug!("<- {}", String::from_utf8_lossy(codec::trim_terminator(&conn.line)));

        codec::decode_result(&conn.line, self.config.encoding)
    }

    /// Marks the session unusable after an expired call. The connection is
    /// dropped now if the lock is free, otherwise by the next caller.
    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
        if let Ok(mut state) = self.state.try_lock() {
            if state.conn.take().is_some() {
                warn!("Dropping command session to {} after expired call", self.peer);
            }
        }
    }

    /// True while the session holds a connection that is safe to use.
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        !self.poisoned.load(Ordering::Acquire)
            && state.conn.as_ref().is_some_and(|conn| !conn.in_flight)
    }

    /// Replaces the connection with a fresh one to the same peer.
    pub async fn reconnect(&self) -> Result<()> {
        let conn = Connection::open(self.peer, &self.config).await?;
        let mut state = self.state.lock().await;
        if let Some(mut old) = state.conn.replace(conn) {
            let _ = old.writer.shutdown().await;
        }
        self.poisoned.store(false, Ordering::Release);
        info!("Command session reconnected to {}", self.peer);
        Ok(())
    }

    /// Shuts the connection down. Later calls fail with [`Error::SessionClosed`].
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut conn) = state.conn.take() {
            info!("Closing command session to {}", self.peer);
            conn.writer.shutdown().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
