//! Bridge to the QUIK trading terminal's Lua connector.
//!
//! Two independent newline-delimited JSON channels over TCP:
//!
//! - [`Session`]: commands to the terminal, one reply line per command.
//! - [`EventServer`]: events pushed by the terminal, dispatched to an
//!   [`EventHandler`].
//!
//! [`QuikClient`] layers typed commands on top of a session.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
#[cfg(feature = "cli")]
pub mod logging;
pub mod models;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::QuikClient;
pub use codec::LineEncoding;
pub use config::{BridgeConfig, ClientConfig, Mode, ServerConfig, SessionConfig};
pub use error::{Error, Result};
pub use handler::{EventHandler, LoggingHandler};
pub use lifecycle::Lifecycle;
pub use protocol::{Command, CommandResult, Event};
pub use server::{run_until_signal, EventServer};
pub use session::Session;
