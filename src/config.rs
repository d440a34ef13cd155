//! Connection and runtime configuration.

use std::time::Duration;

use time::UtcOffset;

use crate::codec::{LineEncoding, DEFAULT_MAX_LINE};
use crate::pool::DEFAULT_POOL_CAPACITY;
use crate::protocol::{DEFAULT_COMMAND_PORT, DEFAULT_EVENT_PORT};

/// Moscow time, the terminal's exchange clock. No DST since 2014.
pub const MOSCOW_OFFSET: UtcOffset = time::macros::offset!(+3);

/// Development or production run. Only affects log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Mode::Development),
            "prod" | "production" => Ok(Mode::Production),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Outbound command session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Encoding of response lines.
    /// Default: UTF-8
    pub encoding: LineEncoding,

    /// Bound on establishing the TCP connection.
    /// Default: 5 s
    pub connect_timeout: Duration,

    /// Idle command envelopes kept for reuse.
    /// Default: 64
    pub pool_capacity: usize,

    /// Longest reply line accepted. A longer reply drops the connection.
    /// Default: 8 MiB
    pub max_line: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encoding: LineEncoding::Utf8,
            connect_timeout: Duration::from_secs(5),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

/// Inbound event server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Encoding of event lines.
    /// Default: UTF-8
    pub encoding: LineEncoding,

    /// Pause after a failed `accept()` before trying again.
    /// Default: 50 ms
    pub accept_backoff: Duration,

    /// Longest event line accepted. A longer line closes its connection.
    /// Default: 8 MiB
    pub max_line: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            encoding: LineEncoding::Utf8,
            accept_backoff: Duration::from_millis(50),
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

/// Typed client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session: SessionConfig,

    /// Offset candle timestamps are rendered in.
    /// Default: +03:00
    pub utc_offset: UtcOffset,

    /// Deadline for `ping`, transactions and order lookups.
    /// Default: 5 s
    pub short_timeout: Duration,

    /// Deadline for data source and account queries.
    /// Default: 10 s
    pub query_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            utc_offset: MOSCOW_OFFSET,
            short_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the connector lives and how to talk to it.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub command_port: u16,
    pub event_port: u16,
    pub mode: Mode,
    pub encoding: LineEncoding,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            event_port: DEFAULT_EVENT_PORT,
            mode: Mode::Development,
            encoding: LineEncoding::Utf8,
        }
    }
}

impl BridgeConfig {
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    /// Events are pushed to us, so listen on every interface.
    pub fn event_addr(&self) -> String {
        format!("0.0.0.0:{}", self.event_port)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            session: SessionConfig {
                encoding: self.encoding,
                ..SessionConfig::default()
            },
            ..ClientConfig::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            encoding: self.encoding,
            ..ServerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_connector() {
        let config = BridgeConfig::default();
        assert_eq!(config.command_addr(), "127.0.0.1:34130");
        assert_eq!(config.event_addr(), "0.0.0.0:34131");
        assert_eq!(ClientConfig::default().utc_offset.whole_hours(), 3);
    }

    #[test]
    fn encoding_flows_into_both_channels() {
        let config = BridgeConfig {
            encoding: LineEncoding::Windows1251,
            ..BridgeConfig::default()
        };
        assert_eq!(config.client_config().session.encoding, LineEncoding::Windows1251);
        assert_eq!(config.server_config().encoding, LineEncoding::Windows1251);
    }

    #[test]
    fn parse_mode() {
        assert_eq!("prod".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!("Development".parse::<Mode>().unwrap(), Mode::Development);
        assert!("staging".parse::<Mode>().is_err());
    }
}
