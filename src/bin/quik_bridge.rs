use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use quik_bridge::{logging, BridgeConfig, LineEncoding, LoggingHandler, Mode, QuikClient};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host running the terminal's Lua connector
    #[arg(long, env = "QUIK_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Connector command port
    #[arg(long, env = "QUIK_COMMAND_PORT", default_value_t = 34130)]
    command_port: u16,

    /// Local port the connector pushes events to
    #[arg(long, env = "QUIK_EVENT_PORT", default_value_t = 34131)]
    event_port: u16,

    /// development or production (log verbosity only)
    #[arg(long, env = "QUIK_MODE", default_value = "development")]
    mode: Mode,

    /// Encoding of lines sent by the connector (utf-8 or windows-1251)
    #[arg(long, env = "QUIK_ENCODING", default_value = "utf-8")]
    encoding: LineEncoding,

    /// Only ping the connector, do not serve events
    #[arg(long)]
    ping_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.mode);

    let config = BridgeConfig {
        host: args.host,
        command_port: args.command_port,
        event_port: args.event_port,
        mode: args.mode,
        encoding: args.encoding,
    };

    info!("Connecting to connector at {}", config.command_addr());
    let client = QuikClient::connect(config.command_addr(), config.client_config())
        .await
        .context("Failed to connect to the command channel")?;

    let reply = client.ping().await.context("Ping failed")?;
    info!("Connector answered ping: {}", reply);

    if !args.ping_only {
        info!("Serving events on {}, Ctrl+C to stop", config.event_addr());
        quik_bridge::run_until_signal(config.event_addr(), config.server_config(), LoggingHandler)
            .await
            .context("Event server failed")?;
    }

    client.close().await.context("Failed to close the command session")?;
    Ok(())
}
