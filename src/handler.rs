//! Event callbacks.

use log::{info, warn};

use crate::protocol::Event;

/// Receives every event decoded by the event server.
///
/// Runs on tokio's blocking pool, one event at a time per connection and in
/// arrival order. Blocking is fine: a slow handler delays further events from
/// the same connection only.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn handle(&self, event: Event) {
        self(event)
    }
}

/// Logs connector lifecycle and trade events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: Event) {
        match event.name.as_str() {
            "OnConnected" => info!("Terminal connected: {}", event.payload),
            "OnDisconnected" => info!("Terminal disconnected: {}", event.payload),
            "OnTrade" => info!("New trade at {}: {}", event.timestamp, event.payload),
            other => warn!("Unhandled event {}: {}", other, event.payload),
        }
    }
}
