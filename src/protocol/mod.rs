//! Wire envelopes of the terminal's line protocol.
//!
//! Every message is one JSON object followed by `\n`.
//!
//! ```text
//! host -> terminal   {"cmd":"ping","data":"Ping"}
//! terminal -> host   {"success":true,"message":"Ping"}
//! terminal -> host   {"cmd":"OnTrade","t":1718000000000,"data":{...}}   (event channel)
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Default port of the connector's command channel.
pub const DEFAULT_COMMAND_PORT: u16 = 34130;

/// Default port the connector pushes events to.
pub const DEFAULT_EVENT_PORT: u16 = 34131;

/// Outbound command envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "cmd")]
    pub name: String,
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Clears the envelope while keeping the name buffer's allocation.
    pub fn reset(&mut self) {
        self.name.clear();
        self.payload = None;
    }
}

/// Reply to a command.
///
/// Command-specific fields (`candles`, `accounts`, ...) are kept verbatim in
/// `fields` and extracted on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandResult {
    /// Converts `success=false` into [`Error::Protocol`].
    pub fn into_checked(self, command: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::Protocol {
                command: command.to_string(),
                message: self.message,
            })
        }
    }

    /// Deserializes a command-specific field. Absent or `null` fields yield `None`.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(Error::MalformedPayload),
        }
    }

    /// Removes a command-specific field and deserializes it.
    pub fn take_field<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        match self.fields.remove(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(Error::MalformedPayload),
        }
    }
}

/// Unsolicited event pushed by the terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Empty when the connector omitted `cmd`; such events are still delivered.
    #[serde(rename = "cmd", default)]
    pub name: String,
    #[serde(rename = "t", default)]
    pub timestamp: i64,
    #[serde(rename = "data", default)]
    pub payload: Value,
}
