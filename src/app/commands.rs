//! Inbound commands to the port core.
//!
//! These represent requests from the outside world (HTTP API, scripts,
//! the stdin console of the host binary) that [`Core`](super::service::Core)
//! interprets and acts upon.  Commands are plain data and deserialize from
//! JSON tagged by `op`:
//!
//! ```json
//! {"op": "patch_port_value", "id": "relay1", "value": 1}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::history::Sample;
use crate::port::PortSpec;

use super::ports::Record;
use super::service::Core;

/// Commands that external adapters can send into the core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CoreCommand {
    /// Attributes and values of all ports.
    GetPorts,

    /// Cached value of one port.
    GetPortValue { id: String },

    /// Write one value.
    PatchPortValue { id: String, value: f64 },

    /// Play a timed sequence of values.
    PatchPortSequence {
        id: String,
        values: Vec<f64>,
        delays: Vec<u64>,
        #[serde(default)]
        repeat: u32,
    },

    /// Change one or more attributes.
    PatchPort { id: String, attrs: Record },

    /// Create a virtual port.
    AddVirtualPort(PortSpec),

    /// Remove a virtual port.
    RemovePort { id: String },

    /// Recorded samples in `[from, to)`, timestamps in milliseconds.
    GetPortHistory {
        id: String,
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Delete recorded samples in `[from, to)`.
    RemovePortHistory {
        id: String,
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
    },
}

/// Successful command outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Done,
    Ports(Vec<Value>),
    Value(Option<f64>),
    History(Vec<Sample>),
    Removed(usize),
}

impl Core {
    /// Execute one command.
    pub async fn handle_command(&self, cmd: CoreCommand) -> Result<CommandReply> {
        match cmd {
            CoreCommand::GetPorts => Ok(CommandReply::Ports(self.get_ports())),
            CoreCommand::GetPortValue { id } => self.get_port_value(&id).map(CommandReply::Value),
            CoreCommand::PatchPortValue { id, value } => {
                self.patch_port_value(&id, value).await?;
                Ok(CommandReply::Done)
            }
            CoreCommand::PatchPortSequence {
                id,
                values,
                delays,
                repeat,
            } => {
                self.patch_port_sequence(&id, values, delays, repeat).await?;
                Ok(CommandReply::Done)
            }
            CoreCommand::PatchPort { id, attrs } => {
                self.patch_port(&id, &attrs).await?;
                Ok(CommandReply::Done)
            }
            CoreCommand::AddVirtualPort(spec) => {
                self.add_virtual_port(spec)?;
                Ok(CommandReply::Done)
            }
            CoreCommand::RemovePort { id } => {
                self.remove_port(&id)?;
                Ok(CommandReply::Done)
            }
            CoreCommand::GetPortHistory {
                id,
                from,
                to,
                limit,
            } => self
                .get_port_history(&id, from, to, limit)
                .map(CommandReply::History),
            CoreCommand::RemovePortHistory { id, from, to } => self
                .remove_port_history(&id, from, to)
                .map(CommandReply::Removed),
        }
    }
}
