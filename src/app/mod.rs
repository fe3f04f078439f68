//! Application core: port logic behind trait boundaries.
//!
//! This module contains the runtime rules for ports: value writes,
//! sequences, attribute patches, expression propagation and history.
//! All interaction with hardware, storage and subscribers happens through
//! the **port traits** defined in [`ports`], keeping this layer testable
//! with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
mod tick;
