//! Port runtime core for a device-control server.
//!
//! Maintains a set of addressable ports (sensor/actuator endpoints) whose
//! values come from hardware drivers, direct writes, timed sequences or
//! user-defined expressions over other ports, and propagates changes
//! through the expression graph.
//!
//! Start from [`app::service::Core`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod expr;
pub mod history;
pub mod peripheral;
pub mod port;
pub mod scheduler;

pub use app::commands::{CommandReply, CoreCommand};
pub use app::service::Core;
pub use config::CoreConfig;
pub use error::{Error, ErrorCategory, Result};
pub use port::{PortSpec, PortType};
