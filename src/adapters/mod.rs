//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements | Connects to                  |
//! |----------------|------------|------------------------------|
//! | `log_sink`     | EventSink  | `log` facade                 |
//! | `memory_store` | Store      | In-process collections       |
//! | `time`         | Clock      | Host system clock (`chrono`) |

pub mod log_sink;
pub mod memory_store;
pub mod time;
