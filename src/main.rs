//! PortCore host binary.
//!
//! Runs the port core against host adapters and a simulated peripheral,
//! with a JSON command console on stdin.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SystemClock     LogEventSink     MemoryStore     sim drivers  │
//! │  (Clock)         (EventSink)      (Store)         (PortDriver) │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                 Core (port runtime)                    │    │
//! │  │  ports · expressions · sequences · peripherals         │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  stdin thread ──▶ CONSOLE channel ──▶ Core::handle_command     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `portcore [config.json]`, then one command per line, e.g.
//! `{"op": "patch_port_value", "id": "sim.relay", "value": 1}`.
#![deny(unused_must_use)]

use std::io::BufRead;
use std::time::Instant;

use anyhow::{Context, Result};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};
use serde_json::json;

use portcore::adapters::log_sink::LogEventSink;
use portcore::adapters::memory_store::MemoryStore;
use portcore::adapters::time::SystemClock;
use portcore::app::ports::PortDriver;
use portcore::{Core, CoreCommand, CoreConfig, Error, PortSpec};

/// Commands from the stdin thread; `None` marks end of input.
static CONSOLE: Channel<CriticalSectionRawMutex, Option<CoreCommand>, 8> = Channel::new();

// ── Simulated peripheral ──────────────────────────────────────

/// Whole seconds since start.
struct Uptime(Instant);

impl PortDriver for Uptime {
    fn read_value(&mut self) -> portcore::Result<Option<f64>> {
        Ok(Some(self.0.elapsed().as_secs() as f64))
    }

    fn write_value(&mut self, _value: f64) -> portcore::Result<()> {
        Err(Error::ReadOnlyPort)
    }
}

/// Holds whatever was last written.
struct Latch(f64);

impl PortDriver for Latch {
    fn read_value(&mut self) -> portcore::Result<Option<f64>> {
        Ok(Some(self.0))
    }

    fn write_value(&mut self, value: f64) -> portcore::Result<()> {
        self.0 = value;
        Ok(())
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("PortCore v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text =
                std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?
        }
        None => CoreConfig::default(),
    };

    let core = Core::new(
        config.clone(),
        Box::new(SystemClock::new(config.real_time_epoch_secs)),
        Box::new(MemoryStore::new()),
        Box::new(LogEventSink::new()),
    )?;

    core.add_peripheral(
        "sim",
        vec![
            (
                PortSpec::number("sim.uptime").read_only(),
                Box::new(Uptime(Instant::now())) as Box<dyn PortDriver>,
            ),
            (PortSpec::boolean("sim.relay"), Box::new(Latch(0.0))),
        ],
    )?;

    std::thread::Builder::new()
        .name("console".into())
        .spawn(read_console)
        .context("spawning console thread")?;

    info!("System ready. Entering event loop.");
    core.block_on(futures_lite::future::or(core.run(), serve_console(&core)));
    core.block_on(core.shutdown());
    Ok(())
}

fn read_console() {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CoreCommand>(&line) {
            Ok(cmd) => futures_lite::future::block_on(CONSOLE.send(Some(cmd))),
            Err(e) => println!("{}", json!({ "error": "bad-request", "message": e.to_string() })),
        }
    }
    futures_lite::future::block_on(CONSOLE.send(None));
}

async fn serve_console(core: &Core) {
    while let Some(cmd) = CONSOLE.receive().await {
        let reply = match core.handle_command(cmd).await {
            Ok(reply) => json!({ "ok": reply }),
            Err(e) => {
                warn!("Console: command failed: {}", e);
                json!({ "error": e.code(), "message": e.to_string() })
            }
        };
        println!("{reply}");
    }
    info!("Console: end of input, stopping");
    core.stop();
}
