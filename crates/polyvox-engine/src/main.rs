//! # Polyvox
//!
//! Host for the polyvox sound manager.
//!
//! Loads `polyvox.toml` (or the path given as the first argument), opens the
//! output device, plays the configured cues and drives the manager tick loop
//! for the configured session length. Without a usable output device the
//! session runs in silent mode against the simulated device.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;
mod config;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EngineConfig;

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("polyvox=info".parse()?)
                .add_directive("polyvox_kernel=info".parse()?),
        )
        .init();

    info!("Polyvox starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match std::env::args_os().nth(1) {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    config.validate();

    let summary = app::run(&config)?;
    info!(
        "Session done: {} ticks, {} cues played, {} rejected, {} loop restarts, {} finished",
        summary.ticks, summary.played, summary.rejected, summary.restarted, summary.finished
    );

    info!("Polyvox shutdown complete");
    Ok(())
}
