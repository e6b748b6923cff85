//! Headphone Player - local audio playback with a live waveform visualizer.
//!
//! The core is the [`player`] module: a playback state machine that drives an
//! audio engine, polls its position and turns raw waveform captures into
//! fixed-resolution frames. The CLI in [`cli`] is a thin shell around it.

pub mod cli;
pub mod config;
pub mod cover;
pub mod error;
pub mod liked;
pub mod metadata;
pub mod model;
pub mod player;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr; stdout carries the visualizer line
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("headphone_player=info".parse()?))
        .init();

    cli::run_command(&args)
}
