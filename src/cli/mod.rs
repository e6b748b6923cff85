//! Command-line interface for headphone-player.
//!
//! Lists the library, plays a file with a text waveform, and manages liked
//! songs.

mod commands;

pub use commands::{Cli, Commands, run_command};
