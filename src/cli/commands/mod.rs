//! CLI command definitions and dispatch.
//!
//! - `library`: listing tracks and managing liked songs
//! - `play`: playback with a live text visualizer
//! - `init-config`: writing the config file

mod library;
mod play;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use crate::config::{self, Config, ConfigError};
use crate::error::Result;

pub use library::{cmd_like, cmd_liked, cmd_list};
pub use play::cmd_play;

/// Headphone Player CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "HEADPHONE_PLAYER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// List tracks in a folder or in the configured library
    List {
        /// Folder to list (default: library paths from the config)
        path: Option<PathBuf>,
    },
    /// Play an audio file
    Play {
        /// Path to the audio file
        path: PathBuf,
        /// Start position in seconds
        #[arg(long, default_value = "0")]
        start: u64,
    },
    /// Like or unlike a track by id (as printed by `list`)
    Like { id: i64 },
    /// Show liked tracks
    Liked,
    /// Write the current settings to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the parsed command to completion.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    match &cli.command {
        Commands::List { path } => cmd_list(&rt, &config, path.as_deref())?,
        Commands::Play { path, start } => cmd_play(&rt, &config, path, *start)?,
        Commands::Like { id } => cmd_like(&rt, &config, *id)?,
        Commands::Liked => cmd_liked(&rt, &config)?,
        Commands::InitConfig { force } => {
            cmd_init_config(&config, cli.config.as_deref(), *force)?
        }
    }
    Ok(())
}

/// Write `config` to `path`, or to the default location.
pub fn cmd_init_config(config: &Config, path: Option<&Path>, force: bool) -> Result<()> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_path().ok_or(ConfigError::NoConfigDir)?,
    };
    if target.exists() && !force {
        println!("{} already exists (use --force to overwrite)", target.display());
        return Ok(());
    }

    match path {
        Some(path) => config::save_to(config, path)?,
        None => config::save(config)?,
    }
    println!("Wrote {}", target.display());
    Ok(())
}

/// Library roots for a command: an explicit folder wins over the config.
pub(crate) fn library_roots(config: &Config, path: Option<&Path>) -> Vec<PathBuf> {
    match path {
        Some(path) => vec![path.to_path_buf()],
        None => config.library.paths.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_config_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        cmd_init_config(&Config::default(), Some(&path), false).unwrap();
        assert_eq!(config::load_from(&path), Config::default());

        let mut changed = Config::default();
        changed.playback.poll_interval_ms = 250;
        cmd_init_config(&changed, Some(&path), false).unwrap();
        assert_eq!(config::load_from(&path).playback.poll_interval_ms, 1000);

        cmd_init_config(&changed, Some(&path), true).unwrap();
        assert_eq!(config::load_from(&path), changed);
    }

    #[test]
    fn test_library_roots_prefers_explicit_path() {
        let mut config = Config::default();
        config.library.paths = vec![PathBuf::from("/music")];

        assert_eq!(library_roots(&config, None), vec![PathBuf::from("/music")]);
        assert_eq!(
            library_roots(&config, Some(Path::new("/elsewhere"))),
            vec![PathBuf::from("/elsewhere")]
        );
    }
}
