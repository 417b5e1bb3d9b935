//! `player` — a small command-line front end for the playback engine.
//!
//! Plays local files and HTTP streams in order, with an interactive console:
//! pause/resume/seek/volume, recording to WAV and skipping to the next track.
//! Engine settings come from an optional TOML file plus flags.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use player::cli::{Args, Command};
use player::{config, runtime};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_engine=info,player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let engine_config = config::resolve(&args)?;
    match args.cmd {
        Some(Command::Play(play)) => runtime::run_play(engine_config, play),
        None => {
            tracing::warn!("nothing to do; pass `play <locator>` or --list-devices");
            Ok(())
        }
    }
}
