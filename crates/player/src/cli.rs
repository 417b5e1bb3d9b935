use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "player", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML file with engine settings; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Read-ahead buffer for network streams, in bytes
    #[arg(long)]
    pub buffer_bytes: Option<usize>,

    /// Consecutive stream errors tolerated before a track is abandoned
    #[arg(long)]
    pub retry_threshold: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one or more locators (paths, file:// or http(s):// URLs) in order
    Play(PlayArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlayArgs {
    /// Tracks to play, in order
    #[arg(required = true)]
    pub locators: Vec<String>,

    /// Treat network locators as endless radio streams (reconnect when idle)
    #[arg(long)]
    pub radio: bool,

    /// Start offset into each resource, in seconds (cue-style sub-track)
    #[arg(long, default_value_t = 0.0)]
    pub start_offset: f64,

    /// Logical duration of each track, in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Record the first track to this WAV file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Equalizer as "preamp,b1,..,b10" in dB; enables the equalizer
    #[arg(long, allow_hyphen_values = true)]
    pub eq: Option<String>,

    /// Print notifications as JSON lines on stdout
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_options() {
        let args = Args::try_parse_from([
            "player",
            "--retry-threshold",
            "3",
            "play",
            "--radio",
            "--eq",
            "-2,1,1,1,1,1,1,1,1,1,1",
            "http://radio.example/stream",
        ])
        .unwrap();
        assert_eq!(args.retry_threshold, Some(3));
        let Some(Command::Play(play)) = args.cmd else {
            panic!("expected play");
        };
        assert!(play.radio);
        assert_eq!(play.locators, vec!["http://radio.example/stream"]);
        assert_eq!(play.eq.as_deref(), Some("-2,1,1,1,1,1,1,1,1,1,1"));
    }

    #[test]
    fn play_requires_a_locator() {
        assert!(Args::try_parse_from(["player", "play"]).is_err());
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["player", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
