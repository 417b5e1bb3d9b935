//! Interactive commands read from stdin while a playlist runs.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Pause,
    Resume,
    Stop,
    /// Seek to a percentage of the track.
    Seek(f64),
    Volume(f32),
    Record(PathBuf),
    StopRecording,
    Next,
    Status,
    Quit,
}

pub const HELP: &str =
    "commands: pause | resume | stop | seek <pct> | vol <pct> | rec <path> | unrec | next | status | quit";

/// Parse one input line; blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "pause" | "p" => ConsoleCommand::Pause,
        "resume" | "r" => ConsoleCommand::Resume,
        "stop" => ConsoleCommand::Stop,
        "seek" => ConsoleCommand::Seek(
            rest.parse()
                .with_context(|| format!("seek expects a percentage, got {rest:?}"))?,
        ),
        "vol" | "volume" => ConsoleCommand::Volume(
            rest.parse()
                .with_context(|| format!("vol expects a percentage, got {rest:?}"))?,
        ),
        "rec" => {
            if rest.is_empty() {
                bail!("rec expects a destination path");
            }
            ConsoleCommand::Record(PathBuf::from(rest))
        }
        "unrec" => ConsoleCommand::StopRecording,
        "next" | "n" => ConsoleCommand::Next,
        "status" => ConsoleCommand::Status,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command {other:?}; {HELP}"),
    };
    Ok(Some(cmd))
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    })
}
