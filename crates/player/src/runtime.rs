//! Player runtime: device listing and the interactive playlist loop.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use audio_engine::{Engine, EngineConfig, Notification, device};
use crossbeam_channel::{Receiver, Sender};

use crate::cli::PlayArgs;
use crate::commands::{self, ConsoleCommand, HELP};
use crate::playlist::{Playlist, parse_equalizer};

/// Events feeding the runtime loop besides engine notifications.
enum Input {
    Command(ConsoleCommand),
    Interrupt,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("{name}");
    }
    Ok(())
}

/// Play every locator in order, taking console commands until the list ends.
pub fn run_play(config: EngineConfig, play: PlayArgs) -> Result<()> {
    let engine = Engine::new(config).context("start playback engine")?;
    if let Some(spec) = play.eq.as_deref() {
        let (preamp, bands) = parse_equalizer(spec).context("parse --eq")?;
        engine.set_equalizer_enabled(true);
        engine.set_equalizer(preamp, bands, true);
    }

    let (input_tx, input_rx) = crossbeam_channel::unbounded();
    let ctrlc_tx = input_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Input::Interrupt);
    })
    .context("install ctrl-c handler")?;
    spawn_console(input_tx)?;
    eprintln!("{HELP}");

    let mut playlist = Playlist::from_args(&play);
    let mut record = play.record.clone();
    if start_next(&engine, &mut playlist, &mut record) {
        drive(&engine, &mut playlist, &mut record, &input_rx, play.json)?;
    }
    engine.shutdown();
    Ok(())
}

fn drive(
    engine: &Engine,
    playlist: &mut Playlist,
    record: &mut Option<PathBuf>,
    input_rx: &Receiver<Input>,
    json: bool,
) -> Result<()> {
    let notifications = engine.notifications();
    loop {
        crossbeam_channel::select! {
            recv(notifications.receiver()) -> msg => {
                let Ok(notification) = msg else {
                    return Ok(());
                };
                if !notifications.is_stale(&notification) {
                    report(&notification, json)?;
                    let finished = matches!(
                        notification,
                        Notification::EndOfTrack | Notification::Error { .. }
                    );
                    if finished && !start_next(engine, playlist, record) {
                        return Ok(());
                    }
                }
            }
            recv(input_rx) -> msg => {
                match msg {
                    Ok(Input::Command(cmd)) => {
                        if apply(engine, playlist, record, cmd)? == Flow::Quit {
                            return Ok(());
                        }
                    }
                    Ok(Input::Interrupt) | Err(_) => {
                        tracing::info!("interrupted");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Play the next playlist entry; `false` when the list is exhausted.
fn start_next(
    engine: &Engine,
    playlist: &mut Playlist,
    record: &mut Option<PathBuf>,
) -> bool {
    let Some(track) = playlist.next_track() else {
        tracing::info!("playlist finished");
        return false;
    };
    let session = engine.play(track.clone());
    tracing::info!(
        session,
        track = %track.label(),
        remaining = playlist.remaining(),
        "now playing"
    );
    if let Some(path) = record.take() {
        engine.attach_recorder(path);
    }
    true
}

fn apply(
    engine: &Engine,
    playlist: &mut Playlist,
    record: &mut Option<PathBuf>,
    cmd: ConsoleCommand,
) -> Result<Flow> {
    match cmd {
        ConsoleCommand::Pause => engine.pause(),
        ConsoleCommand::Resume => engine.resume(),
        ConsoleCommand::Stop => engine.stop(true),
        ConsoleCommand::Seek(percent) => engine.seek(percent, 0.0),
        ConsoleCommand::Volume(percent) => engine.set_volume(percent),
        ConsoleCommand::Record(path) => engine.attach_recorder(path),
        ConsoleCommand::StopRecording => engine.detach_recorder(),
        ConsoleCommand::Next => {
            if !start_next(engine, playlist, record) {
                return Ok(Flow::Quit);
            }
        }
        ConsoleCommand::Status => println!("{}", serde_json::to_string(&engine.status())?),
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn report(notification: &Notification, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(notification)?);
        return Ok(());
    }
    match notification {
        Notification::Progress {
            position_secs,
            duration_secs,
            ..
        } => println!(
            "{} / {}",
            format_clock(*position_secs),
            format_clock(*duration_secs)
        ),
        Notification::TitleChanged { text } => println!("title: {text}"),
        Notification::DurationKnown { duration_secs } => {
            println!("duration: {}", format_clock(*duration_secs))
        }
        Notification::StateChanged { state } => println!("state: {state:?}"),
        Notification::EndOfTrack => println!("end of track"),
        Notification::Error { message } => eprintln!("error: {message}"),
        Notification::RecordingError { message } => eprintln!("recording error: {message}"),
        Notification::RecordingFinished { path } => println!("recording saved to {path}"),
    }
    Ok(())
}

fn spawn_console(tx: Sender<Input>) -> Result<()> {
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(cmd)) => {
                        if tx.send(Input::Command(cmd)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e:#}"),
                }
            }
            tracing::debug!("console input closed");
        })
        .context("spawn console thread")?;
    Ok(())
}

/// `m:ss`, or `h:mm:ss` past the hour.
fn format_clock(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats_minutes_and_hours() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(65.9), "1:05");
        assert_eq!(format_clock(3723.0), "1:02:03");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }
}
