//! The CLI's playlist: the engine plays one track, the driver picks the next.

use anyhow::{Result, bail};
use audio_engine::source::Locator;
use audio_engine::{BAND_COUNT, TrackDescriptor};

use crate::cli::PlayArgs;

#[derive(Debug)]
pub struct Playlist {
    tracks: Vec<TrackDescriptor>,
    next: usize,
}

impl Playlist {
    pub fn new(tracks: Vec<TrackDescriptor>) -> Self {
        Self { tracks, next: 0 }
    }

    pub fn from_args(args: &PlayArgs) -> Self {
        Self::new(
            args.locators
                .iter()
                .map(|locator| descriptor(locator, args))
                .collect(),
        )
    }

    pub fn next_track(&mut self) -> Option<TrackDescriptor> {
        let track = self.tracks.get(self.next).cloned()?;
        self.next += 1;
        Some(track)
    }

    pub fn remaining(&self) -> usize {
        self.tracks.len().saturating_sub(self.next)
    }
}

fn descriptor(locator: &str, args: &PlayArgs) -> TrackDescriptor {
    let is_network = Locator::parse(locator).is_ok_and(|l| l.is_network());
    let mut track = if args.radio && is_network {
        TrackDescriptor::radio(locator)
    } else {
        TrackDescriptor::new(locator)
    };
    if args.start_offset > 0.0 {
        track = track.with_start_offset(args.start_offset);
    }
    if let Some(duration) = args.duration {
        track = track.with_duration(duration);
    }
    track
}

/// Parse `"preamp,b1,..,b10"` (dB).
pub fn parse_equalizer(spec: &str) -> Result<(f32, [f32; BAND_COUNT])> {
    let values = spec
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let Some((preamp, bands)) = values.split_first() else {
        bail!("equalizer needs a preamp and {BAND_COUNT} bands");
    };
    let Ok(bands) = <[f32; BAND_COUNT]>::try_from(bands) else {
        bail!(
            "equalizer needs {BAND_COUNT} bands after the preamp, got {}",
            bands.len()
        );
    };
    Ok((*preamp, bands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_engine::TrackKind;

    fn args(locators: &[&str], radio: bool) -> PlayArgs {
        PlayArgs {
            locators: locators.iter().map(|s| s.to_string()).collect(),
            radio,
            start_offset: 0.0,
            duration: None,
            record: None,
            eq: None,
            json: false,
        }
    }

    #[test]
    fn radio_flag_only_applies_to_network_locators() {
        let mut list = Playlist::from_args(&args(
            &["http://radio.example/s", "/music/a.flac", "HTTPS://cdn.example/live"],
            true,
        ));
        assert_eq!(list.next_track().unwrap().kind, TrackKind::Radio);
        assert_eq!(list.next_track().unwrap().kind, TrackKind::Normal);
        assert_eq!(list.next_track().unwrap().kind, TrackKind::Radio);
        assert!(list.next_track().is_none());
    }

    #[test]
    fn offsets_and_durations_are_applied() {
        let mut a = args(&["/music/album.flac"], false);
        a.start_offset = 120.0;
        a.duration = Some(60.0);
        let track = Playlist::from_args(&a).next_track().unwrap();
        assert_eq!(track.start_offset_secs, 120.0);
        assert_eq!(track.duration_secs, Some(60.0));
    }

    #[test]
    fn remaining_counts_down() {
        let mut list = Playlist::from_args(&args(&["a", "b"], false));
        assert_eq!(list.remaining(), 2);
        list.next_track();
        assert_eq!(list.remaining(), 1);
    }

    #[test]
    fn equalizer_spec_needs_eleven_values() {
        let (preamp, bands) = parse_equalizer("-3, 1,2,3,4,5,6,7,8,9,10").unwrap();
        assert_eq!(preamp, -3.0);
        assert_eq!(bands[9], 10.0);
        assert!(parse_equalizer("1,2,3").is_err());
        assert!(parse_equalizer("a,b").is_err());
    }
}
