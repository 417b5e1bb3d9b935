//! Decode stage.
//!
//! Uses Symphonia to probe the container, optionally seek, and decode packets
//! into interleaved `f32` pushed onto a [`SampleQueue`]. Probing is separated
//! from the decode loop so local files can be rejected before a graph is
//! linked.

use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{EngineError, Result};
use crate::queue::SampleQueue;

/// What the probe learned about the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Physical duration, when the container knows it.
    pub duration_secs: Option<f64>,
    /// Title tag, when present.
    pub title: Option<String>,
    pub codec: Option<String>,
}

/// How the decode loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeEnd {
    /// The container ran out of packets.
    Finished,
    /// Cancelled, or the downstream queue was closed.
    Cancelled,
}

/// A probed container ready to decode.
pub struct ProbedSource {
    format: Box<dyn FormatReader>,
    codec_params: CodecParameters,
    track_id: u32,
    info: SourceInfo,
    skip_until_ts: u64,
}

impl ProbedSource {
    /// Probe `source` using `hint` as the container guess.
    pub fn probe(source: Box<dyn MediaSource>, hint: &Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(
                hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::Decode(format!("probe: {e}")))?;

        let mut title = probed
            .metadata
            .get()
            .and_then(|m| m.current().and_then(title_from_revision));
        let mut format = probed.format;
        if title.is_none() {
            title = format
                .metadata()
                .current()
                .and_then(title_from_revision);
        }

        let track = format
            .default_track()
            .ok_or_else(|| EngineError::Decode("no default audio track".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let channels = codec_params
            .channels
            .ok_or_else(|| EngineError::Decode("unknown channel layout".to_string()))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .filter(|r| *r > 0)
            .ok_or_else(|| EngineError::Decode("unknown sample rate".to_string()))?;

        let info = SourceInfo {
            sample_rate,
            channels,
            duration_secs: duration_secs_from_codec_params(&codec_params),
            title,
            codec: codec_name_from_params(&codec_params),
        };
        Ok(Self {
            format,
            track_id,
            codec_params,
            info,
            skip_until_ts: 0,
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Seek to `secs` into the resource. Returns the position decoding resumes at.
    ///
    /// A failed seek leaves the reader where it was and returns 0.
    pub fn seek_to(&mut self, secs: f64) -> f64 {
        if !secs.is_finite() || secs <= 0.0 {
            return 0.0;
        }
        let time = Time::new(secs.trunc() as u64, secs.fract());
        match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                self.skip_until_ts = seeked.required_ts;
                secs
            }
            Err(e) => {
                tracing::warn!(secs, "seek failed, decoding from start: {e}");
                0.0
            }
        }
    }

    /// Decode until the container ends, `cancel` is raised, or `out` closes.
    pub fn run(mut self, out: &SampleQueue, cancel: &AtomicBool) -> Result<DecodeEnd> {
        let mut decoder = symphonia::default::get_codecs()
            .make(&self.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(format!("codec: {e}")))?;
        let channels = self.info.channels;
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(DecodeEnd::Cancelled);
            }
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(DecodeEnd::Finished);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(DecodeEnd::Finished),
                Err(e) => return Err(EngineError::Decode(format!("read packet: {e}"))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            if self.skip_until_ts > 0
                && packet.ts().saturating_add(packet.dur()) <= self.skip_until_ts
            {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(DecodeEnd::Finished);
                }
                Err(e) => return Err(EngineError::Decode(format!("decode: {e}"))),
            };
            if decoded.spec().channels.count() != channels {
                tracing::warn!(
                    expected = channels,
                    got = decoded.spec().channels.count(),
                    "channel layout changed mid-stream; dropping packet"
                );
                continue;
            }

            let needed = decoded.capacity() * channels;
            if sample_buf.as_ref().is_none_or(|b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::<f32>::new(
                    decoded.capacity() as u64,
                    *decoded.spec(),
                ));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            if !out.push(buf.samples()) {
                return Ok(DecodeEnd::Cancelled);
            }
        }
    }
}

fn title_from_revision(rev: &MetadataRevision) -> Option<String> {
    rev.tags()
        .iter()
        .find(|t| matches!(t.std_key, Some(StandardTagKey::TrackTitle)))
        .map(|t| t.value.to_string())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Best-effort duration in seconds from codec metadata.
fn duration_secs_from_codec_params(codec_params: &CodecParameters) -> Option<f64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate?;
    if rate == 0 || frames == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::queue::Pull;
    use std::io::Cursor;
    use symphonia::core::codecs::*;

    /// A small 16-bit PCM WAV held in memory.
    pub(crate) fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * channels as usize {
                w.write_sample(((i % 100) as i16) * 100).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn wav_hint() -> Hint {
        let mut hint = Hint::new();
        hint.with_extension("wav");
        hint
    }

    #[test]
    fn probe_reports_format_and_duration() {
        let bytes = wav_bytes(8_000, 2, 16_000);
        let probed = ProbedSource::probe(Box::new(Cursor::new(bytes)), &wav_hint()).unwrap();
        let info = probed.info();
        assert_eq!(info.sample_rate, 8_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.duration_secs, Some(2.0));
        assert_eq!(info.codec.as_deref(), Some("PCM_S16"));
    }

    #[test]
    fn probe_rejects_garbage() {
        let err = ProbedSource::probe(Box::new(Cursor::new(vec![7u8; 512])), &Hint::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn decodes_every_frame_then_finishes() {
        let bytes = wav_bytes(8_000, 1, 4_000);
        let probed = ProbedSource::probe(Box::new(Cursor::new(bytes)), &wav_hint()).unwrap();
        let queue = SampleQueue::new(1, 16_000);
        let end = probed.run(&queue, &AtomicBool::new(false)).unwrap();
        assert_eq!(end, DecodeEnd::Finished);
        assert_eq!(queue.len_frames(), 4_000);
    }

    #[test]
    fn seek_skips_leading_audio() {
        let bytes = wav_bytes(8_000, 1, 16_000);
        let mut probed = ProbedSource::probe(Box::new(Cursor::new(bytes)), &wav_hint()).unwrap();
        assert_eq!(probed.seek_to(1.5), 1.5);
        let queue = SampleQueue::new(1, 32_000);
        probed.run(&queue, &AtomicBool::new(false)).unwrap();
        let frames = queue.len_frames();
        assert!(frames <= 4_000 + 1_152, "decoded {frames} frames after seek");
        assert!(frames >= 3_000);
    }

    #[test]
    fn closed_queue_cancels_decode() {
        let bytes = wav_bytes(8_000, 1, 8_000);
        let probed = ProbedSource::probe(Box::new(Cursor::new(bytes)), &wav_hint()).unwrap();
        let queue = SampleQueue::new(1, 64);
        queue.close();
        let end = probed.run(&queue, &AtomicBool::new(false)).unwrap();
        assert_eq!(end, DecodeEnd::Cancelled);
        assert!(queue.pull(Pull::Available { max_frames: 8 }).is_none());
    }

    #[test]
    fn duration_needs_frames_and_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_secs_from_codec_params(&params).is_none());
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_secs_from_codec_params(&params), Some(2.0));
    }

    #[test]
    fn codec_names() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params).as_deref(), Some("FLAC"));
        params.codec = CODEC_TYPE_NULL;
        assert!(codec_name_from_params(&params).is_none());
    }
}
