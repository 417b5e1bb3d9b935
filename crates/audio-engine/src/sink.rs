//! Output sink (CPAL output stream).
//!
//! The sink is opened once and outlives every session. Each session installs
//! its output queue and position probe into the sink's feed slot; the audio
//! callback:
//! - outputs silence while paused, without draining the queue
//! - refills a small local buffer from the feed without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::config::PlaybackConfig;
use crate::device;
use crate::error::{EngineError, Result};
use crate::pipeline::{PositionProbe, StreamFormat};
use crate::queue::{Pull, SharedQueue};

/// What the callback currently plays from.
struct Feed {
    generation: u64,
    queue: SharedQueue,
    probe: PositionProbe,
}

#[derive(Default)]
struct FeedSlot {
    generation: u64,
    feed: Option<Feed>,
}

/// A long-lived output stream on its own thread.
pub struct OutputSink {
    format: StreamFormat,
    slot: Arc<Mutex<FeedSlot>>,
    paused: Arc<AtomicBool>,
    _shutdown: Sender<()>,
}

impl OutputSink {
    /// Open `device` (substring match) or the default output device.
    pub fn open(device_name: Option<&str>, cfg: &PlaybackConfig) -> Result<Self> {
        let slot = Arc::new(Mutex::new(FeedSlot::default()));
        let paused = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<StreamFormat>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let device_name = device_name.map(str::to_string);
        let refill_max_frames = cfg.refill_max_frames.max(1);
        let thread_slot = slot.clone();
        let thread_paused = paused.clone();
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let opened = open_stream(
                    device_name.as_deref(),
                    refill_max_frames,
                    thread_slot,
                    thread_paused,
                );
                match opened {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        park_until_shutdown(&shutdown_rx);
                        drop(stream);
                        tracing::debug!("output stream closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| EngineError::Device(format!("spawn output thread: {e}")))?;

        let format = ready_rx
            .recv()
            .map_err(|_| EngineError::Device("output thread exited".to_string()))??;
        Ok(Self {
            format,
            slot,
            paused,
            _shutdown: shutdown_tx,
        })
    }

    /// Rate and channel count of the device stream.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Start playing from `queue`, advancing `probe` per frame played.
    pub fn install(&self, queue: SharedQueue, probe: PositionProbe) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.generation += 1;
            slot.feed = Some(Feed {
                generation: slot.generation,
                queue,
                probe,
            });
        }
    }

    /// Detach the current feed; the device plays silence.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.generation += 1;
            slot.feed = None;
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }
}

fn park_until_shutdown(rx: &Receiver<()>) {
    // Only a disconnect ends the wait: the sender lives in `OutputSink`.
    while rx.recv().is_ok() {}
}

fn open_stream(
    device_name: Option<&str>,
    refill_max_frames: usize,
    slot: Arc<Mutex<FeedSlot>>,
    paused: Arc<AtomicBool>,
) -> Result<(cpal::Stream, StreamFormat)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let target_rate = device.default_output_config().ok().map(|c| c.sample_rate());
    let supported = device::pick_output_config(&device, target_rate)?;
    let mut config: cpal::StreamConfig = supported.config();
    if let Some(size) = device::pick_buffer_size(&supported) {
        config.buffer_size = size;
    }
    let format = StreamFormat {
        sample_rate: config.sample_rate,
        channels: config.channels,
    };
    let stream = build_output_stream(
        &device,
        &config,
        supported.sample_format(),
        CallbackShared {
            slot,
            paused,
            refill_max_frames,
        },
    )?;
    stream
        .play()
        .map_err(|e| EngineError::Device(format!("start output stream: {e}")))?;
    tracing::info!(
        device = %device::device_name(&device),
        rate = format.sample_rate,
        channels = format.channels,
        sample_format = ?supported.sample_format(),
        "output sink opened"
    );
    Ok((stream, format))
}

struct CallbackShared {
    slot: Arc<Mutex<FeedSlot>>,
    paused: Arc<AtomicBool>,
    refill_max_frames: usize,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: CallbackShared,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(EngineError::Device(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: CallbackShared,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut local = LocalBuffer::default();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
                if shared.paused.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }
                let Ok(slot) = shared.slot.lock() else {
                    data.fill(silence);
                    return;
                };
                let Some(feed) = slot.feed.as_ref() else {
                    local.reset(0, 0);
                    data.fill(silence);
                    return;
                };
                if local.generation != feed.generation {
                    local.reset(feed.generation, feed.queue.channels());
                }
                let filled = fill_frames(
                    data,
                    channels_out,
                    &mut local,
                    feed,
                    shared.refill_max_frames,
                );
                for sample in &mut data[filled * channels_out..] {
                    *sample = silence;
                }
                if filled > 0 {
                    feed.probe.advance(filled as u64);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Device(format!("build output stream: {e}")))
}

fn fill_frames<T>(
    data: &mut [T],
    channels_out: usize,
    local: &mut LocalBuffer,
    feed: &Feed,
    refill_max_frames: usize,
) -> usize
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let frames = data.len() / channels_out;
    for frame in 0..frames {
        if local.pos >= local.src.len() {
            local.pos = 0;
            match feed.queue.pull(Pull::Available {
                max_frames: refill_max_frames,
            }) {
                Some(v) => local.src = v,
                None => {
                    local.src.clear();
                    return frame;
                }
            }
        }
        for ch in 0..channels_out {
            let sample = next_sample_mapped(local, channels_out, ch);
            data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
        }
    }
    frames
}

/// Samples fetched from the feed but not yet written to the device.
#[derive(Default)]
struct LocalBuffer {
    generation: u64,
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    fn reset(&mut self, generation: u64, src_channels: usize) {
        self.generation = generation;
        self.pos = 0;
        self.src_channels = src_channels.max(1);
        self.src.clear();
    }
}

/// Read one output sample for `dst_ch`, mapping source channels onto the device.
///
/// mono → stereo duplicates, stereo → mono averages, other layouts clamp to
/// the available channels. `pos` advances after the last destination channel.
fn next_sample_mapped(st: &mut LocalBuffer, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }
    let frame_start = st.pos;
    let get = |ch: usize, st: &LocalBuffer| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };
    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get(0, st) + get(1, st)),
        (1, _) => get(0, st),
        _ => get(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };
    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SampleQueue;

    fn buffer(src_channels: usize, src: Vec<f32>) -> LocalBuffer {
        LocalBuffer {
            generation: 1,
            pos: 0,
            src_channels,
            src,
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut st = buffer(1, vec![0.25, 0.5]);
        assert_eq!(next_sample_mapped(&mut st, 2, 0), 0.25);
        assert_eq!(next_sample_mapped(&mut st, 2, 1), 0.25);
        assert_eq!(next_sample_mapped(&mut st, 2, 0), 0.5);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut st = buffer(2, vec![1.0, 0.0, 0.5, 0.5]);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0.5);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0.5);
        assert_eq!(st.pos, 4);
    }

    #[test]
    fn surround_clamps_to_available_channels() {
        let mut st = buffer(2, vec![0.1, 0.2]);
        let frame: Vec<f32> = (0..6).map(|ch| next_sample_mapped(&mut st, 6, ch)).collect();
        assert_eq!(frame, vec![0.1, 0.2, 0.2, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn fill_counts_only_real_frames() {
        let queue = Arc::new(SampleQueue::new(2, 64));
        queue.push(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let probe = PositionProbe::new();
        let feed = Feed {
            generation: 1,
            queue,
            probe,
        };
        let mut local = LocalBuffer::default();
        local.reset(1, 2);
        let mut out = vec![0.0f32; 10];
        let filled = fill_frames(&mut out, 2, &mut local, &feed, 2);
        assert_eq!(filled, 3);
        assert_eq!(&out[..6], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }
}
