//! Convert stage.
//!
//! Resamples decoded audio from the source rate to the output sink's rate with
//! Rubato's streaming sinc resampler. When the rates already match the stage
//! forwards blocks untouched.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::{EngineError, Result};
use crate::queue::{Pull, SampleQueue};

/// Run the convert stage until `src` is closed and drained.
///
/// `dst` is always closed on return so downstream stages unwind.
pub fn run_converter(
    src: &SampleQueue,
    dst: &SampleQueue,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<()> {
    let result = if src_rate == dst_rate {
        forward(src, dst, chunk_frames.max(1));
        Ok(())
    } else {
        resample(src, dst, src_rate, dst_rate, chunk_frames.max(1))
    };
    dst.close();
    result
}

fn forward(src: &SampleQueue, dst: &SampleQueue, chunk_frames: usize) {
    while let Some(block) = src.pull(Pull::UpTo {
        max_frames: chunk_frames,
    }) {
        if !dst.push(&block) {
            return;
        }
    }
}

fn resample(
    src: &SampleQueue,
    dst: &SampleQueue,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<()> {
    let channels = src.channels();
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| EngineError::Decode(format!("resampler init: {e}")))?;

    tracing::debug!(src_rate, dst_rate, channels, "resampling");

    let out_frames = output_capacity_frames(chunk_frames, f_ratio);
    let mut out = vec![0.0f32; channels * out_frames];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    // Steady state: whole chunks.
    while let Some(block) = src.pull(Pull::Exact {
        frames: chunk_frames,
    }) {
        indexing.partial_len = None;
        let produced = process(
            &mut resampler,
            &block,
            chunk_frames,
            &mut out,
            out_frames,
            channels,
            &indexing,
        )?;
        if !dst.push(&out[..produced * channels]) {
            return Ok(());
        }
    }

    // Tail after close: partial chunks.
    while let Some(tail) = src.pull(Pull::UpTo {
        max_frames: chunk_frames,
    }) {
        let tail_frames = tail.len() / channels;
        if tail_frames == 0 {
            continue;
        }
        indexing.partial_len = Some(tail_frames);
        let produced = process(
            &mut resampler,
            &tail,
            tail_frames,
            &mut out,
            out_frames,
            channels,
            &indexing,
        )?;
        if produced > 0 && !dst.push(&out[..produced * channels]) {
            return Ok(());
        }
    }
    Ok(())
}

fn process(
    resampler: &mut Async<f32>,
    input: &[f32],
    input_frames: usize,
    out: &mut [f32],
    out_frames: usize,
    channels: usize,
    indexing: &Indexing,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, channels, input_frames)
        .map_err(|e| EngineError::Decode(format!("resampler input: {e}")))?;
    let mut output_adapter = InterleavedSlice::new_mut(out, channels, out_frames)
        .map_err(|e| EngineError::Decode(format!("resampler output: {e}")))?;
    let (_consumed, produced) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(indexing))
        .map_err(|e| EngineError::Decode(format!("resample: {e}")))?;
    Ok(produced)
}

/// Output frames needed for one input chunk, with headroom for the
/// resampler's ratio slack and filter delay.
fn output_capacity_frames(chunk_frames: usize, ratio: f64) -> usize {
    let scaled = (chunk_frames as f64 * ratio * 1.1).ceil() as usize;
    scaled.max(chunk_frames) + 256
}
