//! Recorder branch.
//!
//! A parallel tee branch that encodes everything the playback branch hears
//! into a WAV file. The branch writes to a temp file that only appears once the
//! first block arrives; detaching finalizes it and moves it to the caller's
//! destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;

use crate::error::{EngineError, Result};
use crate::pipeline::StreamFormat;
use crate::tee::{Block, PadId, Tee};

/// Blocks buffered between the tee and the encoder.
const PAD_CAPACITY: usize = 256;

struct Branch {
    tee: Arc<Tee>,
    pad: PadId,
    final_path: PathBuf,
    temp_path: PathBuf,
    encoder: JoinHandle<Result<u64>>,
}

/// Owns at most one recorder branch.
pub struct RecorderManager {
    temp_dir: PathBuf,
    branch: Option<Branch>,
}

impl RecorderManager {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            branch: None,
        }
    }

    #[cfg(test)]
    fn is_attached(&self) -> bool {
        self.branch.is_some()
    }

    /// Final destination of the attached branch.
    pub fn destination(&self) -> Option<&Path> {
        self.branch.as_ref().map(|b| b.final_path.as_path())
    }

    /// Request a tee pad and start encoding into a temp file.
    ///
    /// A second attach is refused; the running branch is left alone.
    pub fn attach(&mut self, tee: Arc<Tee>, output: PathBuf) -> Result<()> {
        if let Some(existing) = &self.branch {
            return Err(EngineError::recording(format!(
                "recorder already attached to {}",
                existing.final_path.display()
            )));
        }
        let temp_path = make_temp_path(&self.temp_dir, "recording");
        let (pad, rx) = tee.request_pad(PAD_CAPACITY);
        let encoder_tee = tee.clone();
        let encoder_path = temp_path.clone();
        let spawned = std::thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || encode_loop(rx, &encoder_tee, &encoder_path));
        let encoder = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tee.release_pad(pad);
                return Err(EngineError::recording(format!("spawn encoder: {e}")));
            }
        };
        tracing::info!(
            output = %output.display(),
            temp = %temp_path.display(),
            "recorder attached"
        );
        self.branch = Some(Branch {
            tee,
            pad,
            final_path: output,
            temp_path,
            encoder,
        });
        Ok(())
    }

    /// Stop the branch, release its pad and move the recording into place.
    ///
    /// Returns `None` when nothing was attached.
    pub fn detach(&mut self) -> Option<Result<PathBuf>> {
        let branch = self.branch.take()?;
        branch.tee.release_pad(branch.pad);
        let encoded = match branch.encoder.join() {
            Ok(result) => result,
            Err(_) => Err(EngineError::recording("encoder thread panicked")),
        };
        Some(encoded.and_then(|frames| {
            finalize(&branch.temp_path, &branch.final_path)?;
            tracing::info!(
                output = %branch.final_path.display(),
                frames,
                "recording finalized"
            );
            Ok(branch.final_path)
        }))
    }
}

/// Encode blocks until the pad is released. Returns frames written.
fn encode_loop(rx: Receiver<Block>, tee: &Tee, temp_path: &Path) -> Result<u64> {
    let mut writer: Option<hound::WavWriter<io::BufWriter<fs::File>>> = None;
    let mut channels = 1u64;
    let mut samples_written = 0u64;
    while let Ok(block) = rx.recv() {
        if writer.is_none() {
            let Some(format) = tee.format() else {
                continue;
            };
            channels = u64::from(format.channels.max(1));
            writer = Some(create_writer(temp_path, format)?);
        }
        if let Some(w) = writer.as_mut() {
            for sample in block.iter() {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                w.write_sample(v)
                    .map_err(|e| EngineError::recording(format!("write sample: {e}")))?;
            }
            samples_written += block.len() as u64;
        }
    }
    if let Some(w) = writer {
        w.finalize()
            .map_err(|e| EngineError::recording(format!("finalize wav: {e}")))?;
    }
    Ok(samples_written / channels)
}

fn create_writer(
    path: &Path,
    format: StreamFormat,
) -> Result<hound::WavWriter<io::BufWriter<fs::File>>> {
    let spec = hound::WavSpec {
        channels: format.channels.max(1),
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    hound::WavWriter::create(path, spec)
        .map_err(|e| EngineError::recording(format!("create {}: {e}", path.display())))
}

/// Move the temp file to `dest`, copying when a rename crosses filesystems.
fn finalize(temp: &Path, dest: &Path) -> Result<()> {
    if !temp.exists() {
        return Err(EngineError::recording(format!(
            "temporary recording {} does not exist",
            temp.display()
        )));
    }
    if fs::rename(temp, dest).is_ok() {
        return Ok(());
    }
    fs::copy(temp, dest)
        .map_err(|e| EngineError::recording(format!("move to {}: {e}", dest.display())))?;
    if let Err(e) = fs::remove_file(temp) {
        tracing::warn!(temp = %temp.display(), "temp recording cleanup failed: {e}");
    }
    Ok(())
}

fn make_temp_path(dir: &Path, prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.join(format!("{prefix}-{nanos}.wav.part"))
}
