//! The real processing graph.
//!
//! ```text
//! source ─▶ decode ─▶ convert ─▶ tee ─┬─▶ volume ─▶ equalizer ─▶ output sink
//!                                     └─▶ (recorder pad, optional)
//! ```
//!
//! Everything from the source to the tee stage belongs to one linked source
//! ([`StageSet`]) and is torn down on every track switch or seek. The tee, the
//! element controls, the position probe and the output sink live as long as
//! the graph.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use audio_engine_types::TrackDescriptor;

use super::stage::{StageControls, StageSet, run_tee_stage};
use super::{Pipeline, PositionProbe, StreamFormat};
use crate::bus::{Bus, BusMessage, StreamFault};
use crate::config::EngineConfig;
use crate::convert::run_converter;
use crate::decode::{DecodeEnd, ProbedSource};
use crate::equalizer::{BAND_COUNT, EqualizerBank};
use crate::error::{EngineError, Result};
use crate::net::{FaultSlot, NetworkConfig, NetworkSource};
use crate::queue::{SampleQueue, capacity_for};
use crate::sink::OutputSink;
use crate::source::{self, Locator};
use crate::tee::Tee;

struct Linked {
    track: TrackDescriptor,
    bus: Bus,
    stages: Arc<StageSet>,
}

/// Symphonia → Rubato → tee → CPAL graph.
pub struct AudioGraph {
    config: EngineConfig,
    sink: Option<Arc<OutputSink>>,
    tee: Arc<Tee>,
    probe: PositionProbe,
    controls: Arc<StageControls>,
    linked: Option<Linked>,
    running: bool,
}

impl AudioGraph {
    /// The output device is opened on the first build.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sink: None,
            tee: Arc::new(Tee::new()),
            probe: PositionProbe::new(),
            controls: Arc::new(StageControls::default()),
            linked: None,
            running: false,
        }
    }

    fn ensure_sink(&mut self) -> Result<Arc<OutputSink>> {
        if let Some(sink) = &self.sink {
            return Ok(sink.clone());
        }
        let sink = Arc::new(OutputSink::open(
            self.config.device.as_deref(),
            &self.config.playback,
        )?);
        sink.set_paused(!self.running);
        self.sink = Some(sink.clone());
        Ok(sink)
    }

    fn unlink(&mut self) {
        if let Some(linked) = self.linked.take() {
            linked.stages.unlink();
            tracing::debug!(
                session = linked.bus.session(),
                locator = %linked.track.locator,
                "source unlinked"
            );
        }
        if let Some(sink) = &self.sink {
            sink.clear();
        }
        self.tee.set_format(None);
        self.probe.clear();
    }

    fn link(&mut self, track: &TrackDescriptor, start_at_secs: f64, bus: Bus) -> Result<()> {
        let locator = Locator::parse(&track.locator)?;
        let sink = self.ensure_sink()?;
        let hint = locator.hint();
        let stages = StageSet::new();
        let ctx = LinkContext {
            stages: stages.clone(),
            sink,
            tee: self.tee.clone(),
            probe: self.probe.clone(),
            controls: self.controls.clone(),
            bus: bus.clone(),
            chunk_frames: self.config.playback.chunk_frames,
            buffer_seconds: self.config.playback.buffer_seconds,
        };

        match locator {
            Locator::Local(path) => {
                let file = source::open_local(&path)?;
                let probed = ProbedSource::probe(Box::new(file), &hint)
                    .map_err(|e| EngineError::source_construction(&track.locator, e.to_string()))?;
                stages.spawn("decode", move || ctx.run(probed, start_at_secs, None));
            }
            Locator::Network(url) => {
                let net = NetworkConfig {
                    read_ahead_bytes: self.config.network_buffer_bytes,
                    timeout: self.config.http_timeout(),
                };
                let cancel = stages.cancel_flag();
                stages.spawn("decode", move || {
                    let source = match NetworkSource::open(&url, net, ctx.bus.clone(), cancel) {
                        Ok(s) => s,
                        Err(fault) => return ctx.fail(fault),
                    };
                    let fault = source.fault_slot();
                    match ProbedSource::probe(Box::new(source), &hint) {
                        Ok(probed) => ctx.run(probed, start_at_secs, Some(fault)),
                        Err(e) => ctx.fail(StreamFault::Transient(e.to_string())),
                    }
                });
            }
        }

        tracing::info!(
            session = bus.session(),
            locator = %track.locator,
            start_at_secs,
            "source linked"
        );
        self.linked = Some(Linked {
            track: track.clone(),
            bus,
            stages,
        });
        Ok(())
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.unlink();
    }
}

impl Pipeline for AudioGraph {
    fn build(&mut self, track: &TrackDescriptor, start_at_secs: f64, bus: Bus) -> Result<()> {
        self.unlink();
        self.link(track, start_at_secs.max(0.0), bus)
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
        if let Some(sink) = &self.sink {
            sink.set_paused(!running);
        }
    }

    fn seek(&mut self, position_secs: f64) -> Result<()> {
        let Some(linked) = self.linked.as_ref() else {
            return Ok(());
        };
        if linked.track.is_radio() {
            tracing::warn!(locator = %linked.track.locator, "seek ignored on radio stream");
            return Ok(());
        }
        let track = linked.track.clone();
        let bus = linked.bus.clone();
        self.unlink();
        self.link(&track, position_secs.max(0.0), bus)
    }

    fn teardown(&mut self) {
        self.unlink();
    }

    fn set_volume(&mut self, gain: f32) {
        self.controls.set_volume(gain);
    }

    fn set_equalizer(&mut self, gains_db: [f32; BAND_COUNT]) {
        self.controls.gains.store(gains_db);
    }

    fn probe(&self) -> PositionProbe {
        self.probe.clone()
    }

    fn tee(&self) -> Arc<Tee> {
        self.tee.clone()
    }
}

/// Everything the decode thread needs to wire the rest of the stages.
struct LinkContext {
    stages: Arc<StageSet>,
    sink: Arc<OutputSink>,
    tee: Arc<Tee>,
    probe: PositionProbe,
    controls: Arc<StageControls>,
    bus: Bus,
    chunk_frames: usize,
    buffer_seconds: f32,
}

impl LinkContext {
    fn fail(&self, fault: StreamFault) {
        if self.stages.is_cancelled() {
            return;
        }
        tracing::warn!(session = self.bus.session(), fault = ?fault, "stream failed");
        self.stages.abort();
        self.bus.error(fault);
    }

    /// Wire convert and tee stages behind `probed`, then decode on this thread.
    fn run(self, mut probed: ProbedSource, start_at_secs: f64, fault: Option<FaultSlot>) {
        let resumed_at = probed.seek_to(start_at_secs);
        let info = probed.info().clone();
        if let Some(duration) = info.duration_secs {
            self.probe.set_duration(Some(duration));
            self.bus.post(BusMessage::DurationKnown(duration));
        }
        if let Some(title) = info.title.clone() {
            self.bus.post(BusMessage::Tag { title });
        }

        let out = StreamFormat {
            sample_rate: self.sink.format().sample_rate,
            channels: info.channels as u16,
        };
        let channels = info.channels;
        let queue_for = |rate| {
            SampleQueue::new(channels, capacity_for(rate, channels, self.buffer_seconds))
        };
        let (Some(decoded), Some(converted), Some(output)) = (
            self.stages.queue(queue_for(info.sample_rate)),
            self.stages.queue(queue_for(out.sample_rate)),
            self.stages.queue(queue_for(out.sample_rate)),
        ) else {
            return;
        };

        tracing::info!(
            session = self.bus.session(),
            src_rate = info.sample_rate,
            dst_rate = out.sample_rate,
            channels,
            codec = ?info.codec,
            duration_secs = ?info.duration_secs,
            resumed_at,
            "decode started"
        );

        let convert_in = decoded.clone();
        let convert_out = converted.clone();
        let convert_bus = self.bus.clone();
        let convert_stages = self.stages.clone();
        let (src_rate, chunk) = (info.sample_rate, self.chunk_frames);
        self.stages.spawn("convert", move || {
            if let Err(e) = run_converter(&convert_in, &convert_out, src_rate, out.sample_rate, chunk)
            {
                if !convert_stages.is_cancelled() {
                    convert_stages.abort();
                    convert_bus.error(StreamFault::Transient(e.to_string()));
                }
            }
        });

        let tee = self.tee.clone();
        let controls = self.controls.clone();
        let bus = self.bus.clone();
        let cancel = self.stages.cancel_flag();
        let stage_output = output.clone();
        self.stages.spawn("tee-stage", move || {
            let eq = EqualizerBank::new(out.sample_rate, channels);
            run_tee_stage(
                &converted,
                &stage_output,
                &tee,
                &controls,
                eq,
                chunk,
                &cancel,
                &bus,
            );
        });

        self.stages.while_linked(|| {
            self.tee.set_format(Some(out));
            self.probe.reset(resumed_at, out.sample_rate);
            self.sink.install(output, self.probe.clone());
        });

        let cancel: Arc<AtomicBool> = self.stages.cancel_flag();
        match probed.run(&decoded, &cancel) {
            _ if self.stages.is_cancelled() => {}
            Ok(DecodeEnd::Finished) => {
                let fault = fault.and_then(|slot| slot.lock().ok().and_then(|mut f| f.take()));
                match fault {
                    Some(fault) => self.fail(fault),
                    None => decoded.close(),
                }
            }
            Ok(DecodeEnd::Cancelled) => decoded.close(),
            Err(e) => self.fail(StreamFault::Transient(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_bus;

    #[test]
    fn bad_locator_fails_before_the_device_is_opened() {
        let mut graph = AudioGraph::new(EngineConfig {
            device: Some("no such output device".to_string()),
            ..EngineConfig::default()
        });
        for locator in ["http://", "rtsp://camera/feed"] {
            let (bus, _rx) = test_bus(1);
            let err = graph
                .build(&TrackDescriptor::new(locator), 0.0, bus)
                .unwrap_err();
            assert!(
                matches!(err, EngineError::SourceConstruction { .. }),
                "{locator}: {err}"
            );
        }
        assert!(graph.sink.is_none());
        assert!(graph.linked.is_none());
    }
}
