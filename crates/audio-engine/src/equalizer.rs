//! 10-band equalizer: the applier that decides what gets written, and the
//! peaking-filter element that runs inside the graph.

use std::f32::consts::PI;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const BAND_COUNT: usize = 10;

/// Hard limit for any gain written to the element, in dB.
pub const GAIN_LIMIT_DB: f32 = 12.0;

/// ISO octave centre frequencies (Hz).
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [
    31.5, 63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

const OCTAVE_Q: f32 = 1.41;

/// Band gain plus preamp, clamped to [-12, 12] dB. NaN collapses to 0.
pub fn effective_gain(band_db: f32, preamp_db: f32) -> f32 {
    let sum = band_db + preamp_db;
    if sum.is_nan() {
        return 0.0;
    }
    sum.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB)
}

pub fn effective_gains(preamp_db: f32, bands_db: &[f32; BAND_COUNT]) -> [f32; BAND_COUNT] {
    let mut out = [0.0; BAND_COUNT];
    for (slot, band) in out.iter_mut().zip(bands_db) {
        *slot = effective_gain(*band, preamp_db);
    }
    out
}

/// Caller-facing equalizer state. Survives across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct EqualizerSettings {
    pub preamp_db: f32,
    pub bands_db: [f32; BAND_COUNT],
    pub enabled: bool,
}

/// Decides which gains reach the element.
#[derive(Clone, Debug)]
pub struct EqualizerApplier {
    settings: EqualizerSettings,
}

impl EqualizerApplier {
    pub fn new(enabled: bool) -> Self {
        Self {
            settings: EqualizerSettings {
                preamp_db: 0.0,
                bands_db: [0.0; BAND_COUNT],
                enabled,
            },
        }
    }

    pub fn settings(&self) -> &EqualizerSettings {
        &self.settings
    }

    /// Store new settings and return the gains to write, if any.
    ///
    /// Without `force` a disabled equalizer writes nothing. With `force` a
    /// disabled equalizer writes a flat response so the element never keeps
    /// stale gains.
    pub fn apply(
        &mut self,
        preamp_db: f32,
        bands_db: [f32; BAND_COUNT],
        force: bool,
    ) -> Option<[f32; BAND_COUNT]> {
        self.settings.preamp_db = preamp_db;
        self.settings.bands_db = bands_db;
        self.current(force)
    }

    /// Gains for the stored settings; `force` as in [`Self::apply`].
    pub fn current(&self, force: bool) -> Option<[f32; BAND_COUNT]> {
        if self.settings.enabled {
            Some(effective_gains(self.settings.preamp_db, &self.settings.bands_db))
        } else if force {
            Some([0.0; BAND_COUNT])
        } else {
            None
        }
    }

    /// Toggle the equalizer; returns the gains the element must now carry.
    pub fn set_enabled(&mut self, enabled: bool) -> [f32; BAND_COUNT] {
        self.settings.enabled = enabled;
        self.current(true).unwrap_or([0.0; BAND_COUNT])
    }
}

/// Gains handed from the control thread to the tee stage.
#[derive(Debug, Default)]
pub struct SharedGains {
    gains: Mutex<[f32; BAND_COUNT]>,
    version: AtomicU64,
}

impl SharedGains {
    pub fn store(&self, gains: [f32; BAND_COUNT]) {
        if let Ok(mut g) = self.gains.lock() {
            *g = gains.map(|v| effective_gain(v, 0.0));
        }
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn load(&self) -> [f32; BAND_COUNT] {
        self.gains.lock().map(|g| *g).unwrap_or([0.0; BAND_COUNT])
    }
}

#[derive(Clone, Copy, Debug)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// RBJ peaking filter.
    fn peaking(frequency: f32, gain_db: f32, sample_rate: u32) -> Self {
        if sample_rate == 0 || gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }
        let sr = sample_rate as f32;
        let a = 10.0_f32.powf(gain_db / 40.0);
        let omega = 2.0 * PI * frequency.min(sr * 0.45) / sr;
        let alpha = omega.sin() / (2.0 * OCTAVE_Q);
        let cos = omega.cos();
        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// The graph's equalizer element: ten peaking filters per channel.
pub struct EqualizerBank {
    sample_rate: u32,
    channels: usize,
    coeffs: [Coefficients; BAND_COUNT],
    history: Vec<[History; BAND_COUNT]>,
    flat: bool,
}

impl EqualizerBank {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            coeffs: [Coefficients::IDENTITY; BAND_COUNT],
            history: vec![[History::default(); BAND_COUNT]; channels.max(1)],
            flat: true,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.flat
    }

    pub fn set_gains(&mut self, gains_db: [f32; BAND_COUNT]) {
        for (i, gain) in gains_db.iter().enumerate() {
            let gain = effective_gain(*gain, 0.0);
            self.coeffs[i] = Coefficients::peaking(BAND_FREQUENCIES[i], gain, self.sample_rate);
        }
        self.flat = gains_db.iter().all(|g| g.abs() < 0.01);
        if self.flat {
            self.history
                .iter_mut()
                .for_each(|h| *h = [History::default(); BAND_COUNT]);
        }
    }

    /// Filter interleaved samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        if self.flat {
            return;
        }
        let channels = self.channels;
        for (i, sample) in samples.iter_mut().enumerate() {
            let state = &mut self.history[i % channels];
            let mut x = *sample;
            for (c, h) in self.coeffs.iter().zip(state.iter_mut()) {
                let mut y = c.b0 * x + c.b1 * h.x1 + c.b2 * h.x2 - c.a1 * h.y1 - c.a2 * h.y2;
                if y.abs() < 1e-15 {
                    y = 0.0;
                }
                h.x2 = h.x1;
                h.x1 = x;
                h.y2 = h.y1;
                h.y1 = y;
                x = y;
            }
            *sample = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_gain_clamps_both_ways() {
        assert_eq!(effective_gain(10.0, 5.0), 12.0);
        assert_eq!(effective_gain(-10.0, -5.0), -12.0);
        assert_eq!(effective_gain(3.0, -1.0), 2.0);
        assert_eq!(effective_gain(f32::NAN, 0.0), 0.0);
        assert_eq!(effective_gain(f32::INFINITY, 0.0), 12.0);
    }

    #[test]
    fn effective_gains_stay_in_range_over_a_grid() {
        let mut preamp = -30.0;
        while preamp <= 30.0 {
            let mut bands = [0.0; BAND_COUNT];
            for (i, b) in bands.iter_mut().enumerate() {
                *b = -30.0 + i as f32 * 6.5;
            }
            for g in effective_gains(preamp, &bands) {
                assert!((-GAIN_LIMIT_DB..=GAIN_LIMIT_DB).contains(&g));
            }
            preamp += 2.5;
        }
    }

    #[test]
    fn disabled_apply_is_noop_unless_forced() {
        let mut eq = EqualizerApplier::new(false);
        assert!(eq.apply(3.0, [6.0; BAND_COUNT], false).is_none());
        assert_eq!(eq.apply(3.0, [6.0; BAND_COUNT], true), Some([0.0; BAND_COUNT]));
        assert_eq!(eq.settings().bands_db, [6.0; BAND_COUNT]);
    }

    #[test]
    fn enabled_apply_writes_clamped_gains() {
        let mut eq = EqualizerApplier::new(true);
        let gains = eq.apply(4.0, [10.0; BAND_COUNT], false).unwrap();
        assert_eq!(gains, [12.0; BAND_COUNT]);
    }

    #[test]
    fn enabling_restores_stored_settings() {
        let mut eq = EqualizerApplier::new(false);
        eq.apply(0.0, [2.0; BAND_COUNT], false);
        assert_eq!(eq.set_enabled(true), [2.0; BAND_COUNT]);
        assert_eq!(eq.set_enabled(false), [0.0; BAND_COUNT]);
    }

    #[test]
    fn flat_bank_is_bypass() {
        let mut bank = EqualizerBank::new(48_000, 2);
        let mut samples = vec![0.25, -0.25, 0.5, -0.5];
        bank.process(&mut samples);
        assert_eq!(samples, vec![0.25, -0.25, 0.5, -0.5]);
        assert!(bank.is_flat());
    }

    #[test]
    fn boosted_band_changes_signal_and_stays_finite() {
        let mut bank = EqualizerBank::new(48_000, 1);
        let mut gains = [0.0; BAND_COUNT];
        gains[5] = 12.0;
        bank.set_gains(gains);
        let mut samples: Vec<f32> = (0..4800)
            .map(|n| (2.0 * PI * 1000.0 * n as f32 / 48_000.0).sin() * 0.1)
            .collect();
        let input_peak = 0.1;
        bank.process(&mut samples);
        let peak = samples[2400..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(samples.iter().all(|s| s.is_finite()));
        assert!(peak > input_peak * 2.0);
    }

    #[test]
    fn shared_gains_bump_version_and_clamp() {
        let shared = SharedGains::default();
        let v0 = shared.version();
        shared.store([20.0; BAND_COUNT]);
        assert!(shared.version() > v0);
        assert_eq!(shared.load(), [12.0; BAND_COUNT]);
    }
}
