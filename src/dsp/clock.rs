//! Phase-accumulator timebase shared by every oscillator core, plus the
//! hard-sync helper that resets a slave clock against a master.

use crate::dsp::functions::const_power_xfade;

/// Samples over which a hard-sync reset is crossfaded to hide the
/// discontinuity of the phase jump.
pub const HARD_SYNC_XFADE_SAMPLES: u32 = 8;

/// Modulo-1 phase accumulator: `mcounter` advances by `phase_inc = f0/fs`
/// each sample and wraps in [0, 1).
///
/// Phase modulation uses the add/remove offset pair so the nominal phase
/// is unperturbed between samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthClock {
    pub mcounter: f64,
    pub phase_inc: f64,
    pub frequency_hz: f64,
    pub sample_rate: f64,
    phase_offset: f64,
}

impl SynthClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the clock at a phase in [0, 1).
    pub fn reset(&mut self, start_phase: f64) {
        self.mcounter = start_phase.rem_euclid(1.0);
        self.phase_offset = 0.0;
    }

    pub fn set_frequency(&mut self, frequency_hz: f64, sample_rate: f64) {
        self.frequency_hz = frequency_hz;
        self.sample_rate = sample_rate;
        self.phase_inc = frequency_hz / sample_rate;
    }

    /// Advance one sample without wrapping.
    #[inline]
    pub fn advance_clock(&mut self) {
        self.mcounter += self.phase_inc;
    }

    /// Wrap the counter into [0, 1); returns true if a wrap occurred.
    #[inline]
    pub fn wrap_clock(&mut self) -> bool {
        if self.mcounter >= 1.0 {
            self.mcounter -= 1.0;
            // negative increments exist with negative frequency modulation
            if self.mcounter >= 1.0 {
                self.mcounter = self.mcounter.rem_euclid(1.0);
            }
            return true;
        }
        if self.mcounter < 0.0 {
            self.mcounter = self.mcounter.rem_euclid(1.0);
            return true;
        }
        false
    }

    /// Advance one sample and wrap; returns true on wrap.
    #[inline]
    pub fn advance_wrap_clock(&mut self) -> bool {
        self.advance_clock();
        self.wrap_clock()
    }

    /// Phase modulation: offset is applied now and removed with
    /// [`SynthClock::remove_phase_offset`] after the table read.
    #[inline]
    pub fn add_phase_offset(&mut self, offset: f64) {
        self.phase_offset = offset;
        self.mcounter = (self.mcounter + offset).rem_euclid(1.0);
    }

    #[inline]
    pub fn remove_phase_offset(&mut self) {
        self.mcounter = (self.mcounter - self.phase_offset).rem_euclid(1.0);
        self.phase_offset = 0.0;
    }
}

/// Short equal-power crossfader used by the hard-sync helper.
#[derive(Debug, Clone, Copy, Default)]
struct XFader {
    total_samples: u32,
    counter: u32,
    running: bool,
}

impl XFader {
    fn start(&mut self, total_samples: u32) {
        self.total_samples = total_samples.max(1);
        self.counter = 0;
        self.running = true;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    /// Blend a (fading out) into b (fading in); advances one sample.
    fn crossfade(&mut self, a: f64, b: f64) -> f64 {
        if !self.running {
            return b;
        }
        let frac = self.counter as f64 / self.total_samples as f64;
        let (gain_a, gain_b) = const_power_xfade(frac);
        self.counter += 1;
        if self.counter >= self.total_samples {
            self.running = false;
        }
        a * gain_a + b * gain_b
    }
}

/// Hard-sync helper: owns the slave clock running at `ratio * f0` and a
/// crossfade clock that lets the interrupted cycle finish while the reset
/// cycle fades in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronizer {
    hard_sync_clock: SynthClock,
    cross_fade_clock: SynthClock,
    fader: XFader,
    sample_rate: f64,
}

impl Synchronizer {
    pub fn reset(&mut self, sample_rate: f64, start_phase: f64) {
        self.sample_rate = sample_rate;
        self.hard_sync_clock.reset(start_phase);
        self.cross_fade_clock.reset(start_phase);
        self.fader = XFader::default();
    }

    pub fn set_hard_sync_frequency(&mut self, frequency_hz: f64) {
        self.hard_sync_clock
            .set_frequency(frequency_hz, self.sample_rate);
        self.cross_fade_clock
            .set_frequency(frequency_hz, self.sample_rate);
    }

    /// The master clock wrapped: restart the slave at zero phase and begin
    /// fading out the interrupted cycle.
    pub fn start_hard_sync(&mut self) {
        self.cross_fade_clock = self.hard_sync_clock;
        self.hard_sync_clock.reset(0.0);
        self.fader.start(HARD_SYNC_XFADE_SAMPLES);
    }

    pub fn is_processing(&self) -> bool {
        self.fader.is_running()
    }

    pub fn hard_sync_clock(&mut self) -> &mut SynthClock {
        &mut self.hard_sync_clock
    }

    pub fn cross_fade_clock(&mut self) -> &mut SynthClock {
        &mut self.cross_fade_clock
    }

    pub fn do_hard_sync_xfade(&mut self, fading_out: f64, fading_in: f64) -> f64 {
        self.fader.crossfade(fading_out, fading_in)
    }

    pub fn add_phase_offset(&mut self, offset: f64) {
        self.hard_sync_clock.add_phase_offset(offset);
        self.cross_fade_clock.add_phase_offset(offset);
    }

    pub fn remove_phase_offset(&mut self) {
        self.hard_sync_clock.remove_phase_offset();
        self.cross_fade_clock.remove_phase_offset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_phase_stays_in_range() {
        let mut clock = SynthClock::new();
        clock.set_frequency(441.0, 44100.0);
        for _ in 0..100_000 {
            clock.advance_wrap_clock();
            assert!(clock.mcounter >= 0.0 && clock.mcounter < 1.0);
        }
    }

    #[test]
    fn test_wrap_count_matches_frequency() {
        // over N samples the clock must wrap floor(N * f/fs) times (+/- 1)
        let mut clock = SynthClock::new();
        let (f, fs, n) = (440.0, 48000.0, 48000);
        clock.set_frequency(f, fs);
        let mut wraps: i64 = 0;
        for _ in 0..n {
            if clock.advance_wrap_clock() {
                wraps += 1;
            }
        }
        let expected = (n as f64 * f / fs).floor() as i64;
        assert!((wraps - expected).abs() <= 1, "wraps={wraps} expected={expected}");
    }

    #[test]
    fn test_phase_offset_round_trip() {
        let mut clock = SynthClock::new();
        clock.set_frequency(100.0, 48000.0);
        clock.reset(0.25);
        clock.add_phase_offset(0.1);
        assert_relative_eq!(clock.mcounter, 0.35, epsilon = 1e-12);
        clock.remove_phase_offset();
        assert_relative_eq!(clock.mcounter, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_hard_sync_crossfade_completes() {
        let mut sync = Synchronizer::default();
        sync.reset(48000.0, 0.0);
        sync.set_hard_sync_frequency(880.0);
        sync.start_hard_sync();
        assert!(sync.is_processing());
        for _ in 0..HARD_SYNC_XFADE_SAMPLES {
            sync.do_hard_sync_xfade(1.0, 0.0);
        }
        assert!(!sync.is_processing());
        // slave restarted at zero phase
        assert!(sync.hard_sync_clock().mcounter < 880.0 / 48000.0 * 2.0);
    }
}
