//! Karplus-Strong building blocks: the feedback delay line, the
//! fractional-delay all-pass, the half-sample loop filter, the pluck
//! position comb, and the shaped-noise exciter. The [`Resonator`] ties
//! the first three into the classic plucked-string loop.

use crate::dsp::functions::MIDI_NOTE_0_FREQ;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Integer-delay circular buffer sized for the lowest supported pitch.
#[derive(Debug, Clone, Default)]
pub struct DelayLine {
    buffer: Vec<f64>,
    wrap_mask: usize,
    write_index: usize,
    delay_samples: usize,
}

impl DelayLine {
    /// Allocate for the longest delay a fundamental can demand.
    pub fn reset(&mut self, sample_rate: f64, min_frequency_hz: f64) {
        let max_delay = (sample_rate / min_frequency_hz).ceil() as usize + 2;
        let length = max_delay.next_power_of_two();
        self.buffer = vec![0.0; length];
        self.wrap_mask = length - 1;
        self.write_index = 0;
        self.delay_samples = 0;
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }

    pub fn set_delay_in_samples(&mut self, delay_samples: usize) {
        self.delay_samples = delay_samples.min(self.wrap_mask);
    }

    #[inline]
    pub fn read_delay(&self) -> f64 {
        let read_index = (self.write_index + self.buffer.len() - self.delay_samples)
            & self.wrap_mask;
        self.buffer[read_index]
    }

    /// Read at an arbitrary integer delay without changing the setting.
    #[inline]
    pub fn read_delay_at(&self, delay_samples: usize) -> f64 {
        let clamped = delay_samples.min(self.wrap_mask);
        let read_index = (self.write_index + self.buffer.len() - clamped) & self.wrap_mask;
        self.buffer[read_index]
    }

    #[inline]
    pub fn write_delay(&mut self, input: f64) {
        self.buffer[self.write_index] = input;
        self.write_index = (self.write_index + 1) & self.wrap_mask;
    }
}

/// First-order all-pass tuned for a fractional-sample delay; preserves
/// magnitude, so the resonator loop gain is set by `decay` alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FracDelayApf {
    alpha: f64,
    state: f64,
}

impl FracDelayApf {
    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    #[inline]
    pub fn process(&mut self, xn: f64) -> f64 {
        let yn = self.alpha * xn + self.state;
        self.state = xn - self.alpha * yn;
        yn
    }
}

/// Half-sample averager: 0.5*x[n] + 0.5*x[n-1]; supplies the loop's
/// gentle high-frequency damping.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopFilter {
    z1: f64,
}

impl LoopFilter {
    pub fn reset(&mut self) {
        self.z1 = 0.0;
    }

    #[inline]
    pub fn process(&mut self, xn: f64) -> f64 {
        let yn = 0.5 * xn + 0.5 * self.z1;
        self.z1 = xn;
        yn
    }
}

/// Comb variants for the pluck-position filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluckFilterType {
    Pluck,
    PluckAndBridge,
    PluckAndPickup,
    PluckPickupBridge,
}

/// Pluck-position comb plus the bridge integrator and pickup lowpass
/// used by the string models.
#[derive(Debug, Clone, Default)]
pub struct PluckPosFilter {
    comb: DelayLine,
    comb_delay: f64,
    bridge_z1: f64,
    pickup: crate::dsp::filter::BiquadCore,
}

impl PluckPosFilter {
    pub fn reset(&mut self, sample_rate: f64) {
        self.comb.reset(sample_rate, MIDI_NOTE_0_FREQ);
        self.bridge_z1 = 0.0;
        self.pickup.reset(sample_rate);
        // electric-guitar style pickup resonance
        self.pickup
            .set_coefficients(2500.0, 1.5, crate::params::FilterType::Lpf2);
    }

    pub fn clear(&mut self) {
        self.comb.clear();
        self.bridge_z1 = 0.0;
    }

    pub fn set_delay_in_samples(&mut self, delay_samples: f64) {
        self.comb_delay = delay_samples.max(1.0);
        self.comb.set_delay_in_samples(self.comb_delay as usize);
    }

    #[inline]
    fn bridge_integrate(&mut self, xn: f64) -> f64 {
        // leaky integrator, unity DC gain
        self.bridge_z1 = 0.99 * self.bridge_z1 + 0.01 * xn;
        self.bridge_z1
    }

    pub fn process(&mut self, xn: f64, filter_type: PluckFilterType) -> f64 {
        // comb: direct minus the position-delayed copy
        let delayed = self.comb.read_delay();
        self.comb.write_delay(xn);
        let comb_out = 0.5 * xn - 0.5 * delayed;

        match filter_type {
            PluckFilterType::Pluck => comb_out,
            PluckFilterType::PluckAndBridge => self.bridge_integrate(comb_out),
            PluckFilterType::PluckAndPickup => self.pickup.process(comb_out),
            PluckFilterType::PluckPickupBridge => {
                let picked = self.pickup.process(comb_out);
                self.bridge_integrate(picked)
            }
        }
    }
}

/// Noise burst with an attack-hold-release contour; started at note-on.
pub struct Exciter {
    sample_rate: f64,
    rng: SmallRng,
    state: ExciterState,
    level: f64,
    attack_inc: f64,
    release_inc: f64,
    hold_samples_remaining: u64,
    hold_samples_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExciterState {
    #[default]
    Done,
    Attack,
    Hold,
    Release,
}

impl Default for Exciter {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            rng: SmallRng::from_entropy(),
            state: ExciterState::Done,
            level: 0.0,
            attack_inc: 0.0,
            release_inc: 0.0,
            hold_samples_remaining: 0,
            hold_samples_total: 0,
        }
    }
}

impl Exciter {
    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.state = ExciterState::Done;
        self.level = 0.0;
    }

    pub fn set_parameters(&mut self, attack_msec: f64, hold_msec: f64, release_msec: f64) {
        let to_samples = |msec: f64| (msec * self.sample_rate / 1000.0).max(0.0);
        self.attack_inc = if attack_msec <= 0.0 {
            1.0
        } else {
            1.0 / to_samples(attack_msec)
        };
        self.release_inc = if release_msec <= 0.0 {
            1.0
        } else {
            1.0 / to_samples(release_msec)
        };
        self.hold_samples_total = to_samples(hold_msec) as u64;
    }

    pub fn start_exciter(&mut self) {
        self.state = ExciterState::Attack;
        self.level = 0.0;
        self.hold_samples_remaining = self.hold_samples_total;
    }

    pub fn is_done(&self) -> bool {
        self.state == ExciterState::Done
    }

    /// One sample of enveloped noise.
    pub fn render(&mut self) -> f64 {
        match self.state {
            ExciterState::Done => return 0.0,
            ExciterState::Attack => {
                self.level += self.attack_inc;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.state = if self.hold_samples_remaining > 0 {
                        ExciterState::Hold
                    } else {
                        ExciterState::Release
                    };
                }
            }
            ExciterState::Hold => {
                if self.hold_samples_remaining > 0 {
                    self.hold_samples_remaining -= 1;
                } else {
                    self.state = ExciterState::Release;
                }
            }
            ExciterState::Release => {
                self.level -= self.release_inc;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.state = ExciterState::Done;
                }
            }
        }
        self.rng.gen_range(-1.0..1.0) * self.level
    }
}

/// The string: one delay line, the half-sample loop filter, and the
/// fractional-delay all-pass. `decay < 1` keeps the loop BIBO-stable.
#[derive(Debug, Clone, Default)]
pub struct Resonator {
    sample_rate: f64,
    delay_line: DelayLine,
    loop_filter: LoopFilter,
    frac_delay_apf: FracDelayApf,
    decay: f64,
}

impl Resonator {
    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.delay_line.reset(sample_rate, MIDI_NOTE_0_FREQ);
        self.loop_filter.reset();
        self.frac_delay_apf.reset();
    }

    pub fn flush_delays(&mut self) {
        self.delay_line.clear();
        self.loop_filter.reset();
        self.frac_delay_apf.reset();
    }

    /// Tune the loop; returns the total delay time in samples.
    pub fn set_parameters(&mut self, frequency: f64, decay: f64) -> f64 {
        self.decay = decay;

        let delay_time = self.sample_rate / frequency;
        // loop filter contributes a half sample, the APF the fraction
        let delay_length = delay_time - 0.5;
        let int_delay_len = delay_length as usize;
        let apf_delta = delay_time - (int_delay_len as f64 + 0.5);

        let omega_0_half = PI * frequency / self.sample_rate;
        let alpha = ((1.0 - apf_delta) * omega_0_half).sin()
            / ((1.0 + apf_delta) * omega_0_half).sin();

        self.delay_line
            .set_delay_in_samples(int_delay_len.saturating_sub(1));
        self.frac_delay_apf.set_alpha(alpha);

        delay_time
    }

    #[inline]
    pub fn process(&mut self, xn: f64) -> f64 {
        let delay_out = self.delay_line.read_delay();
        let filter_out = self.loop_filter.process(xn + delay_out);
        let yn = self.frac_delay_apf.process(filter_out);
        self.delay_line.write_delay(yn * self.decay);
        yn
    }
}
