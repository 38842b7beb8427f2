//! Per-voice filters: a second-order state-variable core (TPT topology)
//! and a biquad core, both with EG and bipolar cutoff modulation and
//! optional key tracking.

use crate::audio::buffer::AudioBuffer;
use crate::dsp::functions::db_to_raw;
use crate::dsp::modulation::{ModArray, BIPOLAR_MOD, EG_MOD};
use crate::midi::MidiNoteEvent;
use crate::params::{FilterCoreKind, FilterParams, FilterType};
use std::f64::consts::PI;

pub const FILTER_FC_MIN: f64 = 20.0;
pub const FILTER_FC_MAX: f64 = 20480.0;
/// Cutoff modulation range, in semitones either side of the dialed fc.
pub const FILTER_FC_MOD_RANGE_SEMITONES: f64 = 60.0;

/// TPT (Zavalishin) state-variable filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvfCore {
    sample_rate: f64,
    s1: f64,
    s2: f64,
    /// One-pole integrator state for the first-order responses.
    sp: f64,
    g: f64,
    two_r: f64,
    d: f64,
}

impl SvfCore {
    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.s1 = 0.0;
        self.s2 = 0.0;
        self.sp = 0.0;
    }

    pub fn set_coefficients(&mut self, fc: f64, q: f64) {
        self.g = (PI * fc / self.sample_rate).tan();
        self.two_r = 1.0 / q.max(0.25);
        self.d = 1.0 / (1.0 + self.two_r * self.g + self.g * self.g);
    }

    #[inline]
    pub fn process(&mut self, xn: f64, filter_type: FilterType) -> f64 {
        match filter_type {
            FilterType::Lpf1 | FilterType::Hpf1 => {
                let v = (xn - self.sp) * self.g / (1.0 + self.g);
                let lp = v + self.sp;
                self.sp = lp + v;
                if filter_type == FilterType::Lpf1 {
                    lp
                } else {
                    xn - lp
                }
            }
            _ => {
                let hp = (xn - (self.two_r + self.g) * self.s1 - self.s2) * self.d;
                let bp = self.g * hp + self.s1;
                let lp = self.g * bp + self.s2;
                self.s1 = self.g * hp + bp;
                self.s2 = self.g * bp + lp;

                match filter_type {
                    FilterType::Lpf2 => lp,
                    FilterType::Hpf2 => hp,
                    FilterType::Bpf2 => self.two_r * bp,
                    _ => hp + lp,
                }
            }
        }
    }
}

/// RBJ cookbook biquad, transposed direct form II.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCore {
    sample_rate: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl BiquadCore {
    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn set_coefficients(&mut self, fc: f64, q: f64, filter_type: FilterType) {
        let omega = 2.0 * PI * fc / self.sample_rate;
        let sin_w = omega.sin();
        let cos_w = omega.cos();
        let alpha = sin_w / (2.0 * q.max(0.1));

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Lpf2 => {
                let b1 = 1.0 - cos_w;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
            }
            FilterType::Hpf2 => {
                let b1 = -(1.0 + cos_w);
                (-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
            }
            FilterType::Bpf2 => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha),
            FilterType::Bsf2 => (1.0, -2.0 * cos_w, 1.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha),
            FilterType::Lpf1 => {
                // one-pole via bilinear transform
                let g = (PI * fc / self.sample_rate).tan();
                let a = g / (1.0 + g);
                (a, a, 0.0, 1.0, (g - 1.0) / (1.0 + g), 0.0)
            }
            FilterType::Hpf1 => {
                let g = (PI * fc / self.sample_rate).tan();
                let a = 1.0 / (1.0 + g);
                (a, -a, 0.0, 1.0, (g - 1.0) / (1.0 + g), 0.0)
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// RBJ peaking EQ; gain in dB at the center frequency.
    pub fn set_peaking(&mut self, fc: f64, q: f64, gain_db: f64) {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * fc / self.sample_rate;
        let alpha = omega.sin() / (2.0 * q.max(0.1));
        let cos_w = omega.cos();

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = -2.0 * cos_w / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = -2.0 * cos_w / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    /// RBJ high shelf (shelf slope 1).
    pub fn set_high_shelf(&mut self, fc: f64, gain_db: f64) {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * fc / self.sample_rate;
        let cos_w = omega.cos();
        let alpha = omega.sin() / 2.0 * std::f64::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w + two_sqrt_a_alpha;
        self.b0 = a * ((a + 1.0) + (a - 1.0) * cos_w + two_sqrt_a_alpha) / a0;
        self.b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w) / a0;
        self.b2 = a * ((a + 1.0) + (a - 1.0) * cos_w - two_sqrt_a_alpha) / a0;
        self.a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w) / a0;
        self.a2 = ((a + 1.0) - (a - 1.0) * cos_w - two_sqrt_a_alpha) / a0;
    }

    #[inline]
    pub fn process(&mut self, xn: f64) -> f64 {
        let yn = self.b0 * xn + self.z1;
        self.z1 = self.b1 * xn - self.a1 * yn + self.z2;
        self.z2 = self.b2 * xn - self.a2 * yn;
        yn
    }
}

enum FilterCore {
    Svf([SvfCore; 2]),
    Biquad([BiquadCore; 2]),
}

/// The filter module: stereo pair of cores plus modulation inputs and
/// its own processing buffer (filled by the voice, processed in place).
pub struct SynthFilter {
    core: FilterCore,
    core_kind: FilterCoreKind,
    mod_in: ModArray,
    mod_out: ModArray,
    buffers: AudioBuffer,
    sample_rate: f64,
    midi_pitch: f64,
    output_gain: f64,
}

impl SynthFilter {
    pub fn new(core_kind: FilterCoreKind, block_size: usize) -> Self {
        Self {
            core: Self::make_core(core_kind),
            core_kind,
            mod_in: ModArray::new(),
            mod_out: ModArray::new(),
            buffers: AudioBuffer::new(block_size),
            sample_rate: 0.0,
            midi_pitch: 440.0,
            output_gain: 1.0,
        }
    }

    fn make_core(core_kind: FilterCoreKind) -> FilterCore {
        match core_kind {
            FilterCoreKind::Svf => FilterCore::Svf([SvfCore::default(); 2]),
            FilterCoreKind::Biquad => FilterCore::Biquad([BiquadCore::default(); 2]),
        }
    }

    pub fn core_kind(&self) -> FilterCoreKind {
        self.core_kind
    }

    pub fn select_core(&mut self, core_kind: FilterCoreKind, sample_rate: f64) {
        self.core_kind = core_kind;
        self.core = Self::make_core(core_kind);
        self.reset(sample_rate);
    }

    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        match &mut self.core {
            FilterCore::Svf(pair) => pair.iter_mut().for_each(|c| c.reset(sample_rate)),
            FilterCore::Biquad(pair) => pair.iter_mut().for_each(|c| c.reset(sample_rate)),
        }
    }

    /// Resolve the modulated cutoff and push coefficients.
    pub fn update(&mut self, params: &FilterParams) {
        let eg_mod = self.mod_in.value(EG_MOD) * params.eg_mod_intensity;
        let bipolar_mod = self.mod_in.value(BIPOLAR_MOD) * params.bipolar_mod_intensity;
        let fc_mod_semitones = (eg_mod + bipolar_mod) * FILTER_FC_MOD_RANGE_SEMITONES;

        let base_fc = if params.enable_key_track {
            self.midi_pitch * params.key_track_ratio
        } else {
            params.fc
        };
        let fc = (base_fc * 2.0_f64.powf(fc_mod_semitones / 12.0))
            .clamp(FILTER_FC_MIN, FILTER_FC_MAX);

        match &mut self.core {
            FilterCore::Svf(pair) => pair
                .iter_mut()
                .for_each(|c| c.set_coefficients(fc, params.q)),
            FilterCore::Biquad(pair) => pair
                .iter_mut()
                .for_each(|c| c.set_coefficients(fc, params.q, params.filter_type)),
        }
        self.output_gain = db_to_raw(params.output_gain_db);
    }

    /// Filter the contents of the module buffer in place.
    pub fn render(&mut self, params: &FilterParams, samples_to_process: usize) {
        self.update(params);
        let filter_type = params.filter_type;
        let gain = self.output_gain;
        let n = samples_to_process.min(self.buffers.block_size());
        let (left, right) = self.buffers.channels_mut();

        match &mut self.core {
            FilterCore::Svf(pair) => {
                let (l, r) = pair.split_at_mut(1);
                for i in 0..n {
                    left[i] = gain * l[0].process(left[i], filter_type);
                    right[i] = gain * r[0].process(right[i], filter_type);
                }
            }
            FilterCore::Biquad(pair) => {
                let (l, r) = pair.split_at_mut(1);
                for i in 0..n {
                    left[i] = gain * l[0].process(left[i]);
                    right[i] = gain * r[0].process(right[i]);
                }
            }
        }
    }

    pub fn note_on(&mut self, note_event: &MidiNoteEvent) {
        self.midi_pitch = note_event.midi_pitch;
        // clear state so a stolen voice does not replay old resonance
        self.reset(self.sample_rate);
    }

    pub fn note_off(&mut self, _note_event: &MidiNoteEvent) {}

    pub fn buffers(&self) -> &AudioBuffer {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffers
    }

    pub fn mod_in_mut(&mut self) -> &mut ModArray {
        &mut self.mod_in
    }

    pub fn mod_out(&self) -> &ModArray {
        &self.mod_out
    }
}
