//! Karplus-Strong plucked-string core. The exciter's shaped noise burst
//! is filtered (bite shelf + pluck-position comb chain), pushed through
//! the resonator loop, optionally overdriven for the electric model, and
//! colored by a per-model body resonance.

use super::{modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::filter::BiquadCore;
use crate::dsp::functions::{calculate_pan_values, mod_knob_value_linear, tanh_waveshaper};
use crate::dsp::karplus::{Exciter, PluckFilterType, PluckPosFilter, Resonator};
use crate::dsp::modulation::{ModArray, UNIQUE_MOD};
use crate::midi::MidiNoteEvent;
use crate::params::{FilterType, KsModel, OscParams, MOD_KNOB_A, MOD_KNOB_B, MOD_KNOB_C, MOD_KNOB_D};

pub struct KsCore {
    sample_rate: f64,
    resonator: Resonator,
    exciter: Exciter,
    pluck_pos_filter: PluckPosFilter,
    high_shelf_filter: BiquadCore,
    body_filter: BiquadCore,
    distortion_filter: BiquadCore,
    midi_pitch: f64,
    pluck_position: f64,
    output_amplitude: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
}

impl Default for KsCore {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            resonator: Resonator::default(),
            exciter: Exciter::default(),
            pluck_pos_filter: PluckPosFilter::default(),
            high_shelf_filter: BiquadCore::default(),
            body_filter: BiquadCore::default(),
            distortion_filter: BiquadCore::default(),
            midi_pitch: 440.0,
            pluck_position: 4.0,
            output_amplitude: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
        }
    }
}

impl KsCore {
    pub fn reset(&mut self, _params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.resonator.reset(sample_rate);
        self.exciter.reset(sample_rate);
        self.pluck_pos_filter.reset(sample_rate);
        self.high_shelf_filter.reset(sample_rate);
        self.body_filter.reset(sample_rate);
        self.distortion_filter.reset(sample_rate);
        self.distortion_filter
            .set_coefficients(2000.0, 2.5, FilterType::Lpf2);
    }

    pub fn update(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        mod_in: &ModArray,
        glide_mod: f64,
    ) {
        // knob A is the core's coarse detune, +/- 12 semitones
        let coarse = mod_knob_value_linear(params.mod_knob[MOD_KNOB_A], -12.0, 12.0);
        let pitch_mod = pitch_mod_semitones(params, shared, mod_in, glide_mod) + coarse;
        let oscillator_frequency = modulated_oscillator_frequency(self.midi_pitch, pitch_mod);

        let delay_len = self
            .resonator
            .set_parameters(oscillator_frequency, params.ks_decay);

        // pluck position divides the string delay; knob D sweeps 10 -> 2
        self.pluck_position = mod_knob_value_linear(params.mod_knob[MOD_KNOB_D], 10.0, 2.0);
        self.pluck_pos_filter
            .set_delay_in_samples(delay_len / self.pluck_position);

        self.exciter.set_parameters(
            params.ks_attack_msec,
            params.ks_hold_msec,
            params.ks_release_msec,
        );

        // bite: high shelf at 2 kHz, 0..20 dB from knob C
        let bite_db = mod_knob_value_linear(params.mod_knob[MOD_KNOB_C], 0.0, 20.0);
        self.high_shelf_filter.set_high_shelf(2000.0, bite_db);

        // body resonance per model
        let body_db = 3.0;
        match params.ks_model {
            KsModel::NylonGuitar => self.body_filter.set_peaking(400.0, 1.0, body_db),
            KsModel::DistortedGuitar => self.body_filter.set_peaking(300.0, 2.0, body_db),
            KsModel::Bass => self.body_filter.set_peaking(250.0, 1.0, body_db),
            KsModel::Silent => {}
        }

        // pan modulation is this core's unique mod
        let pan_total = (params.pan + 0.5 * mod_in.value(UNIQUE_MOD)).clamp(-1.0, 1.0);
        let (left, right) = calculate_pan_values(pan_total);
        self.pan_left_gain = left;
        self.pan_right_gain = right;

        // boost: knob B, 0..20 dB of make-up gain
        let output_db = mod_knob_value_linear(params.mod_knob[MOD_KNOB_B], 0.0, 20.0);
        self.output_amplitude = 10.0_f64.powf(output_db / 20.0);
    }

    pub fn render(
        &mut self,
        params: &OscParams,
        buffers: &mut AudioBuffer,
        samples_to_process: usize,
    ) {
        for i in 0..samples_to_process {
            let mut input = self.exciter.render();
            input = self.high_shelf_filter.process(input);

            input = match params.ks_model {
                KsModel::NylonGuitar => self
                    .pluck_pos_filter
                    .process(input, PluckFilterType::PluckAndBridge),
                KsModel::DistortedGuitar => self
                    .pluck_pos_filter
                    .process(input, PluckFilterType::PluckAndPickup),
                KsModel::Bass => self
                    .pluck_pos_filter
                    .process(input, PluckFilterType::PluckPickupBridge),
                KsModel::Silent => 0.0,
            };

            let mut osc_output = self.resonator.process(input);

            if params.ks_model == KsModel::DistortedGuitar {
                // x10 adds sustain, the huge saturation adds the fizz;
                // the LPF at -6 dB reins the energy back in
                osc_output = tanh_waveshaper(osc_output * 10.0, 5000.0);
                osc_output = 0.5 * self.distortion_filter.process(osc_output);
            }

            osc_output = self.body_filter.process(osc_output);
            osc_output *= self.output_amplitude;

            buffers.left_mut()[i] = self.pan_left_gain * osc_output;
            buffers.right_mut()[i] = self.pan_right_gain * osc_output;
        }
    }

    pub fn note_on(&mut self, _params: &OscParams, note_event: &MidiNoteEvent) {
        self.midi_pitch = note_event.midi_pitch;

        self.resonator.flush_delays();
        self.pluck_pos_filter.clear();
        self.high_shelf_filter.reset(self.sample_rate);
        self.body_filter.reset(self.sample_rate);

        self.exciter.start_exciter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
    use crate::midi::MidiInputData;

    const FS: f64 = 48000.0;

    fn shared<'a>(
        midi: &'a MidiInputData,
        wavetables: &'a crate::dsp::synthesis::WavetableDatabase,
        samples: &'a PcmSampleDatabase,
        morph_banks: &'a [crate::dsp::synthesis::MorphBankData],
    ) -> OscSharedContext<'a> {
        OscSharedContext {
            midi,
            wavetables,
            samples,
            morph_banks,
            unison_detune_cents: 0.0,
            unison_start_phase: 0.0,
            samples_to_process: 64,
        }
    }

    fn pluck(params: &OscParams, blocks: usize) -> Vec<f64> {
        let (wavetables, morph_banks) = build_standard_database(FS);
        let samples = PcmSampleDatabase::new();
        let midi = MidiInputData::default();
        let ctx = shared(&midi, &wavetables, &samples, &morph_banks);

        let mut core = KsCore::default();
        core.reset(params, FS);
        core.note_on(params, &MidiNoteEvent::new(110.0, 45, 100));
        core.update(params, &ctx, &ModArray::new(), 0.0);

        let mut buffer = AudioBuffer::new(64);
        let mut signal = Vec::with_capacity(blocks * 64);
        for _ in 0..blocks {
            core.render(params, &mut buffer, 64);
            signal.extend_from_slice(buffer.left());
        }
        signal
    }

    /// Knob A centered = no coarse detune; knob D centered = mid pluck.
    fn ks_params() -> OscParams {
        OscParams {
            mod_knob: [0.5, 0.0, 0.0, 0.5],
            ..OscParams::default()
        }
    }

    #[test]
    fn test_pluck_rings_and_decays() {
        let params = OscParams {
            ks_decay: 0.99,
            ..ks_params()
        };
        // ~1.3 seconds of ring-down
        let signal = pluck(&params, 1000);
        assert!(signal.iter().all(|v| v.is_finite()));

        // RMS over 50 ms windows decays after the exciter finishes
        let window = (0.05 * FS) as usize;
        let rms: Vec<f64> = signal
            .chunks(window)
            .map(|w| (w.iter().map(|v| v * v).sum::<f64>() / w.len() as f64).sqrt())
            .collect();
        assert!(rms[0] > 0.0, "the strike must make sound");
        let tail_start = 2;
        for pair in rms[tail_start..rms.len() - 1].windows(2) {
            assert!(
                pair[1] <= pair[0] * 1.05,
                "ring-down must decay: {} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_fundamental_near_110_hz() {
        let params = OscParams {
            ks_decay: 0.99,
            ..ks_params()
        };
        let signal = pluck(&params, 128);

        // autocorrelation peak within half a percent of fs/110
        let expected_lag = (FS / 110.0).round() as usize;
        let mut best_lag = 0;
        let mut best_corr = f64::MIN;
        for lag in expected_lag - 30..expected_lag + 30 {
            let mut corr = 0.0;
            for i in 2048..signal.len() - lag {
                corr += signal[i] * signal[i + lag];
            }
            if corr > best_corr {
                best_corr = corr;
                best_lag = lag;
            }
        }
        let measured = FS / best_lag as f64;
        assert!(
            (measured - 110.0).abs() < 0.5,
            "fundamental {measured} Hz, expected 110 +/- 0.5"
        );
    }

    #[test]
    fn test_silent_model_is_silent() {
        let params = OscParams {
            ks_model: KsModel::Silent,
            ..ks_params()
        };
        let signal = pluck(&params, 20);
        assert!(signal.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_distorted_model_is_louder_than_nylon() {
        let nylon = pluck(&ks_params(), 100);
        let params = OscParams {
            ks_model: KsModel::DistortedGuitar,
            ..ks_params()
        };
        let dist = pluck(&params, 100);

        let power = |s: &[f64]| s.iter().map(|v| v * v).sum::<f64>();
        assert!(power(&dist) > power(&nylon));
    }
}
