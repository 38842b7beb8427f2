//! FM operator core: a sine oscillator with an embedded DX envelope.
//!
//! One of these is *not* a complete FM voice - it is one operator. The
//! voice owns four and patches them into one of eight DX-style
//! algorithm graphs (stacks, branches, and parallel sums) by handing
//! each operator the rendered audio of its modulator as a
//! phase-modulation buffer.
//!
//! # The Embedded DX Envelope
//!
//! Each operator owns a private [`DxEgCore`] run in standalone mode: the
//! operator's `fm_eg` parameter block (attack/decay/decay-level/slope/
//! sustain/release/curvature) is copied straight into the core, skipping
//! the panel mod knobs. The envelope is stepped **per sample**, not per
//! block. That matters: an operator's amplitude *is* its modulation
//! index, so a block-rate envelope on a modulator would staircase the
//! spectrum of everything downstream of it - audible as zipper noise on
//! bright, high-index patches. Sampling the EG every frame keeps the
//! index motion continuous.
//!
//! # Phase Modulation and Self-Feedback
//!
//! With a PM buffer attached, the incoming stereo audio is collapsed to
//! mono, scaled by the phase-mod index, and pushed into the clock as a
//! temporary phase offset (added before the table read, removed after,
//! so the nominal phase is untouched). Without a buffer, knob D enables
//! *self*-modulation: the operator's previous output sample feeds its
//! own phase, with the feedback amount capped at 0.20 - beyond that the
//! loop stops sounding like a brighter sine and starts squealing.
//!
//! # Ratio and Pan
//!
//! The operator frequency is the note pitch times the `ratio` parameter
//! (integer ratios give harmonic spectra, detuned ratios give bells and
//! clangs), modulated by the usual semitone stack. The unique-mod input
//! drives equal-power pan at half depth.

use super::{modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::clock::SynthClock;
use crate::dsp::envelope::{DxEgCore, EgState};
use crate::dsp::functions::{calculate_pan_values, db_to_raw, mod_knob_value_linear};
use crate::dsp::modulation::{ModArray, UNIQUE_MOD};
use crate::dsp::synthesis::{SineTableSource, StaticWavetable, WavetableSource};
use crate::midi::MidiNoteEvent;
use crate::params::{DxEgContour, EgCoreKind, EgParams, OscParams, MOD_KNOB_D};

/// Self-modulation feedback ceiling; above this the operator squeals.
pub const FM_MAX_FEEDBACK: f64 = 0.20;

pub struct FmOpCore {
    sample_rate: f64,
    osc_clock: SynthClock,
    dx_eg: DxEgCore,
    eg_params: EgParams,
    sine_table: Option<StaticWavetable>,
    midi_pitch: f64,
    output_amplitude: f64,
    output_value: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    feedback: f64,
}

impl Default for FmOpCore {
    fn default() -> Self {
        let mut dx_eg = DxEgCore::default();
        dx_eg.standalone_mode = true;
        Self {
            sample_rate: 0.0,
            osc_clock: SynthClock::new(),
            dx_eg,
            eg_params: EgParams {
                core: EgCoreKind::DxEg,
                contour: DxEgContour::Adslsr,
                ..EgParams::default()
            },
            sine_table: None,
            midi_pitch: 440.0,
            output_amplitude: 1.0,
            output_value: 0.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            feedback: 0.0,
        }
    }
}

impl FmOpCore {
    pub fn reset(&mut self, params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.osc_clock.reset(0.0);
        let sine = SineTableSource::new(sample_rate);
        self.sine_table = Some(sine.select_table(69).clone());
        self.sync_eg_params(params);
        self.dx_eg.reset(&self.eg_params, sample_rate);
        self.output_value = 0.0;
    }

    /// Copy the operator's envelope fields into the embedded core's
    /// parameter block (the core runs standalone, bypassing mod knobs).
    fn sync_eg_params(&mut self, params: &OscParams) {
        let eg = &params.fm_eg;
        self.eg_params.attack_time_msec = eg.attack_time_msec;
        self.eg_params.decay_time_msec = eg.decay_time_msec;
        self.eg_params.sustain_level = eg.sustain_level;
        self.eg_params.release_time_msec = eg.release_time_msec;
        self.eg_params.start_level = eg.start_level;
        self.eg_params.decay_level = eg.decay_level;
        self.eg_params.slope_time_msec = eg.slope_time_msec;
        self.eg_params.curvature = eg.curvature;
    }

    pub fn update(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        mod_in: &ModArray,
        glide_mod: f64,
    ) {
        self.sync_eg_params(params);
        self.dx_eg.update(
            &self.eg_params,
            shared.midi.sustain_pedal_down(),
            &ModArray::new(),
        );

        let pitch_mod = pitch_mod_semitones(params, shared, mod_in, glide_mod);
        // the operator ratio scales the note pitch before clamping
        let oscillator_frequency =
            modulated_oscillator_frequency(self.midi_pitch * params.ratio, pitch_mod);
        self.osc_clock
            .set_frequency(oscillator_frequency, self.sample_rate);

        self.output_amplitude = db_to_raw(params.output_amplitude_db);
        self.feedback = mod_knob_value_linear(params.mod_knob[MOD_KNOB_D], 0.0, FM_MAX_FEEDBACK);

        // pan modulation is this core's unique mod
        let pan_total = (params.pan + 0.5 * mod_in.value(UNIQUE_MOD)).clamp(-1.0, 1.0);
        let (left, right) = calculate_pan_values(pan_total);
        self.pan_left_gain = left;
        self.pan_right_gain = right;
    }

    pub fn render(
        &mut self,
        params: &OscParams,
        _shared: &OscSharedContext<'_>,
        buffers: &mut AudioBuffer,
        samples_to_process: usize,
        fm_buffer: Option<&AudioBuffer>,
    ) {
        let Some(sine_table) = self.sine_table.clone() else {
            return;
        };
        let self_modulate = fm_buffer.is_none() && params.mod_knob[MOD_KNOB_D] > 0.0;

        for i in 0..samples_to_process {
            // per-sample EG read
            let eg_output = self.dx_eg.render_sample(&self.eg_params);

            if let Some(fm) = fm_buffer {
                let mod_value = params.phase_mod_index * 0.5 * (fm.left()[i] + fm.right()[i]);
                self.osc_clock.add_phase_offset(mod_value);
            } else if self_modulate {
                let mod_value = params.phase_mod_index * self.feedback * self.output_value;
                self.osc_clock.add_phase_offset(mod_value);
            }

            self.output_value =
                eg_output * sine_table.read(self.osc_clock.mcounter) * self.output_amplitude;

            buffers.left_mut()[i] = self.output_value * self.pan_left_gain;
            buffers.right_mut()[i] = self.output_value * self.pan_right_gain;

            if fm_buffer.is_some() || self_modulate {
                self.osc_clock.remove_phase_offset();
                self.osc_clock.wrap_clock();
            }
            self.osc_clock.advance_wrap_clock();
        }
    }

    pub fn note_on(&mut self, params: &OscParams, note_event: &MidiNoteEvent) {
        self.midi_pitch = note_event.midi_pitch;
        self.osc_clock.reset(0.0);
        self.sync_eg_params(params);
        self.dx_eg.note_on(&self.eg_params, note_event);
    }

    pub fn note_off(&mut self, params: &OscParams, _note_event: &MidiNoteEvent) {
        self.sync_eg_params(params);
        self.dx_eg.note_off(&self.eg_params);
    }

    pub fn eg_state(&self) -> EgState {
        self.dx_eg.state()
    }
}
