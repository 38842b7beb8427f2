//! Morphing wavetable core: sweeps a bank of up to 16 tables with a
//! constant-power crossfade between the two neighbors of the morph
//! position. The aux EG is hardwired into the morph input by the voice.

use super::{modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::clock::SynthClock;
use crate::dsp::functions::{calculate_pan_values, const_power_xfade, db_to_raw, midi_note_from_freq};
use crate::dsp::modulation::{ModArray, UNIQUE_MOD, WAVE_MORPH_MOD};
use crate::dsp::synthesis::StaticWavetable;
use crate::midi::MidiNoteEvent;
use crate::params::{OscParams, MOD_KNOB_C, MOD_KNOB_D};

pub struct MorphWtCore {
    sample_rate: f64,
    osc_clock: SynthClock,
    midi_pitch: f64,
    output_amplitude: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    morph_location: f64,
    mix_value_0: f64,
    mix_value_1: f64,
    table_0: Option<StaticWavetable>,
    table_1: Option<StaticWavetable>,
    /// Cached bank resolution, refreshed when the bank name changes.
    bank_name: String,
    bank_table_indices: Vec<u32>,
}

impl Default for MorphWtCore {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            osc_clock: SynthClock::new(),
            midi_pitch: 440.0,
            output_amplitude: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            morph_location: 0.0,
            mix_value_0: 1.0,
            mix_value_1: 0.0,
            table_0: None,
            table_1: None,
            bank_name: String::new(),
            bank_table_indices: Vec::new(),
        }
    }
}

impl MorphWtCore {
    pub fn reset(&mut self, _params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.osc_clock.reset(0.0);
        self.bank_name.clear();
        self.bank_table_indices.clear();
        self.table_0 = None;
        self.table_1 = None;
    }

    fn resolve_bank(&mut self, params: &OscParams, shared: &OscSharedContext<'_>) {
        if self.bank_name == params.morph_bank && !self.bank_table_indices.is_empty() {
            return;
        }
        self.bank_name = params.morph_bank.clone();
        self.bank_table_indices.clear();
        if let Some(bank) = shared
            .morph_banks
            .iter()
            .find(|b| b.bank_name == params.morph_bank)
        {
            for name in &bank.table_names {
                if let Some(index) = shared.wavetables.waveform_index(name) {
                    self.bank_table_indices.push(index);
                }
            }
        }
    }

    pub fn update(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        mod_in: &ModArray,
        glide_mod: f64,
    ) {
        let pitch_mod = pitch_mod_semitones(params, shared, mod_in, glide_mod);
        let oscillator_frequency = modulated_oscillator_frequency(self.midi_pitch, pitch_mod);
        self.osc_clock
            .set_frequency(oscillator_frequency, self.sample_rate);

        self.resolve_bank(params, shared);
        if self.bank_table_indices.is_empty() {
            self.table_0 = None;
            self.table_1 = None;
            return;
        }

        // morph position: routed morph input mixed with the core-specific
        // unique mod, scaled by the intensity knob
        let morph_mod =
            (mod_in.value(WAVE_MORPH_MOD) + mod_in.value(UNIQUE_MOD)) * params.mod_knob[MOD_KNOB_D];

        let top_index = (self.bank_table_indices.len() - 1) as f64;
        let morph_start = top_index * params.mod_knob[MOD_KNOB_C];
        self.morph_location = (morph_mod * (top_index - morph_start) + morph_start)
            .clamp(0.0, top_index);

        let index_0 = self.morph_location as usize;
        let index_1 = (index_0 + 1).min(self.bank_table_indices.len() - 1);
        let morph_fraction = self.morph_location - index_0 as f64;
        let (mix_0, mix_1) = const_power_xfade(morph_fraction);
        self.mix_value_0 = mix_0;
        self.mix_value_1 = mix_1;

        let midi_note = midi_note_from_freq(oscillator_frequency);
        self.table_0 = shared
            .wavetables
            .table_source_by_index(self.bank_table_indices[index_0])
            .map(|s| s.select_table(midi_note).clone());
        self.table_1 = shared
            .wavetables
            .table_source_by_index(self.bank_table_indices[index_1])
            .map(|s| s.select_table(midi_note).clone());

        self.output_amplitude = db_to_raw(params.output_amplitude_db);
        let (left, right) = calculate_pan_values(params.pan);
        self.pan_left_gain = left;
        self.pan_right_gain = right;
    }

    pub fn render(
        &mut self,
        params: &OscParams,
        buffers: &mut AudioBuffer,
        samples_to_process: usize,
        fm_buffer: Option<&AudioBuffer>,
    ) {
        for i in 0..samples_to_process {
            if let Some(fm) = fm_buffer {
                let mod_value = params.phase_mod_index * 0.5 * (fm.left()[i] + fm.right()[i]);
                self.osc_clock.add_phase_offset(mod_value);
            }

            let phase = self.osc_clock.mcounter;
            let sample_0 = self.table_0.as_ref().map_or(0.0, |t| t.read(phase));
            let sample_1 = self.table_1.as_ref().map_or(0.0, |t| t.read(phase));
            let osc_output =
                (self.mix_value_0 * sample_0 + self.mix_value_1 * sample_1) * self.output_amplitude;

            buffers.left_mut()[i] = osc_output * self.pan_left_gain;
            buffers.right_mut()[i] = osc_output * self.pan_right_gain;

            if fm_buffer.is_some() {
                self.osc_clock.remove_phase_offset();
                self.osc_clock.wrap_clock();
            }
            self.osc_clock.advance_wrap_clock();
        }
    }

    pub fn note_on(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        note_event: &MidiNoteEvent,
    ) {
        self.midi_pitch = note_event.midi_pitch;
        if shared.unison_start_phase > 0.0 {
            self.osc_clock.reset(shared.unison_start_phase / 360.0);
        } else {
            self.osc_clock.reset(0.0);
        }
    }
}
