//! Digitally controlled amplifier: the voice's output VCA. Simple
//! enough to need no selectable cores - velocity, the hardwired amp-EG
//! modulation, a unipolar max-down amplitude mod (tremolo), and pan.

use crate::audio::buffer::AudioBuffer;
use crate::dsp::functions::{calculate_pan_values, db_to_raw};
use crate::dsp::modulation::{ModArray, EG_MOD, MAX_DOWN_AMP_MOD, PAN_MOD};
use crate::midi::MidiNoteEvent;
use crate::params::DcaParams;

pub struct Dca {
    mod_in: ModArray,
    mod_out: ModArray,
    buffers: AudioBuffer,
    gain_raw: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    midi_velocity_gain: f64,
}

impl Dca {
    pub fn new(block_size: usize) -> Self {
        Self {
            mod_in: ModArray::new(),
            mod_out: ModArray::new(),
            buffers: AudioBuffer::new(block_size),
            gain_raw: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            midi_velocity_gain: 0.0,
        }
    }

    pub fn reset(&mut self, _sample_rate: f64) {
        self.gain_raw = 1.0;
        self.midi_velocity_gain = 0.0;
        self.buffers.flush();
    }

    pub fn update(&mut self, params: &DcaParams) {
        // EG input drives the amplitude; the max-down mod scales it
        // downward from its unity rest value
        let eg_mod = self.mod_in.value(EG_MOD).max(0.0);
        let amp_mod = self.mod_in.value(MAX_DOWN_AMP_MOD).clamp(0.0, 1.0);
        self.gain_raw = db_to_raw(params.gain_db) * eg_mod * amp_mod * self.midi_velocity_gain;

        let pan_total = (params.pan + self.mod_in.value(PAN_MOD)).clamp(-1.0, 1.0);
        let (left, right) = calculate_pan_values(pan_total);
        self.pan_left_gain = left;
        self.pan_right_gain = right;
    }

    /// Apply gain and pan to the module buffer in place.
    pub fn render(&mut self, params: &DcaParams, samples_to_process: usize) {
        self.update(params);
        let n = samples_to_process.min(self.buffers.block_size());
        let (left, right) = self.buffers.channels_mut();
        for i in 0..n {
            left[i] *= self.gain_raw * self.pan_left_gain;
            right[i] *= self.gain_raw * self.pan_right_gain;
        }
    }

    pub fn note_on(&mut self, note_event: &MidiNoteEvent) {
        self.midi_velocity_gain = note_event.midi_velocity as f64 / 127.0;
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
