//! Fourier wavetable core: synthesizes its table set by additive
//! synthesis at reset, truncating harmonics per octave so every note
//! stays below Nyquist. Tables are rebuilt whenever the sample rate or
//! the selected waveform changes.

use super::{modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::clock::SynthClock;
use crate::dsp::functions::{calculate_pan_values, db_to_raw, midi_note_from_freq};
use crate::dsp::modulation::ModArray;
use crate::dsp::synthesis::{build_fourier_table_set, FourierWaveform, StaticTableSource, WavetableSource};
use crate::midi::MidiNoteEvent;
use crate::params::{OscParams, MOD_KNOB_C};

/// Waveforms served by this core, in wave-index order.
pub const FOURIER_WAVEFORMS: [FourierWaveform; 4] = [
    FourierWaveform::Sawtooth,
    FourierWaveform::Parabola,
    FourierWaveform::Square,
    FourierWaveform::Triangle,
];

pub struct FourierWtCore {
    sample_rate: f64,
    table_sample_rate: f64,
    osc_clock: SynthClock,
    midi_pitch: f64,
    output_amplitude: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    selected_note: u8,
    current_wave_index: i32,
    tables: Option<StaticTableSource>,
}

impl Default for FourierWtCore {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            table_sample_rate: 0.0,
            osc_clock: SynthClock::new(),
            midi_pitch: 440.0,
            output_amplitude: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            selected_note: 69,
            current_wave_index: -1,
            tables: None,
        }
    }
}

impl FourierWtCore {
    fn waveform(params: &OscParams) -> FourierWaveform {
        FOURIER_WAVEFORMS
            .get(params.wave_index)
            .copied()
            .unwrap_or(FOURIER_WAVEFORMS[0])
    }

    fn build_tables(&mut self, params: &OscParams) {
        let waveform = Self::waveform(params);
        self.tables = Some(build_fourier_table_set(
            "fourier",
            waveform,
            self.sample_rate,
        ));
        self.table_sample_rate = self.sample_rate;
        self.current_wave_index = params.wave_index as i32;
    }

    pub fn reset(&mut self, params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.osc_clock.reset(params.mod_knob[MOD_KNOB_C]);
        self.build_tables(params);
    }

    pub fn update(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        mod_in: &ModArray,
        glide_mod: f64,
    ) {
        // stale tables: sample rate or waveform changed since last build
        if self.table_sample_rate != self.sample_rate
            || self.current_wave_index != params.wave_index as i32
            || self.tables.is_none()
        {
            self.build_tables(params);
        }

        let pitch_mod = pitch_mod_semitones(params, shared, mod_in, glide_mod);
        let oscillator_frequency = modulated_oscillator_frequency(self.midi_pitch, pitch_mod);
        self.osc_clock
            .set_frequency(oscillator_frequency, self.sample_rate);
        self.selected_note = midi_note_from_freq(oscillator_frequency);

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
        let Some(tables) = &self.tables else {
            for i in 0..samples_to_process {
                buffers.left_mut()[i] = 0.0;
                buffers.right_mut()[i] = 0.0;
            }
            return;
        };
        let table = tables.select_table(self.selected_note);

        for i in 0..samples_to_process {
            if let Some(fm) = fm_buffer {
                let mod_value = params.phase_mod_index * 0.5 * (fm.left()[i] + fm.right()[i]);
                self.osc_clock.add_phase_offset(mod_value);
            }

            let osc_output = table.read(self.osc_clock.mcounter) * self.output_amplitude;
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
            self.osc_clock.reset(params.mod_knob[MOD_KNOB_C]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
    use crate::midi::MidiInputData;

    const FS: f64 = 48000.0;

    #[test]
    fn test_tables_rebuild_on_sample_rate_change() {
        let params = OscParams::default();
        let mut core = FourierWtCore::default();
        core.reset(&params, 44100.0);
        assert_eq!(core.table_sample_rate, 44100.0);

        let (wavetables, morph_banks) = build_standard_database(FS);
        let samples = PcmSampleDatabase::new();
        let midi = MidiInputData::default();
        let shared = OscSharedContext {
            midi: &midi,
            wavetables: &wavetables,
            samples: &samples,
            morph_banks: &morph_banks,
            unison_detune_cents: 0.0,
            unison_start_phase: 0.0,
            samples_to_process: 64,
        };

        core.sample_rate = FS;
        core.update(&params, &shared, &ModArray::new(), 0.0);
        assert_eq!(core.table_sample_rate, FS);
    }

    #[test]
    fn test_renders_periodic_signal() {
        let (wavetables, morph_banks) = build_standard_database(FS);
        let samples = PcmSampleDatabase::new();
        let midi = MidiInputData::default();
        let shared = OscSharedContext {
            midi: &midi,
            wavetables: &wavetables,
            samples: &samples,
            morph_banks: &morph_banks,
            unison_detune_cents: 0.0,
            unison_start_phase: 0.0,
            samples_to_process: 64,
        };
        let params = OscParams {
            wave_index: 2, // square
            ..OscParams::default()
        };

        let mut core = FourierWtCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &shared, &MidiNoteEvent::new(375.0, 66, 90));
        core.update(&params, &shared, &ModArray::new(), 0.0);

        // 375 Hz at 48 kHz = exactly 128 samples per cycle
        let mut cycle_a = Vec::new();
        let mut cycle_b = Vec::new();
        let mut buffer = AudioBuffer::new(64);
        for block in 0..4 {
            core.render(&params, &mut buffer, 64, None);
            for i in 0..64 {
                if block < 2 {
                    cycle_a.push(buffer.left()[i]);
                } else {
                    cycle_b.push(buffer.left()[i]);
                }
            }
        }
        for (a, b) in cycle_a.iter().zip(cycle_b.iter()) {
            assert!((a - b).abs() < 1e-9, "waveform must be periodic");
        }
    }
}
