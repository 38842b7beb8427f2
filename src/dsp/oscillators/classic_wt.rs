//! Classic wavetable oscillator core: band-limited table playback with
//! phase-distortion shaping and hard sync as its unique modulation.
//!
//! # Pitch and Table Selection
//!
//! Per block the core sums every pitch contribution in semitones (glide,
//! bipolar mod input, pitch bend, master tuning, octave/coarse/fine
//! detune, unison cents), converts once through `2^(semis/12)`, clamps
//! to the oscillator range, and then picks the wavetable for the MIDI
//! note *nearest the modulated frequency* - not the played note - so a
//! pitch swept upward always reads a table band-limited for where it
//! actually is. Lookup itself is a linear-interpolated read with a
//! power-of-two wrap mask.
//!
//! # Phase Distortion ("Shape")
//!
//! The shape control (knob A plus the shape-mod input) bends the read
//! phase through a piecewise-linear remap around a movable pivot: the
//! first half of the cycle is squeezed into `[0, pivot)` and the second
//! half stretched across `[pivot, 1)`. Shape 0 is the identity, so the
//! effect fades in smoothly from nothing; pushing the pivot off-center
//! skews the waveform and thickens its harmonics without any extra
//! table storage.
//!
//! # Hard Sync
//!
//! This core's unique modulation is hard sync. A [`Synchronizer`] owns a
//! slave clock running at `ratio x f0` (ratio 1-4 from knob B, plus a
//! full-wave-rectified sweep from the unique-mod input). Each time the
//! *master* clock wraps, the slave is yanked back to zero phase - that
//! periodic reset is what creates the rip-saw sync spectrum. Resetting a
//! phase mid-cycle would click, so the synchronizer keeps a second
//! "cross-fade clock" that lets the interrupted cycle finish while the
//! restarted cycle fades in over a few samples, and the core renders
//! from both clocks during that window.

use super::{
    modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext, HSYNC_MOD_SLOPE,
};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::clock::{SynthClock, Synchronizer};
use crate::dsp::functions::{calculate_pan_values, db_to_raw, midi_note_from_freq};
use crate::dsp::modulation::{ModArray, SHAPE_MOD, UNIQUE_MOD};
use crate::dsp::synthesis::{StaticWavetable, CLASSIC_WAVEFORMS};
use crate::midi::MidiNoteEvent;
use crate::params::{OscParams, MOD_KNOB_A, MOD_KNOB_B, MOD_KNOB_C};

/// Piecewise-linear phase remap around a shape-controlled pivot; shape 0
/// is the identity.
#[inline]
pub fn apply_phase_distortion(phase: f64, shape: f64) -> f64 {
    if shape == 0.0 {
        return phase;
    }
    let pivot = (0.5 * (1.0 + shape)).clamp(0.05, 0.95);
    if phase < pivot {
        0.5 * phase / pivot
    } else {
        0.5 + 0.5 * (phase - pivot) / (1.0 - pivot)
    }
}

pub struct ClassicWtCore {
    sample_rate: f64,
    osc_clock: SynthClock,
    hard_syncronizer: Synchronizer,
    midi_pitch: f64,
    output_amplitude: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    oscillator_shape: f64,
    hard_sync_ratio: f64,
    current_wave_index: i32,
    selected_table: Option<StaticWavetable>,
}

impl Default for ClassicWtCore {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            osc_clock: SynthClock::new(),
            hard_syncronizer: Synchronizer::default(),
            midi_pitch: 440.0,
            output_amplitude: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            oscillator_shape: 0.0,
            hard_sync_ratio: 1.0,
            current_wave_index: -1,
            selected_table: None,
        }
    }
}

impl ClassicWtCore {
    pub fn reset(&mut self, params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.hard_syncronizer.reset(sample_rate, 0.0);
        self.osc_clock.reset(params.mod_knob[MOD_KNOB_C]);
        self.current_wave_index = -1;
        self.selected_table = None;
    }

    /// Waveform name for the dialed index; unknown indexes read as the
    /// first waveform.
    fn waveform_name(params: &OscParams) -> &'static str {
        CLASSIC_WAVEFORMS
            .get(params.wave_index)
            .copied()
            .unwrap_or(CLASSIC_WAVEFORMS[0])
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

        // hard sync ratio: knob B sets the base, the unique-mod input adds
        // a full-wave-rectified sweep on top
        let knob_ratio = 1.0 + params.mod_knob[MOD_KNOB_B] * 3.0;
        let hs_mod = mod_in.value(UNIQUE_MOD).abs() * HSYNC_MOD_SLOPE;
        self.hard_sync_ratio = (knob_ratio + hs_mod).clamp(1.0, 4.0);
        self.hard_syncronizer
            .set_hard_sync_frequency(oscillator_frequency * self.hard_sync_ratio);

        // table selection tracks the modulated pitch to stay alias-free
        let midi_note = midi_note_from_freq(oscillator_frequency);
        let wave_changed = params.wave_index as i32 != self.current_wave_index;
        if wave_changed || self.selected_table.is_none() {
            self.current_wave_index = params.wave_index as i32;
        }
        self.selected_table = shared
            .wavetables
            .table_source(Self::waveform_name(params))
            .map(|source| source.select_table(midi_note).clone());

        self.output_amplitude = db_to_raw(params.output_amplitude_db);

        // shape: knob A plus the shape-mod input
        self.oscillator_shape =
            (params.mod_knob[MOD_KNOB_A] + mod_in.value(SHAPE_MOD)).clamp(-1.0, 1.0);

        let (left, right) = calculate_pan_values(params.pan);
        self.pan_left_gain = left;
        self.pan_right_gain = right;
    }

    fn read_table(table: &Option<StaticWavetable>, phase: f64) -> f64 {
        match table {
            Some(table) => table.read(phase),
            // missing waveform: silence, keep running
            None => 0.0,
        }
    }

    fn render_sample(&mut self, use_sync_clock: bool, shape: f64) -> f64 {
        let clock = if use_sync_clock {
            self.hard_syncronizer.hard_sync_clock()
        } else {
            &mut self.osc_clock
        };
        let phase = apply_phase_distortion(clock.mcounter, shape);
        let output = Self::read_table(&self.selected_table, phase);
        clock.advance_wrap_clock();
        output
    }

    fn render_hard_sync_sample(&mut self, shape: f64) -> f64 {
        if self.hard_syncronizer.is_processing() {
            // both clocks run while the interrupted cycle fades out
            let phase_a =
                apply_phase_distortion(self.hard_syncronizer.cross_fade_clock().mcounter, shape);
            let output_a = Self::read_table(&self.selected_table, phase_a);
            self.hard_syncronizer.cross_fade_clock().advance_wrap_clock();

            let phase_b =
                apply_phase_distortion(self.hard_syncronizer.hard_sync_clock().mcounter, shape);
            let output_b = Self::read_table(&self.selected_table, phase_b);
            self.hard_syncronizer.hard_sync_clock().advance_wrap_clock();

            let output = self.hard_syncronizer.do_hard_sync_xfade(output_a, output_b);
            self.osc_clock.advance_wrap_clock();
            output
        } else {
            let output = self.render_sample(true, shape);
            if self.osc_clock.advance_wrap_clock() {
                self.hard_syncronizer.start_hard_sync();
            }
            output
        }
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
                let mod_value =
                    params.phase_mod_index * 0.5 * (fm.left()[i] + fm.right()[i]);
                self.osc_clock.add_phase_offset(mod_value);
                self.hard_syncronizer.add_phase_offset(mod_value);
            }

            let shape = self.oscillator_shape;
            let osc_output = if self.hard_sync_ratio > 1.0 {
                self.render_hard_sync_sample(shape)
            } else {
                self.render_sample(false, shape)
            } * self.output_amplitude;

            buffers.left_mut()[i] = osc_output * self.pan_left_gain;
            buffers.right_mut()[i] = osc_output * self.pan_right_gain;

            if fm_buffer.is_some() {
                self.osc_clock.remove_phase_offset();
                self.hard_syncronizer.remove_phase_offset();
            }
        }
    }

    pub fn note_on(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        note_event: &MidiNoteEvent,
    ) {
        self.midi_pitch = note_event.midi_pitch;

        // unison start phase wins over the phase knob
        if shared.unison_start_phase > 0.0 {
            self.osc_clock.reset(shared.unison_start_phase / 360.0);
        } else {
            self.osc_clock.reset(params.mod_knob[MOD_KNOB_C]);
        }
        self.current_wave_index = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
    use crate::midi::MidiInputData;
    use approx::assert_relative_eq;

    const FS: f64 = 48000.0;

    #[test]
    fn test_phase_distortion_identity_and_bounds() {
        for phase in [0.0, 0.25, 0.5, 0.75, 0.999] {
            assert_relative_eq!(apply_phase_distortion(phase, 0.0), phase, epsilon = 1e-12);
            for shape in [-1.0, -0.3, 0.4, 1.0] {
                let out = apply_phase_distortion(phase, shape);
                assert!((0.0..1.0).contains(&out));
            }
        }
        // the pivot always maps to the half cycle
        assert_relative_eq!(apply_phase_distortion(0.75, 0.5), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_renders_selected_waveform() {
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
        let params = OscParams::default();

        let mut core = ClassicWtCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &shared, &MidiNoteEvent::new(440.0, 69, 100));
        core.update(&params, &shared, &ModArray::new(), 0.0);

        let mut buffer = AudioBuffer::new(64);
        let mut energy = 0.0;
        for _ in 0..20 {
            core.render(&params, &mut buffer, 64, None);
            energy += buffer.left().iter().map(|v| v * v).sum::<f64>();
        }
        assert!(energy > 0.0, "oscillator must produce signal");
    }

    #[test]
    fn test_missing_waveform_is_silent() {
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
        let params = OscParams::default();

        let mut core = ClassicWtCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &shared, &MidiNoteEvent::new(440.0, 69, 100));
        core.update(&params, &shared, &ModArray::new(), 0.0);
        // simulate a missing table
        core.selected_table = None;

        let mut buffer = AudioBuffer::new(64);
        core.render(&params, &mut buffer, 64, None);
        assert!(buffer.left().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_unique_mod_engages_hard_sync() {
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
        let params = OscParams::default();
        let mut core = ClassicWtCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &shared, &MidiNoteEvent::new(220.0, 57, 100));

        let mut mods = ModArray::new();
        mods.set_value(UNIQUE_MOD, 0.5);
        core.update(&params, &shared, &mods, 0.0);
        assert!(core.hard_sync_ratio > 1.0);

        mods.set_value(UNIQUE_MOD, 0.0);
        core.update(&params, &shared, &mods, 0.0);
        assert_relative_eq!(core.hard_sync_ratio, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pitch_mod_changes_frequency() {
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
        let params = OscParams::default();
        let mut core = ClassicWtCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &shared, &MidiNoteEvent::new(440.0, 69, 100));

        let mut mods = ModArray::new();
        mods.set_value(crate::dsp::modulation::BIPOLAR_MOD, 1.0);
        core.update(&params, &shared, &mods, 0.0);
        // +12 semitones at full bipolar mod
        assert_relative_eq!(core.osc_clock.frequency_hz, 880.0, epsilon = 1e-6);
    }
}
