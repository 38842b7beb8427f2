//! PCM sample playback core: selects a multi-sample zone by modulated
//! pitch, then reads it with linear interpolation under the configured
//! loop policy. Pitchless patches (drum loops, slices) always read at
//! increment 1.0.

use super::{modulated_oscillator_frequency, pitch_mod_semitones, OscSharedContext};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::functions::{calculate_pan_values, db_to_raw};
use crate::dsp::modulation::{ModArray, UNIQUE_MOD};
use crate::dsp::synthesis::{PcmSample, PcmSampleSource, SampleLoopMode};
use crate::midi::MidiNoteEvent;
use crate::params::{OscParams, PcmLoopMode};
use std::sync::Arc;

pub struct PcmCore {
    sample_rate: f64,
    midi_pitch: f64,
    read_index: f64,
    phase_inc: f64,
    selected_sample: Option<Arc<PcmSample>>,
    loop_mode: SampleLoopMode,
    output_amplitude: f64,
    pan_left_gain: f64,
    pan_right_gain: f64,
    note_is_on: bool,
}

impl Default for PcmCore {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            midi_pitch: 440.0,
            read_index: -1.0,
            phase_inc: 0.0,
            selected_sample: None,
            loop_mode: SampleLoopMode::Sustain,
            output_amplitude: 1.0,
            pan_left_gain: 0.707,
            pan_right_gain: 0.707,
            note_is_on: false,
        }
    }
}

fn to_sample_loop_mode(mode: PcmLoopMode) -> SampleLoopMode {
    match mode {
        PcmLoopMode::Sustain => SampleLoopMode::Sustain,
        PcmLoopMode::Loop => SampleLoopMode::Loop,
        PcmLoopMode::OneShot => SampleLoopMode::OneShot,
    }
}

impl PcmCore {
    pub fn reset(&mut self, params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.read_index = -1.0;
        self.selected_sample = None;
        self.loop_mode = to_sample_loop_mode(params.pcm_loop_mode);
        self.note_is_on = false;
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

        self.loop_mode = to_sample_loop_mode(params.pcm_loop_mode);

        match shared.samples.sample_source(&params.pcm_patch) {
            Some(source) => {
                let (sample, inc) = source.select_sample(oscillator_frequency);
                // zone switching under a held note would click; only track
                // the newly selected zone while the note is starting up
                if self.selected_sample.is_none() {
                    self.selected_sample = sample.cloned();
                }
                self.phase_inc = inc;
            }
            // missing patch: silence, keep running
            None => {
                self.selected_sample = None;
                self.phase_inc = 0.0;
            }
        }

        self.output_amplitude = db_to_raw(params.output_amplitude_db);
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
    ) {
        let Some(sample) = self.selected_sample.clone() else {
            for i in 0..samples_to_process {
                buffers.left_mut()[i] = 0.0;
                buffers.right_mut()[i] = 0.0;
            }
            return;
        };

        // force drums/one-shots to retrigger from the top each time the
        // wave sequencer re-enters the step
        if params.force_loop && self.read_index < 0.0 && self.note_is_on {
            self.read_index = 0.0;
        }

        for i in 0..samples_to_process {
            let out = PcmSampleSource::read_sample(
                &sample,
                self.loop_mode,
                &mut self.read_index,
                self.phase_inc,
            );
            let left = out.left * self.output_amplitude;
            let right = out.right * self.output_amplitude;
            buffers.left_mut()[i] = left * self.pan_left_gain;
            buffers.right_mut()[i] = right * self.pan_right_gain;
        }
    }

    pub fn note_on(&mut self, _params: &OscParams, note_event: &MidiNoteEvent) {
        self.midi_pitch = note_event.midi_pitch;
        self.read_index = 0.0;
        self.selected_sample = None; // re-select for the new pitch
        self.note_is_on = true;
    }

    pub fn note_off(&mut self, _params: &OscParams, _note_event: &MidiNoteEvent) {
        // sustain-mode samples keep reading from their current position
        // through the release; nothing to do here
        self.note_is_on = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::functions::midi_note_to_freq;
    use crate::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
    use crate::midi::{MidiInputData, NUM_MIDI_NOTES};

    const FS: f64 = 48000.0;

    fn ramp_patch(name: &str) -> PcmSampleDatabase {
        const NONE: Option<Arc<PcmSample>> = None;
        let mut set = [NONE; NUM_MIDI_NOTES];
        let sample = Arc::new(PcmSample {
            num_channels: 1,
            sample_rate: FS as u32,
            sample_count: 1000,
            samples: (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect(),
            loop_start: 100,
            loop_end: 900,
            loop_count: 1,
            unity_midi_note: 60,
            unity_pitch_fraction: 0,
            pitchless: false,
        });
        for slot in set.iter_mut() {
            *slot = Some(sample.clone());
        }
        let mut db = PcmSampleDatabase::new();
        db.add_sample_source(Arc::new(PcmSampleSource::from_sample_set(name, set)));
        db
    }

    #[test]
    fn test_unity_note_plays_at_increment_one() {
        let (wavetables, morph_banks) = build_standard_database(FS);
        let samples = ramp_patch("piano");
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
            pcm_patch: "piano".to_string(),
            ..OscParams::default()
        };

        let mut core = PcmCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &MidiNoteEvent::new(midi_note_to_freq(60), 60, 100));
        core.update(&params, &shared, &ModArray::new(), 0.0);
        assert!((core.phase_inc - 1.0).abs() < 1e-9);

        let mut buffer = AudioBuffer::new(64);
        core.render(&params, &shared, &mut buffer, 64);
        // at unity the output must be the source samples verbatim
        for i in 1..10 {
            assert!((buffer.left()[i] - (i as f32 / 1000.0).sin() as f64 * 0.707).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_patch_is_silent() {
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
            pcm_patch: "nothing here".to_string(),
            ..OscParams::default()
        };

        let mut core = PcmCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &MidiNoteEvent::new(440.0, 69, 100));
        core.update(&params, &shared, &ModArray::new(), 0.0);

        let mut buffer = AudioBuffer::new(64);
        core.render(&params, &shared, &mut buffer, 64);
        assert!(buffer.left().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_one_shot_goes_silent_at_end() {
        let (wavetables, morph_banks) = build_standard_database(FS);
        let samples = ramp_patch("hit");
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
            pcm_patch: "hit".to_string(),
            pcm_loop_mode: PcmLoopMode::OneShot,
            ..OscParams::default()
        };

        let mut core = PcmCore::default();
        core.reset(&params, FS);
        core.note_on(&params, &MidiNoteEvent::new(midi_note_to_freq(60), 60, 100));
        core.update(&params, &shared, &ModArray::new(), 0.0);

        let mut buffer = AudioBuffer::new(64);
        // 1000-frame sample: well past the end after 20 blocks
        for _ in 0..20 {
            core.render(&params, &shared, &mut buffer, 64);
        }
        assert_eq!(core.read_index, -1.0);
        core.render(&params, &shared, &mut buffer, 64);
        assert!(buffer.left().iter().all(|&v| v == 0.0));
    }
}
