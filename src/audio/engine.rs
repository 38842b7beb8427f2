//! The core synthesis engine that orchestrates block rendering.
//!
//! The [`SynthEngine`] owns the voice pool, the shared wavetable/PCM
//! databases, and the global MIDI record. Per block it decodes the
//! host's MIDI events, dispatches note on/off to voices under the
//! polyphony mode, renders and sums the active voices, runs the optional
//! ping-pong delay send, and applies the master volume.
//!
//! ## Voice Allocation Strategy
//!
//! When a poly-mode note-on arrives the engine must pick a voice:
//! - If an idle voice exists, the first one wins.
//! - If all voices are busy, the engine **steals the oldest**: every
//!   active voice carries an age timestamp that is incremented on every
//!   note-on anywhere in the pool, so the voice with the largest
//!   timestamp is the one that has been sounding longest. The victim is
//!   handed the event, parks it as a pending steal, and ramps itself
//!   down over the shutdown time before flipping to the new note - no
//!   clicks, no hard cuts.
//!
//! Poly note-off resolution mirrors this: first look for the sounding
//! voice holding that pitch (skipping voices mid-steal), then for a
//! voice whose *pending-steal* pitch matches - a key released during the
//! shutdown crossfade still releases the incoming note. An orphan
//! note-off is dropped.
//!
//! ## Mono, Legato, and Unison Modes
//!
//! **Mono/Legato** use voice 0 only; legato additionally suppresses the
//! envelope restart so overlapping notes glide instead of retriggering.
//! **Unison/UnisonLegato** always engage voices 0..3 on the same pitch,
//! spread by per-voice detune-cents offsets `{0, +D, -D, +0.707 D}` and
//! start phases `{0, 13, -13, 37}` degrees - the assignments are pushed
//! into each voice during the per-block update, before any note lands.
//!
//! ## Parameter Staging
//!
//! Parameters arrive through a lock-free triple buffer: the host/GUI
//! thread writes complete [`SynthParams`] snapshots without ever
//! blocking the audio thread, and the engine reads one consistent
//! snapshot at the top of each render call. A snapshot is only acted on
//! when it actually differs, and the always-on hardwired matrix
//! routings are re-applied to every snapshot so host-side routing edits
//! cannot silence the amp EG -> DCA path.

use crate::audio::buffer::AudioBuffer;
use crate::audio::voice::{Voice, VoiceState};
use crate::dsp::effects::PingPongDelay;
use crate::dsp::functions::db_to_raw;
use crate::dsp::synthesis::{
    build_standard_database, MorphBankData, PcmSampleDatabase, WavetableDatabase,
};
use crate::midi::{
    unipolar_to_midi14_bit, AuxDawData, MidiEvent, MidiInputData, ALL_NOTES_OFF, CONTROL_CHANGE,
    MASTER_VOLUME_LSB, MASTER_VOLUME_MSB, NOTE_OFF, NOTE_ON, NUM_MIDI_NOTES, PITCH_BEND,
};
use crate::params::{SynthFlavor, SynthMode, SynthParams, MAX_VOICES};
use std::path::Path;
use std::sync::Arc;
use triple_buffer::{Input, Output, TripleBuffer};

/// Unison voice allocation: detune scale and start phase per voice slot.
const UNISON_DETUNE_SCALE: [f64; 4] = [0.0, 1.0, -1.0, 0.707];
const UNISON_START_PHASE: [f64; 4] = [0.0, 13.0, -13.0, 37.0];

/// Everything the host hands the engine for one block, and the stereo
/// output it gets back.
pub struct SynthProcessInfo {
    pub bpm: f64,
    pub ts_numerator: f64,
    pub ts_denominator: u32,
    pub absolute_buffer_time_sec: f64,
    pub midi_events: Vec<MidiEvent>,
    pub samples_in_block: usize,
    outputs: AudioBuffer,
}

impl SynthProcessInfo {
    pub fn new(block_size: usize) -> Self {
        Self {
            bpm: 120.0,
            ts_numerator: 4.0,
            ts_denominator: 4,
            absolute_buffer_time_sec: 0.0,
            midi_events: Vec::new(),
            samples_in_block: block_size,
            outputs: AudioBuffer::new(block_size),
        }
    }

    pub fn outputs(&self) -> &AudioBuffer {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut AudioBuffer {
        &mut self.outputs
    }
}

/// Create the parameter channel: the host keeps the `Input`, the engine
/// takes the `Output`.
pub fn create_parameter_buffer() -> (Input<SynthParams>, Output<SynthParams>) {
    TripleBuffer::new(&SynthParams::default()).split()
}

pub struct SynthEngine {
    sample_rate: f64,
    block_size: usize,
    flavor: SynthFlavor,

    midi_input_data: MidiInputData,
    voices: Vec<Voice>,

    wavetable_db: Arc<WavetableDatabase>,
    morph_banks: Arc<Vec<MorphBankData>>,
    pcm_db: Arc<PcmSampleDatabase>,

    params_consumer: Output<SynthParams>,
    current_params: SynthParams,

    ping_pong_delay: PingPongDelay,
}

impl SynthEngine {
    pub fn new(
        sample_rate: f64,
        block_size: usize,
        flavor: SynthFlavor,
        params_consumer: Output<SynthParams>,
    ) -> Self {
        Self::with_voice_count(sample_rate, block_size, flavor, params_consumer, MAX_VOICES)
    }

    pub fn with_voice_count(
        sample_rate: f64,
        block_size: usize,
        flavor: SynthFlavor,
        params_consumer: Output<SynthParams>,
        num_voices: usize,
    ) -> Self {
        let (wavetable_db, morph_banks) = build_standard_database(sample_rate);
        let wavetable_db = Arc::new(wavetable_db);
        let morph_banks = Arc::new(morph_banks);
        let pcm_db = Arc::new(PcmSampleDatabase::new());

        let mut current_params = SynthParams::default();
        Voice::wire_hardwired_routings(&mut current_params.voice.mod_matrix, flavor);

        let mut voices = Vec::with_capacity(num_voices);
        for _ in 0..num_voices {
            voices.push(Voice::new(
                flavor,
                block_size,
                wavetable_db.clone(),
                morph_banks.clone(),
                pcm_db.clone(),
                &current_params.voice,
            ));
        }

        let mut engine = Self {
            sample_rate,
            block_size,
            flavor,
            midi_input_data: MidiInputData::default(),
            voices,
            wavetable_db,
            morph_banks,
            pcm_db,
            params_consumer,
            current_params,
            ping_pong_delay: PingPongDelay::new(block_size),
        };
        engine.reset(sample_rate);
        engine
    }

    pub fn flavor(&self) -> SynthFlavor {
        self.flavor
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Rebuild the sample-rate-dependent databases and reset every voice.
    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;

        let (wavetable_db, morph_banks) = build_standard_database(sample_rate);
        self.wavetable_db = Arc::new(wavetable_db);
        self.morph_banks = Arc::new(morph_banks);

        for voice in &mut self.voices {
            voice.set_databases(
                self.wavetable_db.clone(),
                self.morph_banks.clone(),
                self.pcm_db.clone(),
            );
            voice.reset(&self.current_params.voice, sample_rate);
        }
        self.ping_pong_delay.reset(sample_rate);
        self.apply_engine_params();
    }

    /// One-time hook: parse every subfolder of `sample_folder_path` as a
    /// PCM patch and share the result with the voices.
    pub fn initialize(&mut self, sample_folder_path: &Path) -> bool {
        let mut pcm_db = PcmSampleDatabase::new();
        pcm_db.add_sample_folders(sample_folder_path);
        let loaded = !pcm_db.is_empty();
        self.pcm_db = Arc::new(pcm_db);
        for voice in &mut self.voices {
            voice.set_databases(
                self.wavetable_db.clone(),
                self.morph_banks.clone(),
                self.pcm_db.clone(),
            );
        }
        loaded
    }

    /// Convert the engine-level globals into the MIDI record the voices
    /// read: master volume, pitch-bend sensitivity, master tuning.
    fn apply_engine_params(&mut self) {
        let params = &self.current_params;

        // master volume dB clamps onto the 14-bit -60dB..+12dB map
        let volume_raw = db_to_raw(params.global_volume_db).clamp(0.001, 4.0);
        let unipolar = ((volume_raw - 0.001) / (4.0 - 0.001) * 16383.0).round() as u32;
        let (lsb, msb) = unipolar_to_midi14_bit(unipolar);
        self.midi_input_data.master_volume_lsb = lsb;
        self.midi_input_data.master_volume_msb = msb;

        self.midi_input_data.pitch_bend_sens_coarse =
            params.global_pitch_bend_sens_coarse.min(127);
        self.midi_input_data.pitch_bend_sens_fine = params.global_pitch_bend_sens_fine.min(127);

        // tuning coarse: -64..+63 semitones onto 0..127
        let coarse = (params.global_tuning_coarse.clamp(-64, 63) + 64) as u8;
        self.midi_input_data.master_tune_coarse = coarse;

        // tuning fine: -100..+100 cents onto the 14-bit bipolar pair
        let fine = params.global_tuning_fine.clamp(-100, 100);
        let fine14 = ((fine as f64 / 100.0) * 8191.0).round() as i32 + 8192;
        let (lsb, msb) = unipolar_to_midi14_bit(fine14 as u32);
        self.midi_input_data.master_tune_fine_lsb = lsb;
        self.midi_input_data.master_tune_fine_msb = msb;
    }

    fn maybe_update_params(&mut self) {
        let new_params = self.params_consumer.read();
        if *new_params == self.current_params {
            return;
        }
        self.current_params = new_params.clone();
        // the always-on routings survive any host-side routing edits
        Voice::wire_hardwired_routings(&mut self.current_params.voice.mod_matrix, self.flavor);
        self.apply_engine_params();
    }

    /// Render one block of interleaved voice output into
    /// `synth_process_info.outputs`.
    pub fn render(&mut self, synth_process_info: &mut SynthProcessInfo) {
        synth_process_info.outputs_mut().flush();

        self.maybe_update_params();

        let samples_to_process = synth_process_info.samples_in_block.min(self.block_size);

        self.midi_input_data.aux = AuxDawData {
            bpm: synth_process_info.bpm,
            ts_numerator: synth_process_info.ts_numerator,
            ts_denominator: synth_process_info.ts_denominator,
            absolute_buffer_time_sec: synth_process_info.absolute_buffer_time_sec,
        };

        // unison/legato assignments must be in place before note-ons land
        self.update_voices();

        // all MIDI events land before any audio is rendered
        for i in 0..synth_process_info.midi_events.len() {
            let event = synth_process_info.midi_events[i];
            self.process_midi_event(&event);
        }

        // -6 dB per accumulated voice to keep headroom
        let gain_factor = 0.5;
        for voice in &mut self.voices {
            if voice.is_voice_active() {
                voice.render(
                    &self.current_params.voice,
                    &self.midi_input_data,
                    samples_to_process,
                );
                synth_process_info.outputs_mut().accumulate_from(
                    voice.output_buffers(),
                    samples_to_process,
                    gain_factor,
                );
            }
        }

        if self.current_params.enable_delay_fx {
            self.ping_pong_delay
                .buffers_mut()
                .copy_from(synth_process_info.outputs(), samples_to_process);
            self.ping_pong_delay
                .render(&self.current_params.delay, samples_to_process);
            synth_process_info
                .outputs_mut()
                .copy_from(self.ping_pong_delay.buffers(), samples_to_process);
        }

        self.apply_global_volume(synth_process_info, samples_to_process);
    }

    fn apply_global_volume(&self, synth_process_info: &mut SynthProcessInfo, samples: usize) {
        let global_volume = self.midi_input_data.master_volume_raw();
        let outputs = synth_process_info.outputs_mut();
        let (left, right) = outputs.channels_mut();
        for i in 0..samples.min(left.len()) {
            left[i] *= global_volume;
            right[i] *= global_volume;
        }
    }

    /// Per-block voice housekeeping: unison detune/phase assignment and
    /// user-driven core changes.
    fn update_voices(&mut self) {
        let mode = self.current_params.synth_mode;
        let unison = matches!(mode, SynthMode::Unison | SynthMode::UnisonLegato);
        let detune = self.current_params.global_unison_detune_cents;

        for (i, voice) in self.voices.iter_mut().enumerate() {
            let (unison_detune, unison_phase) = if unison && i < UNISON_DETUNE_SCALE.len() {
                (detune * UNISON_DETUNE_SCALE[i], UNISON_START_PHASE[i])
            } else {
                (0.0, 0.0)
            };
            voice.update(&self.current_params.voice, mode, unison_detune, unison_phase);
        }
    }

    /// Decode one MIDI message: note on/off goes to voices under the
    /// polyphony policy, everything else lands in the shared MIDI record.
    pub fn process_midi_event(&mut self, event: &MidiEvent) {
        let params_enable_notes = self.current_params.enable_midi_note_events;

        if params_enable_notes && event.message == NOTE_ON {
            self.midi_input_data.current_note = event.data1;
            self.midi_input_data.current_velocity = event.data2;

            match self.current_params.synth_mode {
                SynthMode::Mono | SynthMode::Legato => {
                    self.dispatch_to_voice(0, event);
                }
                SynthMode::Unison | SynthMode::UnisonLegato => {
                    for i in 0..4.min(self.voices.len()) {
                        self.dispatch_to_voice(i, event);
                    }
                }
                SynthMode::Poly => {
                    let voice_index = self
                        .free_voice_index()
                        .or_else(|| self.voice_index_to_steal());
                    if let Some(index) = voice_index {
                        self.dispatch_to_voice(index, event);
                    }
                    // note-on is dropped when the pool is empty

                    // age every sounding voice so "oldest" stays defined
                    for voice in &mut self.voices {
                        if voice.is_voice_active() {
                            voice.increment_timestamp();
                        }
                    }
                }
            }

            self.midi_input_data.last_note = event.data1;
            self.midi_input_data.last_velocity = event.data2;
        } else if params_enable_notes && event.message == NOTE_OFF {
            match self.current_params.synth_mode {
                SynthMode::Mono | SynthMode::Legato => {
                    if self.voices[0].is_voice_active() {
                        self.dispatch_to_voice(0, event);
                    }
                }
                SynthMode::Unison | SynthMode::UnisonLegato => {
                    for i in 0..4.min(self.voices.len()) {
                        self.dispatch_to_voice(i, event);
                    }
                }
                SynthMode::Poly => {
                    // the sounding voice first; during a shutdown
                    // crossfade the note-off belongs to the incoming note
                    let voice_index = self
                        .active_voice_index_in_note_on(event.data1)
                        .or_else(|| self.stealing_voice_index_in_note_on(event.data1));
                    if let Some(index) = voice_index {
                        self.dispatch_to_voice(index, event);
                    }
                    // an orphan note-off is dropped
                }
            }
        } else if event.message == PITCH_BEND {
            self.midi_input_data.pitch_bend_lsb = event.data1;
            self.midi_input_data.pitch_bend_msb = event.data2;
        } else if event.message == CONTROL_CHANGE {
            self.midi_input_data.set_cc(event.data1, event.data2);

            match event.data1 {
                ALL_NOTES_OFF => self.all_notes_off(),
                MASTER_VOLUME_LSB => self.midi_input_data.master_volume_lsb = event.data2,
                MASTER_VOLUME_MSB => self.midi_input_data.master_volume_msb = event.data2,
                _ => {}
            }
        }
    }

    fn dispatch_to_voice(&mut self, index: usize, event: &MidiEvent) {
        let params = &self.current_params.voice;
        let midi = &self.midi_input_data;
        self.voices[index].process_midi_event(event, params, midi);
    }

    /// Synthesized note-off at velocity zero for every pitch on every
    /// voice.
    fn all_notes_off(&mut self) {
        for note in 0..NUM_MIDI_NOTES as u8 {
            let off = MidiEvent::note_off(note, 0);
            for voice in &mut self.voices {
                if voice.is_voice_active() {
                    voice.do_note_off(&off, &self.current_params.voice, &self.midi_input_data);
                }
            }
        }
    }

    /// First inactive voice.
    fn free_voice_index(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_voice_active())
    }

    /// The voice to steal: the largest age timestamp (the oldest note);
    /// ties go to the lowest voice index.
    fn voice_index_to_steal(&self) -> Option<usize> {
        let mut index = None;
        let mut oldest: i64 = -1;
        for (i, voice) in self.voices.iter().enumerate() {
            let timestamp = voice.timestamp() as i64;
            if timestamp > oldest {
                oldest = timestamp;
                index = Some(i);
            }
        }
        index
    }

    /// The sounding voice holding a note (and not already being stolen).
    fn active_voice_index_in_note_on(&self, note: u8) -> Option<usize> {
        self.voices.iter().position(|v| {
            v.is_voice_active()
                && v.voice_state() == VoiceState::NoteOn
                && !v.voice_is_stealing()
                && v.midi_note_number() == note
        })
    }

    /// A voice whose pending-steal note matches (released key during the
    /// shutdown crossfade).
    fn stealing_voice_index_in_note_on(&self, note: u8) -> Option<usize> {
        self.voices.iter().position(|v| {
            v.is_voice_active()
                && v.voice_state() == VoiceState::NoteOn
                && v.voice_is_stealing()
                && v.steal_midi_note_number() == note
        })
    }

    pub fn midi_input_data(&self) -> &MidiInputData {
        &self.midi_input_data
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::EgState;
    use crate::params::{EgParams, SHUTDOWN_TIME_MSEC};

    const FS: f64 = 48000.0;
    const BLOCK: usize = 64;

    fn engine_with(params: SynthParams, num_voices: usize) -> SynthEngine {
        let (mut input, output) = create_parameter_buffer();
        input.write(params);
        SynthEngine::with_voice_count(FS, BLOCK, SynthFlavor::Wavetable, output, num_voices)
    }

    fn fast_params(mode: SynthMode) -> SynthParams {
        let mut params = SynthParams::default();
        params.synth_mode = mode;
        params.voice.amp_eg = EgParams {
            attack_time_msec: 5.0,
            decay_time_msec: 0.0,
            sustain_level: 1.0,
            release_time_msec: 5.0,
            ..EgParams::default()
        };
        params
    }

    fn render_blocks(engine: &mut SynthEngine, info: &mut SynthProcessInfo, blocks: usize) -> f64 {
        let mut energy = 0.0;
        for _ in 0..blocks {
            engine.render(info);
            info.midi_events.clear();
            energy += info
                .outputs()
                .left()
                .iter()
                .map(|v| v * v)
                .sum::<f64>();
        }
        energy
    }

    #[test]
    fn test_mono_note_on_off_lifecycle() {
        // mono mode, 5 ms attack / 5 ms release
        let mut engine = engine_with(fast_params(SynthMode::Mono), 16);
        let mut info = SynthProcessInfo::new(BLOCK);

        info.midi_events.push(MidiEvent::note_on(60, 100));
        let energy = render_blocks(&mut engine, &mut info, 10);
        assert!(engine.voices()[0].is_voice_active());
        assert!(energy > 0.0);
        // envelope reached full sustain inside ~240 samples
        assert_eq!(engine.voices()[0].amp_eg_state(), EgState::Sustain);

        info.midi_events.push(MidiEvent::note_off(60, 0));
        render_blocks(&mut engine, &mut info, 10);
        assert!(!engine.voices()[0].is_voice_active());
    }

    #[test]
    fn test_poly_allocates_free_voices() {
        let mut engine = engine_with(fast_params(SynthMode::Poly), 16);
        let mut info = SynthProcessInfo::new(BLOCK);

        for (i, note) in [60u8, 64, 67].iter().enumerate() {
            info.midi_events.push(MidiEvent::note_on(*note, 100));
            render_blocks(&mut engine, &mut info, 1);
            let active = engine.voices().iter().filter(|v| v.is_voice_active()).count();
            assert_eq!(active, i + 1);
        }
    }

    #[test]
    fn test_poly_overflow_steals_oldest() {
        // 4 voices, 5 distinct notes one block apart: the 5th steals
        let mut engine = engine_with(fast_params(SynthMode::Poly), 4);
        let mut info = SynthProcessInfo::new(BLOCK);

        for note in [60u8, 62, 64, 65] {
            info.midi_events.push(MidiEvent::note_on(note, 100));
            render_blocks(&mut engine, &mut info, 1);
        }
        let active = engine.voices().iter().filter(|v| v.is_voice_active()).count();
        assert_eq!(active, 4);

        // the 5th note steals voice 0 (the oldest, playing note 60)
        info.midi_events.push(MidiEvent::note_on(67, 100));
        render_blocks(&mut engine, &mut info, 1);

        let victim = &engine.voices()[0];
        assert!(victim.voice_is_stealing());
        assert_eq!(victim.steal_midi_note_number(), 67);

        // after the shutdown ramp the voice plays the new note
        let shutdown_blocks =
            (SHUTDOWN_TIME_MSEC * FS / 1000.0 / BLOCK as f64).ceil() as usize + 2;
        render_blocks(&mut engine, &mut info, shutdown_blocks);
        let victim = &engine.voices()[0];
        assert!(!victim.voice_is_stealing());
        assert!(victim.is_voice_active());
        assert_eq!(victim.midi_note_number(), 67);

        // still exactly MAX_VOICES active
        let active = engine.voices().iter().filter(|v| v.is_voice_active()).count();
        assert_eq!(active, 4);
    }

    #[test]
    fn test_note_off_during_steal_goes_to_incoming_note() {
        let mut engine = engine_with(fast_params(SynthMode::Poly), 2);
        let mut info = SynthProcessInfo::new(BLOCK);

        info.midi_events.push(MidiEvent::note_on(60, 100));
        render_blocks(&mut engine, &mut info, 1);
        info.midi_events.push(MidiEvent::note_on(62, 100));
        render_blocks(&mut engine, &mut info, 1);

        // pool full: the next note steals
        info.midi_events.push(MidiEvent::note_on(64, 100));
        render_blocks(&mut engine, &mut info, 1);
        let stealing = engine
            .voices()
            .iter()
            .position(|v| v.voice_is_stealing())
            .expect("one voice must be stealing");
        assert_eq!(engine.voices()[stealing].steal_midi_note_number(), 64);

        // releasing the incoming note during shutdown must be delivered
        // to the stealing voice (not dropped)
        info.midi_events.push(MidiEvent::note_off(64, 0));
        render_blocks(&mut engine, &mut info, 1);
        assert_eq!(engine.voices()[stealing].voice_state(), VoiceState::NoteOff);
    }

    #[test]
    fn test_unison_engages_four_voices() {
        let mut engine = engine_with(fast_params(SynthMode::Unison), 16);
        let mut info = SynthProcessInfo::new(BLOCK);

        info.midi_events.push(MidiEvent::note_on(60, 100));
        render_blocks(&mut engine, &mut info, 2);

        let active = engine.voices().iter().filter(|v| v.is_voice_active()).count();
        assert_eq!(active, 4);

        info.midi_events.push(MidiEvent::note_off(60, 0));
        render_blocks(&mut engine, &mut info, 10);
        let active = engine.voices().iter().filter(|v| v.is_voice_active()).count();
        assert_eq!(active, 0);
    }

    #[test]
    fn test_all_notes_off_cc() {
        let mut engine = engine_with(fast_params(SynthMode::Poly), 16);
        let mut info = SynthProcessInfo::new(BLOCK);

        for note in [60u8, 64, 67] {
            info.midi_events.push(MidiEvent::note_on(note, 100));
        }
        render_blocks(&mut engine, &mut info, 2);
        assert!(engine.voices().iter().any(|v| v.is_voice_active()));

        info.midi_events
            .push(MidiEvent::new(CONTROL_CHANGE, ALL_NOTES_OFF, 0, 0));
        render_blocks(&mut engine, &mut info, 10);
        assert!(engine.voices().iter().all(|v| !v.is_voice_active()));
    }

    #[test]
    fn test_orphan_note_off_is_dropped() {
        let mut engine = engine_with(fast_params(SynthMode::Poly), 4);
        let mut info = SynthProcessInfo::new(BLOCK);

        info.midi_events.push(MidiEvent::note_on(60, 100));
        render_blocks(&mut engine, &mut info, 1);

        // note-off for a pitch nobody plays: nothing changes
        info.midi_events.push(MidiEvent::note_off(72, 0));
        render_blocks(&mut engine, &mut info, 1);
        assert!(engine.voices()[0].is_voice_active());
        assert_eq!(engine.voices()[0].voice_state(), VoiceState::NoteOn);
    }

    #[test]
    fn test_master_volume_scales_output() {
        let mut quiet_params = fast_params(SynthMode::Mono);
        quiet_params.global_volume_db = -20.0;
        let mut engine_loud = engine_with(fast_params(SynthMode::Mono), 2);
        let mut engine_quiet = engine_with(quiet_params, 2);

        let measure = |engine: &mut SynthEngine| {
            let mut info = SynthProcessInfo::new(BLOCK);
            info.midi_events.push(MidiEvent::note_on(60, 100));
            render_blocks(engine, &mut info, 20)
        };
        let loud = measure(&mut engine_loud);
        let quiet = measure(&mut engine_quiet);
        assert!(loud > quiet * 10.0, "loud={loud} quiet={quiet}");
    }

    #[test]
    fn test_pitch_bend_lands_in_midi_record() {
        let mut engine = engine_with(fast_params(SynthMode::Poly), 2);
        let mut info = SynthProcessInfo::new(BLOCK);
        info.midi_events
            .push(MidiEvent::new(PITCH_BEND, 0x7F, 0x7F, 0));
        render_blocks(&mut engine, &mut info, 1);
        assert!(engine.midi_input_data().pitch_bend_semitones() > 1.9);
    }

    #[test]
    fn test_delay_fx_tail() {
        let mut params = fast_params(SynthMode::Mono);
        params.enable_delay_fx = true;
        params.delay.wet_level_db = 0.0;
        params.delay.left_delay_msec = 20.0;
        params.delay.right_delay_msec = 20.0;
        let mut engine = engine_with(params, 2);
        let mut info = SynthProcessInfo::new(BLOCK);

        // a short note, then silence: the delay keeps ringing
        info.midi_events.push(MidiEvent::note_on(60, 100));
        render_blocks(&mut engine, &mut info, 4);
        info.midi_events.push(MidiEvent::note_off(60, 0));
        render_blocks(&mut engine, &mut info, 10);
        assert!(engine.voices().iter().all(|v| !v.is_voice_active()));

        let tail = render_blocks(&mut engine, &mut info, 10);
        assert!(tail > 0.0, "delay tail must ring after the voice dies");
    }
}
