//! Wave-sequencing oscillator: four internal wavetable oscillators
//! played round-robin as A/B pairs under the wave sequencer's crossfade.
//!
//! # Why Four Oscillators for a Two-Voice Crossfade?
//!
//! At any moment only two oscillators sound: A (the current step) and B
//! (the next step, fading in). But the moment a crossfade completes, B
//! becomes the new A and a *new* B must already be configured for the
//! following step's waveform - possibly on a different core entirely.
//! Retargeting an oscillator (new core, new table, phase reset) is not
//! click-free, so it must happen while that oscillator is silent. Four
//! oscillators rotated round-robin guarantee every retarget lands on an
//! oscillator that is at zero gain, two steps away from sounding again.
//!
//! # The Wave String Map
//!
//! The sequencer's wave lane speaks in flat waveform indices. This
//! module owns the decoder: a map built at reset listing every waveform
//! each wavetable-family core can serve (classic waveforms, then morph
//! banks, then Fourier waveforms). `set_new_osc_wave` looks the index up
//! and gets back which core to select and that core's local wave index.
//!
//! # What the Sequencer Drives
//!
//! All control arrives through this module's modulation inputs, filled
//! by the voice's hardwired matrix rows each block: the A/B mix gains
//! and wave indices, per-step amplitude trims (dB) and pitch offsets
//! (semitones, forwarded into `osc_specific_detune`), the current/next
//! step numbers (used to index the per-step pan / hard-sync / morph /
//! detune tables in [`WsOscParams`]), and the one-shot crossfade-done
//! flag that triggers the pair rotation. A non-negative
//! `solo_wave_index` pins both A and B to one waveform for auditioning.

use super::{OscSharedContext, Oscillator};
use crate::audio::buffer::AudioBuffer;
use crate::dsp::modulation::{
    ModArray, WAVESEQ_AMP_A_MOD, WAVESEQ_AMP_B_MOD, WAVESEQ_PITCH_A_MOD, WAVESEQ_PITCH_B_MOD,
    WAVESEQ_WAVE_A_GAIN_MOD, WAVESEQ_WAVE_B_GAIN_MOD, WAVESEQ_WAVE_INDEX_A_MOD,
    WAVESEQ_WAVE_INDEX_B_MOD, WAVESEQ_XFADE_DONE_MOD, WAVE_STEP_NUMBER_A, WAVE_STEP_NUMBER_B,
};
use crate::dsp::glide::GlideInfo;
use crate::dsp::synthesis::{CLASSIC_WAVEFORMS, MORPH_BANKS};
use crate::midi::MidiNoteEvent;
use crate::params::{
    OscCoreKind, OscParams, WsOscParams, MAX_SEQ_STEPS, MOD_KNOB_B, MOD_KNOB_D,
    NUM_WS_INNER_OSC,
};
use crate::dsp::oscillators::fourier_wt::FOURIER_WAVEFORMS;

/// One selectable waveform: the core that renders it and the core-local
/// wave index.
#[derive(Debug, Clone, Copy)]
struct WaveStringData {
    core: OscCoreKind,
    core_wave_index: usize,
}

pub struct WsOscillator {
    oscillators: Vec<Oscillator>,
    osc_params: Vec<OscParams>,
    mod_in: ModArray,
    buffers: AudioBuffer,
    active_osc: [usize; 2],
    osc_mix_coeff: [f64; NUM_WS_INNER_OSC],
    init_round_robin: bool,
    current_solo_wave: i32,
    wave_string_finder: Vec<WaveStringData>,
    saved_note_event: MidiNoteEvent,
    sample_rate: f64,
}

impl WsOscillator {
    pub fn new(block_size: usize) -> Self {
        let mut osc_params = Vec::with_capacity(NUM_WS_INNER_OSC);
        for _ in 0..NUM_WS_INNER_OSC {
            osc_params.push(OscParams {
                force_loop: true,
                ..OscParams::default()
            });
        }
        Self {
            oscillators: (0..NUM_WS_INNER_OSC)
                .map(|_| Oscillator::new(OscCoreKind::ClassicWt, block_size))
                .collect(),
            osc_params,
            mod_in: ModArray::new(),
            buffers: AudioBuffer::new(block_size),
            active_osc: [0, 1],
            osc_mix_coeff: [0.0; NUM_WS_INNER_OSC],
            init_round_robin: true,
            current_solo_wave: -1,
            wave_string_finder: Vec::new(),
            saved_note_event: MidiNoteEvent::default(),
            sample_rate: 0.0,
        }
    }

    /// Flat waveform list across the wavetable-family cores, in panel
    /// order: classic waveforms, morph banks, Fourier waveforms.
    fn make_wave_string_map(&mut self) {
        self.wave_string_finder.clear();
        for i in 0..CLASSIC_WAVEFORMS.len() {
            self.wave_string_finder.push(WaveStringData {
                core: OscCoreKind::ClassicWt,
                core_wave_index: i,
            });
        }
        for i in 0..MORPH_BANKS.len() {
            self.wave_string_finder.push(WaveStringData {
                core: OscCoreKind::MorphWt,
                core_wave_index: i,
            });
        }
        for i in 0..FOURIER_WAVEFORMS.len() {
            self.wave_string_finder.push(WaveStringData {
                core: OscCoreKind::FourierWt,
                core_wave_index: i,
            });
        }
    }

    pub fn num_waveforms(&self) -> usize {
        self.wave_string_finder.len()
    }

    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.make_wave_string_map();
        for (osc, params) in self.oscillators.iter_mut().zip(self.osc_params.iter()) {
            osc.reset(params, sample_rate);
        }
        self.osc_mix_coeff = [0.0; NUM_WS_INNER_OSC];
        self.active_osc = [0, 1];
        self.init_round_robin = true;
    }

    /// Retarget one oscillator to a waveform from the flat list.
    fn set_new_osc_wave(
        &mut self,
        osc_index: usize,
        wave_index: usize,
        mix_coeff: f64,
        is_wave_a: bool,
        shared: &OscSharedContext<'_>,
    ) {
        if self.wave_string_finder.is_empty() {
            return;
        }
        let wave = self.wave_string_finder[wave_index.min(self.wave_string_finder.len() - 1)];

        let params = &mut self.osc_params[osc_index];
        params.core = wave.core;
        match wave.core {
            OscCoreKind::MorphWt => {
                params.morph_bank = MORPH_BANKS[wave.core_wave_index].to_string();
                params.wave_index = 0;
            }
            _ => params.wave_index = wave.core_wave_index,
        }
        let (pitch_slot, amp_slot) = if is_wave_a {
            (WAVESEQ_PITCH_A_MOD, WAVESEQ_AMP_A_MOD)
        } else {
            (WAVESEQ_PITCH_B_MOD, WAVESEQ_AMP_B_MOD)
        };
        params.osc_specific_detune = self.mod_in.value(pitch_slot);
        params.output_amplitude_db = self.mod_in.value(amp_slot);
        self.osc_mix_coeff[osc_index] = mix_coeff;

        self.oscillators[osc_index].select_core(wave.core, &self.osc_params[osc_index]);
        // the retargeted core needs the running note's pitch
        self.oscillators[osc_index].note_on(
            &self.osc_params[osc_index],
            shared,
            &self.saved_note_event,
        );
    }

    /// Forward the per-step settings to whichever oscillators are active.
    fn update_active_oscillators(&mut self, ws_params: &WsOscParams) {
        let step_a =
            (self.mod_in.value(WAVE_STEP_NUMBER_A) as usize).min(MAX_SEQ_STEPS - 1);
        let step_b =
            (self.mod_in.value(WAVE_STEP_NUMBER_B) as usize).min(MAX_SEQ_STEPS - 1);

        for (slot, step) in [(0usize, step_a), (1usize, step_b)] {
            let osc_index = self.active_osc[slot];
            let params = &mut self.osc_params[osc_index];
            params.pan = ws_params.pan[step];
            params.mod_knob[MOD_KNOB_B] = ws_params.hard_sync_knob[step];
            params.mod_knob[MOD_KNOB_D] = ws_params.morph_intensity[step];
            params.coarse_detune = ws_params.detune_semis[step];
            params.fine_detune = ws_params.detune_cents[step];
            params.force_loop = true;
        }
    }

    pub fn update(&mut self, ws_params: &WsOscParams, shared: &OscSharedContext<'_>) {
        let mut wave_a_index = self.mod_in.value(WAVESEQ_WAVE_INDEX_A_MOD).max(0.0) as usize;
        let mut wave_b_index = self.mod_in.value(WAVESEQ_WAVE_INDEX_B_MOD).max(0.0) as usize;
        let osc_a_mix = self.mod_in.value(WAVESEQ_WAVE_A_GAIN_MOD);
        let osc_b_mix = self.mod_in.value(WAVESEQ_WAVE_B_GAIN_MOD);

        // sequencer outputs only exist after its first render, which is
        // after note-on; the first pair is loaded here instead
        if self.init_round_robin {
            self.set_new_osc_wave(self.active_osc[0], wave_a_index, osc_a_mix, true, shared);
            self.set_new_osc_wave(self.active_osc[1], wave_b_index, osc_b_mix, false, shared);
            self.init_round_robin = false;
            self.update_active_oscillators(ws_params);
            return;
        }

        if ws_params.solo_wave_index >= 0 {
            wave_a_index = ws_params.solo_wave_index as usize;
            wave_b_index = wave_a_index;
            if self.current_solo_wave != ws_params.solo_wave_index {
                self.set_new_osc_wave(self.active_osc[0], wave_a_index, osc_a_mix, true, shared);
                self.set_new_osc_wave(self.active_osc[1], wave_b_index, osc_b_mix, false, shared);
                self.update_active_oscillators(ws_params);
            }
            self.current_solo_wave = ws_params.solo_wave_index;
        } else {
            self.current_solo_wave = -1;
        }

        let xfade_done = self.mod_in.value(WAVESEQ_XFADE_DONE_MOD) != 0.0;
        if xfade_done {
            // rotate to the next pair
            self.active_osc[0] = (self.active_osc[0] + 1) % NUM_WS_INNER_OSC;
            self.active_osc[1] = (self.active_osc[1] + 1) % NUM_WS_INNER_OSC;

            self.set_new_osc_wave(self.active_osc[0], wave_a_index, osc_a_mix, true, shared);
            self.set_new_osc_wave(self.active_osc[1], wave_b_index, osc_b_mix, false, shared);
            self.update_active_oscillators(ws_params);
            return;
        }

        // forward the running step values to the sounding pair
        let a = self.active_osc[0];
        self.osc_params[a].osc_specific_detune = self.mod_in.value(WAVESEQ_PITCH_A_MOD);
        self.osc_params[a].output_amplitude_db = self.mod_in.value(WAVESEQ_AMP_A_MOD);
        self.osc_mix_coeff[a] = osc_a_mix;

        let b = self.active_osc[1];
        self.osc_params[b].osc_specific_detune = self.mod_in.value(WAVESEQ_PITCH_B_MOD);
        self.osc_params[b].output_amplitude_db = self.mod_in.value(WAVESEQ_AMP_B_MOD);
        self.osc_mix_coeff[b] = osc_b_mix;

        self.update_active_oscillators(ws_params);
    }

    pub fn render(&mut self, ws_params: &WsOscParams, shared: &OscSharedContext<'_>) {
        self.update(ws_params, shared);

        let samples = shared.samples_to_process;
        for slot in 0..2 {
            let index = self.active_osc[slot];
            self.oscillators[index].render(&self.osc_params[index], shared, None);
        }

        self.buffers.flush();
        for slot in 0..2 {
            let index = self.active_osc[slot];
            let coeff = self.osc_mix_coeff[index];
            self.buffers
                .accumulate_from(self.oscillators[index].buffers(), samples, coeff);
        }
    }

    pub fn note_on(&mut self, shared: &OscSharedContext<'_>, note_event: &MidiNoteEvent) {
        self.saved_note_event = *note_event;
        for i in 0..NUM_WS_INNER_OSC {
            self.oscillators[i].note_on(&self.osc_params[i], shared, note_event);
        }
        self.init_round_robin = true;
    }

    pub fn note_off(&mut self, note_event: &MidiNoteEvent) {
        for i in 0..NUM_WS_INNER_OSC {
            self.oscillators[i].note_off(&self.osc_params[i], note_event);
        }
    }

    pub fn start_glide_modulation(&mut self, glide_info: GlideInfo) {
        // the first pair in the sequence carries the glide
        self.oscillators[0].start_glide_modulation(glide_info);
        self.oscillators[1].start_glide_modulation(glide_info);
    }

    pub fn buffers(&self) -> &AudioBuffer {
        &self.buffers
    }

    pub fn mod_in(&self) -> &ModArray {
        &self.mod_in
    }

    pub fn mod_in_mut(&mut self) -> &mut ModArray {
        &mut self.mod_in
    }

    /// Modulation inputs of one internal oscillator (matrix targets for
    /// fo / unique / morph destinations).
    pub fn inner_osc_mod_in_mut(&mut self, index: usize) -> &mut ModArray {
        self.oscillators[index.min(NUM_WS_INNER_OSC - 1)].mod_in_mut()
    }

    pub fn inner_osc_mod_in(&self, index: usize) -> &ModArray {
        self.oscillators[index.min(NUM_WS_INNER_OSC - 1)].mod_in()
    }

    pub fn active_pair(&self) -> [usize; 2] {
        self.active_osc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
    use crate::midi::MidiInputData;

    const FS: f64 = 48000.0;

    fn note_event() -> MidiNoteEvent {
        MidiNoteEvent::new(220.0, 57, 100)
    }

    #[test]
    fn test_round_robin_rotation_on_xfade_done() {
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
        let ws_params = WsOscParams::default();

        let mut ws = WsOscillator::new(64);
        ws.reset(FS);
        ws.note_on(&shared, &note_event());
        assert_eq!(ws.active_pair(), [0, 1]);

        // first render consumes the init pass
        ws.render(&ws_params, &shared);
        assert_eq!(ws.active_pair(), [0, 1]);

        ws.mod_in_mut().set_value(WAVESEQ_XFADE_DONE_MOD, 1.0);
        ws.render(&ws_params, &shared);
        assert_eq!(ws.active_pair(), [1, 2]);

        ws.mod_in_mut().set_value(WAVESEQ_XFADE_DONE_MOD, 0.0);
        ws.render(&ws_params, &shared);
        assert_eq!(ws.active_pair(), [1, 2]);
    }

    #[test]
    fn test_wave_index_selects_core() {
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
        let ws_params = WsOscParams::default();

        let mut ws = WsOscillator::new(64);
        ws.reset(FS);
        ws.note_on(&shared, &note_event());

        // index past the classic waveforms lands in the morph banks
        let morph_index = CLASSIC_WAVEFORMS.len() as f64;
        ws.mod_in_mut().set_value(WAVESEQ_WAVE_INDEX_A_MOD, morph_index);
        ws.render(&ws_params, &shared);
        assert_eq!(ws.oscillators[0].core_kind(), OscCoreKind::MorphWt);
        assert_eq!(ws.osc_params[0].morph_bank, MORPH_BANKS[0]);
    }

    #[test]
    fn test_mix_gains_follow_sequencer() {
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
        let ws_params = WsOscParams::default();

        let mut ws = WsOscillator::new(64);
        ws.reset(FS);
        ws.note_on(&shared, &note_event());
        ws.render(&ws_params, &shared); // init pass

        ws.mod_in_mut().set_value(WAVESEQ_WAVE_A_GAIN_MOD, 0.8);
        ws.mod_in_mut().set_value(WAVESEQ_WAVE_B_GAIN_MOD, 0.6);
        ws.render(&ws_params, &shared);
        assert_eq!(ws.osc_mix_coeff[0], 0.8);
        assert_eq!(ws.osc_mix_coeff[1], 0.6);
    }
}
