//! Single voice implementation for polyphonic synthesis.
//!
//! A [`Voice`] is one complete mini-synthesizer: it plays one note at a
//! time, and the engine pre-allocates a pool of them. Each voice owns
//! its entire module graph and a private modulation matrix; the only
//! thing voices share is the read-only wavetable/PCM databases and the
//! engine's MIDI record.
//!
//! # The Module Graph
//!
//! Every voice carries:
//! - **4 oscillators** (selectable cores: classic/morph/Fourier
//!   wavetable, FM operator, plucked string, PCM) or, in the
//!   wave-sequence flavor, **2 wave-sequencing oscillators** plus the
//!   wave sequencer itself
//! - **3 envelope generators** - amp EG (owns the voice lifecycle),
//!   filter EG (hardwired to filter 1 cutoff), aux EG (hardwired to the
//!   morph inputs)
//! - **2 LFOs**, **2 filters** (series or parallel routing), **1 DCA**
//! - **1 modulation matrix** routing the above into each other
//!
//! # Render Order Within a Block
//!
//! The per-block discipline is fixed: modulators first (LFOs, EGs, and
//! the wave sequencer), then `mod_matrix.run()` moves every source slot
//! value into its destination slots, then the audio path renders -
//! oscillators into the mix bus (summed at 1/4 with a DC blocker, or an
//! FM algorithm graph, or the WS pair at 1/2 each), the filter pair
//! (series: mix -> f1 -> f2; parallel: both fed from the mix and summed
//! at 1/2), and finally the DCA into the voice output buffer. Modulation
//! is therefore always one block "fresh": nothing the matrix writes this
//! block is read before it is written.
//!
//! # Voice Lifecycle: Birth, Life, Death
//!
//! 1. **Idle** - inactive, age timestamp zero, waiting for a note
//! 2. **Note on** - `do_note_on()` computes the 12-TET pitch, starts the
//!    glide modulators, fans the event out to every module, and marks
//!    the voice active
//! 3. **Note off** - `do_note_off()` forwards the event; the voice stays
//!    active while the amp EG releases
//! 4. **Retirement** - the voice goes inactive exactly when the amp EG
//!    reaches `Off`; the voice checks this at the end of every render
//!
//! # Voice Stealing and the Pending Steal
//!
//! A note-on landing on an already-active (non-legato) voice does not
//! restart it. Instead the event is parked as a *pending steal* and the
//! amp EG is sent into its shutdown ramp - a few milliseconds to zero so
//! the old note never clicks off. When the ramp reaches `Off`, the
//! render loop consumes the parked event atomically: note-off for the
//! old note, note-on for the new one, all inside the same block. While
//! the ramp runs the voice still reports its old note number, and a
//! note-off arriving for the *incoming* pitch is delivered here too
//! (see the engine's release resolution).

use crate::audio::buffer::AudioBuffer;
use crate::audio::dca::Dca;
use crate::dsp::envelope::{EgState, EnvelopeGenerator};
use crate::dsp::filter::SynthFilter;
use crate::dsp::functions::midi_note_to_freq;
use crate::dsp::glide::GlideInfo;
use crate::dsp::lfo::Lfo;
use crate::dsp::modulation::{
    matrix::{ModDestination, ModSource, NUM_MOD_DESTINATIONS, NUM_MOD_SOURCES},
    ModMatrix, ModMatrixParams, ModModule, ModSlotRef, ModTransform, BIPOLAR_MOD,
    EG_BIASED_OUTPUT, EG_MOD, EG_NORMAL_OUTPUT, LFO_INVERTED_OUTPUT, LFO_NORMAL_OUTPUT,
    MAX_DOWN_AMP_MOD, PAN_MOD, SHAPE_MOD, TRIGGER_MOD, UNIQUE_MOD, WAVESEQ_AMP_A_MOD,
    WAVESEQ_AMP_B_MOD, WAVESEQ_PITCH_A_MOD, WAVESEQ_PITCH_B_MOD, WAVESEQ_WAVE_A_GAIN_MOD,
    WAVESEQ_WAVE_B_GAIN_MOD, WAVESEQ_WAVE_INDEX_A_MOD, WAVESEQ_WAVE_INDEX_B_MOD,
    WAVESEQ_XFADE_DONE_MOD, WAVE_MORPH_MOD, WAVE_STEP_NUMBER_A, WAVE_STEP_NUMBER_B,
    WS_PITCH_MOD_A, WS_PITCH_MOD_B, WS_STEP_SEQ_MOD, WS_WAVE_AMP_MOD_A, WS_WAVE_AMP_MOD_B,
    WS_WAVE_INDEX_A, WS_WAVE_INDEX_B, WS_WAVE_MIX_A, WS_WAVE_MIX_B, WS_WAVE_STEP_NUMBER_A,
    WS_WAVE_STEP_NUMBER_B, WS_XFADE_DONE,
};
use crate::dsp::oscillators::{ws_oscillator::WsOscillator, OscSharedContext, Oscillator};
use crate::dsp::sequencer::WaveSequencer;
use crate::dsp::synthesis::{MorphBankData, PcmSampleDatabase, WavetableDatabase};
use crate::midi::{MidiEvent, MidiInputData, MidiNoteEvent, NOTE_OFF, NOTE_ON};
use crate::params::{
    FilterRouting, FmAlgorithm, OscCoreKind, SynthFlavor, SynthMode, VoiceParams, NUM_FILTER,
    NUM_LFO, NUM_OSC, NUM_WS_OSC,
};
use std::sync::Arc;

/// Note state while the voice is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    NoteOn,
    #[default]
    NoteOff,
}

/// One-pole DC blocker for the oscillator mix bus.
#[derive(Debug, Clone, Copy, Default)]
struct DcBlocker {
    x1: f64,
    y1: f64,
}

impl DcBlocker {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    #[inline]
    fn process(&mut self, xn: f64) -> f64 {
        let yn = xn - self.x1 + 0.995 * self.y1;
        self.x1 = xn;
        self.y1 = yn;
        yn
    }
}

pub struct Voice {
    flavor: SynthFlavor,
    block_size: usize,
    sample_rate: f64,

    lfo: Vec<Lfo>,
    amp_eg: EnvelopeGenerator,
    filter_eg: EnvelopeGenerator,
    aux_eg: EnvelopeGenerator,
    filter: Vec<SynthFilter>,
    oscillators: Vec<Oscillator>,
    ws_oscillators: Vec<WsOscillator>,
    wave_sequencer: WaveSequencer,
    dca: Dca,
    mod_matrix: ModMatrix,

    mix_buffers: AudioBuffer,
    output_buffers: AudioBuffer,
    fm_scratch: AudioBuffer,
    dc_filter: [DcBlocker; 2],

    // shared read-only databases
    wavetable_db: Arc<WavetableDatabase>,
    morph_banks: Arc<Vec<MorphBankData>>,
    pcm_db: Arc<PcmSampleDatabase>,

    // note state
    timestamp: u32,
    current_midi_note: i32,
    voice_is_active: bool,
    voice_note_state: VoiceState,
    voice_midi_event: MidiEvent,
    steal_pending: bool,
    voice_steal_midi_event: MidiEvent,

    // per-block engine-driven settings
    unison_detune_cents: f64,
    unison_start_phase: f64,
    legato_mode: bool,
}

impl Voice {
    pub fn new(
        flavor: SynthFlavor,
        block_size: usize,
        wavetable_db: Arc<WavetableDatabase>,
        morph_banks: Arc<Vec<MorphBankData>>,
        pcm_db: Arc<PcmSampleDatabase>,
        params: &VoiceParams,
    ) -> Self {
        let default_core = match flavor {
            SynthFlavor::Wavetable | SynthFlavor::WaveSequence => OscCoreKind::ClassicWt,
            SynthFlavor::Fm => OscCoreKind::FmOp,
            SynthFlavor::Pluck => OscCoreKind::KarplusStrong,
            SynthFlavor::Sampler => OscCoreKind::Pcm,
        };

        let mut voice = Self {
            flavor,
            block_size,
            sample_rate: 0.0,
            lfo: (0..NUM_LFO).map(|i| Lfo::new(params.lfo[i].core)).collect(),
            amp_eg: EnvelopeGenerator::new(params.amp_eg.core),
            filter_eg: EnvelopeGenerator::new(params.filter_eg.core),
            aux_eg: EnvelopeGenerator::new(params.aux_eg.core),
            filter: (0..NUM_FILTER)
                .map(|i| SynthFilter::new(params.filter[i].core, block_size))
                .collect(),
            oscillators: (0..NUM_OSC)
                .map(|_| Oscillator::new(default_core, block_size))
                .collect(),
            ws_oscillators: match flavor {
                SynthFlavor::WaveSequence => {
                    (0..NUM_WS_OSC).map(|_| WsOscillator::new(block_size)).collect()
                }
                _ => Vec::new(),
            },
            wave_sequencer: WaveSequencer::new(),
            dca: Dca::new(block_size),
            mod_matrix: ModMatrix::new(),
            mix_buffers: AudioBuffer::new(block_size),
            output_buffers: AudioBuffer::new(block_size),
            fm_scratch: AudioBuffer::new(block_size),
            dc_filter: [DcBlocker::default(); 2],
            wavetable_db,
            morph_banks,
            pcm_db,
            timestamp: 0,
            current_midi_note: -1,
            voice_is_active: false,
            voice_note_state: VoiceState::NoteOff,
            voice_midi_event: MidiEvent::default(),
            steal_pending: false,
            voice_steal_midi_event: MidiEvent::default(),
            unison_detune_cents: 0.0,
            unison_start_phase: 0.0,
            legato_mode: false,
        };
        voice.initialize_mod_matrix();
        voice
    }

    /// Wire the matrix bindings: which module slot each source row and
    /// destination column talks to. The routing program itself lives in
    /// the voice parameters.
    fn initialize_mod_matrix(&mut self) {
        use ModDestination as D;
        use ModSource as S;

        self.mod_matrix.clear_matrix_arrays();

        let m = &mut self.mod_matrix;
        m.add_mod_source(S::Lfo1Norm, ModSlotRef::new(ModModule::Lfo(0), LFO_NORMAL_OUTPUT));
        m.add_mod_source(S::Lfo1Inv, ModSlotRef::new(ModModule::Lfo(0), LFO_INVERTED_OUTPUT));
        m.add_mod_source(S::Lfo2Norm, ModSlotRef::new(ModModule::Lfo(1), LFO_NORMAL_OUTPUT));
        m.add_mod_source(S::Lfo2Inv, ModSlotRef::new(ModModule::Lfo(1), LFO_INVERTED_OUTPUT));
        m.add_mod_source(S::AmpEgNorm, ModSlotRef::new(ModModule::AmpEg, EG_NORMAL_OUTPUT));
        m.add_mod_source(S::AmpEgBias, ModSlotRef::new(ModModule::AmpEg, EG_BIASED_OUTPUT));
        m.add_mod_source(S::FilterEgNorm, ModSlotRef::new(ModModule::FilterEg, EG_NORMAL_OUTPUT));
        m.add_mod_source(S::FilterEgBias, ModSlotRef::new(ModModule::FilterEg, EG_BIASED_OUTPUT));
        m.add_mod_source(S::AuxEgNorm, ModSlotRef::new(ModModule::AuxEg, EG_NORMAL_OUTPUT));
        m.add_mod_source(S::AuxEgBias, ModSlotRef::new(ModModule::AuxEg, EG_BIASED_OUTPUT));

        m.add_mod_destination(D::Lfo1Fo, ModSlotRef::new(ModModule::Lfo(0), BIPOLAR_MOD), ModTransform::None);
        m.add_mod_destination(D::Lfo2Fo, ModSlotRef::new(ModModule::Lfo(1), BIPOLAR_MOD), ModTransform::None);

        m.add_mod_destination(D::DcaEgMod, ModSlotRef::new(ModModule::Dca, EG_MOD), ModTransform::None);
        m.add_mod_destination(D::DcaAmpMod, ModSlotRef::new(ModModule::Dca, MAX_DOWN_AMP_MOD), ModTransform::None);
        m.add_mod_destination(D::DcaPanMod, ModSlotRef::new(ModModule::Dca, PAN_MOD), ModTransform::None);

        m.add_mod_destination(D::Filter1FcEg, ModSlotRef::new(ModModule::Filter(0), EG_MOD), ModTransform::None);
        m.add_mod_destination(D::Filter1FcBipolar, ModSlotRef::new(ModModule::Filter(0), BIPOLAR_MOD), ModTransform::None);
        m.add_mod_destination(D::Filter2FcEg, ModSlotRef::new(ModModule::Filter(1), EG_MOD), ModTransform::None);
        m.add_mod_destination(D::Filter2FcBipolar, ModSlotRef::new(ModModule::Filter(1), BIPOLAR_MOD), ModTransform::None);

        m.add_mod_destination(D::AmpEgRetrigger, ModSlotRef::new(ModModule::AmpEg, TRIGGER_MOD), ModTransform::UnipolarToBipolar);

        if self.flavor == SynthFlavor::WaveSequence {
            // oscillator pitch/unique/morph columns address the eight
            // wavetable oscillators inside the two WS oscillators
            let fo = [D::Osc1Fo, D::Osc2Fo, D::Osc3Fo, D::Osc4Fo, D::Osc5Fo, D::Osc6Fo, D::Osc7Fo, D::Osc8Fo];
            let unique = [D::Osc1Mod, D::Osc2Mod, D::Osc3Mod, D::Osc4Mod, D::Osc5Mod, D::Osc6Mod, D::Osc7Mod, D::Osc8Mod];
            let morph = [D::Osc1Morph, D::Osc2Morph, D::Osc3Morph, D::Osc4Morph, D::Osc5Morph, D::Osc6Morph, D::Osc7Morph, D::Osc8Morph];
            for ws in 0..NUM_WS_OSC {
                for inner in 0..4 {
                    let index = ws * 4 + inner;
                    let module = ModModule::WsInnerOsc { ws, inner };
                    m.add_mod_destination(fo[index], ModSlotRef::new(module, BIPOLAR_MOD), ModTransform::None);
                    m.add_mod_destination(unique[index], ModSlotRef::new(module, UNIQUE_MOD), ModTransform::None);
                    m.add_mod_destination(morph[index], ModSlotRef::new(module, WAVE_MORPH_MOD), ModTransform::None);
                }
            }

            // sequencer outputs are matrix sources...
            m.add_mod_source(S::WsWaveMixA, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_MIX_A));
            m.add_mod_source(S::WsWaveMixB, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_MIX_B));
            m.add_mod_source(S::WsWaveIndexA, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_INDEX_A));
            m.add_mod_source(S::WsWaveIndexB, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_INDEX_B));
            m.add_mod_source(S::WsWaveAmpA, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_AMP_MOD_A));
            m.add_mod_source(S::WsWaveAmpB, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_AMP_MOD_B));
            m.add_mod_source(S::WsPitchA, ModSlotRef::new(ModModule::WaveSequencer, WS_PITCH_MOD_A));
            m.add_mod_source(S::WsPitchB, ModSlotRef::new(ModModule::WaveSequencer, WS_PITCH_MOD_B));
            m.add_mod_source(S::WsStepSeqMod, ModSlotRef::new(ModModule::WaveSequencer, WS_STEP_SEQ_MOD));
            m.add_mod_source(S::WsXfadeDone, ModSlotRef::new(ModModule::WaveSequencer, WS_XFADE_DONE));
            m.add_mod_source(S::WsStepNumberA, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_STEP_NUMBER_A));
            m.add_mod_source(S::WsStepNumberB, ModSlotRef::new(ModModule::WaveSequencer, WS_WAVE_STEP_NUMBER_B));

            // ...and land in the WS oscillators' module inputs
            let osc1_dests = [
                (D::Osc1WsWaveMixA, WAVESEQ_WAVE_A_GAIN_MOD),
                (D::Osc1WsWaveMixB, WAVESEQ_WAVE_B_GAIN_MOD),
                (D::Osc1WsWaveIndexA, WAVESEQ_WAVE_INDEX_A_MOD),
                (D::Osc1WsWaveIndexB, WAVESEQ_WAVE_INDEX_B_MOD),
                (D::Osc1WsWaveAmpA, WAVESEQ_AMP_A_MOD),
                (D::Osc1WsWaveAmpB, WAVESEQ_AMP_B_MOD),
                (D::Osc1WsWavePitchA, WAVESEQ_PITCH_A_MOD),
                (D::Osc1WsWavePitchB, WAVESEQ_PITCH_B_MOD),
                (D::Osc1WsXFadeDone, WAVESEQ_XFADE_DONE_MOD),
            ];
            for (dest, slot) in osc1_dests {
                m.add_mod_destination(dest, ModSlotRef::new(ModModule::WsOsc(0), slot), ModTransform::None);
            }
            let osc2_dests = [
                (D::Osc2WsWaveMixA, WAVESEQ_WAVE_A_GAIN_MOD),
                (D::Osc2WsWaveMixB, WAVESEQ_WAVE_B_GAIN_MOD),
                (D::Osc2WsWaveIndexA, WAVESEQ_WAVE_INDEX_A_MOD),
                (D::Osc2WsWaveIndexB, WAVESEQ_WAVE_INDEX_B_MOD),
                (D::Osc2WsWaveAmpA, WAVESEQ_AMP_A_MOD),
                (D::Osc2WsWaveAmpB, WAVESEQ_AMP_B_MOD),
                (D::Osc2WsWavePitchA, WAVESEQ_PITCH_A_MOD),
                (D::Osc2WsWavePitchB, WAVESEQ_PITCH_B_MOD),
                (D::Osc2WsXFadeDone, WAVESEQ_XFADE_DONE_MOD),
            ];
            for (dest, slot) in osc2_dests {
                m.add_mod_destination(dest, ModSlotRef::new(ModModule::WsOsc(1), slot), ModTransform::None);
            }

            m.add_mod_destination(D::WsStepNumberA1, ModSlotRef::new(ModModule::WsOsc(0), WAVE_STEP_NUMBER_A), ModTransform::None);
            m.add_mod_destination(D::WsStepNumberA2, ModSlotRef::new(ModModule::WsOsc(1), WAVE_STEP_NUMBER_A), ModTransform::None);
            m.add_mod_destination(D::WsStepNumberB1, ModSlotRef::new(ModModule::WsOsc(0), WAVE_STEP_NUMBER_B), ModTransform::None);
            m.add_mod_destination(D::WsStepNumberB2, ModSlotRef::new(ModModule::WsOsc(1), WAVE_STEP_NUMBER_B), ModTransform::None);

            m.add_mod_destination(D::FilterEgRetrigger, ModSlotRef::new(ModModule::FilterEg, TRIGGER_MOD), ModTransform::UnipolarToBipolar);
            m.add_mod_destination(D::AuxEgRetrigger, ModSlotRef::new(ModModule::AuxEg, TRIGGER_MOD), ModTransform::UnipolarToBipolar);
        } else {
            let fo = [D::Osc1Fo, D::Osc2Fo, D::Osc3Fo, D::Osc4Fo];
            let unique = [D::Osc1Mod, D::Osc2Mod, D::Osc3Mod, D::Osc4Mod];
            let morph = [D::Osc1Morph, D::Osc2Morph, D::Osc3Morph, D::Osc4Morph];
            let shape = [D::Osc1Shape, D::Osc2Shape, D::Osc3Shape, D::Osc4Shape];
            for i in 0..NUM_OSC {
                let module = ModModule::Osc(i);
                m.add_mod_destination(fo[i], ModSlotRef::new(module, BIPOLAR_MOD), ModTransform::None);
                m.add_mod_destination(unique[i], ModSlotRef::new(module, UNIQUE_MOD), ModTransform::None);
                m.add_mod_destination(morph[i], ModSlotRef::new(module, WAVE_MORPH_MOD), ModTransform::None);
                m.add_mod_destination(shape[i], ModSlotRef::new(module, SHAPE_MOD), ModTransform::None);
            }
        }
    }

    /// Ensure the always-on routings exist in the routing program:
    /// amp EG into the DCA, filter EG into filter 1, aux EG into every
    /// morph input, and in the wave-sequence flavor the whole
    /// sequencer-to-oscillator harness. Idempotent.
    pub fn wire_hardwired_routings(params: &mut ModMatrixParams, flavor: SynthFlavor) {
        use ModDestination as D;
        use ModSource as S;

        params.set_hardwired_routing(S::AmpEgNorm, D::DcaEgMod);
        params.set_dest_default_value(D::DcaAmpMod, 1.0);
        params.set_hardwired_routing(S::FilterEgNorm, D::Filter1FcEg);

        params.set_hardwired_routing(S::AuxEgNorm, D::Osc1Morph);
        params.set_hardwired_routing(S::AuxEgNorm, D::Osc2Morph);
        params.set_hardwired_routing(S::AuxEgNorm, D::Osc3Morph);
        params.set_hardwired_routing(S::AuxEgNorm, D::Osc4Morph);

        if flavor == SynthFlavor::WaveSequence {
            params.set_hardwired_routing(S::AuxEgNorm, D::Osc5Morph);
            params.set_hardwired_routing(S::AuxEgNorm, D::Osc6Morph);
            params.set_hardwired_routing(S::AuxEgNorm, D::Osc7Morph);
            params.set_hardwired_routing(S::AuxEgNorm, D::Osc8Morph);

            for (source, dest) in [
                (S::WsWaveMixA, D::Osc1WsWaveMixA),
                (S::WsWaveMixB, D::Osc1WsWaveMixB),
                (S::WsWaveIndexA, D::Osc1WsWaveIndexA),
                (S::WsWaveIndexB, D::Osc1WsWaveIndexB),
                (S::WsWaveAmpA, D::Osc1WsWaveAmpA),
                (S::WsWaveAmpB, D::Osc1WsWaveAmpB),
                (S::WsPitchA, D::Osc1WsWavePitchA),
                (S::WsPitchB, D::Osc1WsWavePitchB),
                (S::WsXfadeDone, D::Osc1WsXFadeDone),
                (S::WsWaveMixA, D::Osc2WsWaveMixA),
                (S::WsWaveMixB, D::Osc2WsWaveMixB),
                (S::WsWaveIndexA, D::Osc2WsWaveIndexA),
                (S::WsWaveIndexB, D::Osc2WsWaveIndexB),
                (S::WsWaveAmpA, D::Osc2WsWaveAmpA),
                (S::WsWaveAmpB, D::Osc2WsWaveAmpB),
                (S::WsPitchA, D::Osc2WsWavePitchA),
                (S::WsPitchB, D::Osc2WsWavePitchB),
                (S::WsXfadeDone, D::Osc2WsXFadeDone),
                (S::WsStepNumberA, D::WsStepNumberA1),
                (S::WsStepNumberA, D::WsStepNumberA2),
                (S::WsStepNumberB, D::WsStepNumberB1),
                (S::WsStepNumberB, D::WsStepNumberB2),
            ] {
                params.set_hardwired_routing(source, dest);
            }
        }
    }

    pub fn reset(&mut self, params: &VoiceParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.current_midi_note = -1;

        self.dc_filter[0].reset();
        self.dc_filter[1].reset();

        for (i, osc) in self.oscillators.iter_mut().enumerate() {
            osc.reset(&params.osc[i], sample_rate);
        }
        for ws in &mut self.ws_oscillators {
            ws.reset(sample_rate);
        }
        self.wave_sequencer.reset(sample_rate);

        for (i, lfo) in self.lfo.iter_mut().enumerate() {
            lfo.reset(&params.lfo[i], sample_rate);
        }
        for filter in &mut self.filter {
            filter.reset(sample_rate);
        }
        self.amp_eg.reset(&params.amp_eg, sample_rate);
        self.filter_eg.reset(&params.filter_eg, sample_rate);
        self.aux_eg.reset(&params.aux_eg, sample_rate);
        self.dca.reset(sample_rate);

        self.voice_is_active = false;
        self.steal_pending = false;
        self.timestamp = 0;
    }

    /// Swap in freshly built shared databases (sample-rate change or a
    /// new sample folder path).
    pub fn set_databases(
        &mut self,
        wavetable_db: Arc<WavetableDatabase>,
        morph_banks: Arc<Vec<MorphBankData>>,
        pcm_db: Arc<PcmSampleDatabase>,
    ) {
        self.wavetable_db = wavetable_db;
        self.morph_banks = morph_banks;
        self.pcm_db = pcm_db;
    }

    /// Per-block derived settings from the engine: unison detune/phase,
    /// legato, and user-driven core swaps.
    pub fn update(
        &mut self,
        params: &VoiceParams,
        synth_mode: SynthMode,
        unison_detune_cents: f64,
        unison_start_phase: f64,
    ) {
        self.unison_detune_cents = unison_detune_cents;
        self.unison_start_phase = unison_start_phase;
        self.legato_mode =
            matches!(synth_mode, SynthMode::Legato | SynthMode::UnisonLegato);

        // user-driven core changes; oscillator cores are only selectable
        // in the wavetable flavor (the other flavors fix the family)
        if self.flavor == SynthFlavor::Wavetable {
            for (i, osc) in self.oscillators.iter_mut().enumerate() {
                if osc.core_kind() != params.osc[i].core {
                    osc.select_core(params.osc[i].core, &params.osc[i]);
                }
            }
        }
        for (i, lfo) in self.lfo.iter_mut().enumerate() {
            if lfo.core_kind() != params.lfo[i].core {
                lfo.select_core(params.lfo[i].core, &params.lfo[i], self.sample_rate);
            }
        }
        if self.amp_eg.core_kind() != params.amp_eg.core {
            self.amp_eg
                .select_core(params.amp_eg.core, &params.amp_eg, self.sample_rate);
        }
        if self.filter_eg.core_kind() != params.filter_eg.core {
            self.filter_eg
                .select_core(params.filter_eg.core, &params.filter_eg, self.sample_rate);
        }
        if self.aux_eg.core_kind() != params.aux_eg.core {
            self.aux_eg
                .select_core(params.aux_eg.core, &params.aux_eg, self.sample_rate);
        }
        for (i, filter) in self.filter.iter_mut().enumerate() {
            if filter.core_kind() != params.filter[i].core {
                filter.select_core(params.filter[i].core, self.sample_rate);
            }
        }
    }

    fn read_mod_slot(&self, slot: ModSlotRef) -> f64 {
        match slot.module {
            ModModule::Lfo(i) => self.lfo[i].mod_out().value(slot.slot),
            ModModule::AmpEg => self.amp_eg.mod_out().value(slot.slot),
            ModModule::FilterEg => self.filter_eg.mod_out().value(slot.slot),
            ModModule::AuxEg => self.aux_eg.mod_out().value(slot.slot),
            ModModule::Osc(i) => self.oscillators[i].mod_out().value(slot.slot),
            ModModule::Filter(i) => self.filter[i].mod_out().value(slot.slot),
            ModModule::Dca => self.dca.mod_out().value(slot.slot),
            ModModule::WaveSequencer => self.wave_sequencer.mod_out().value(slot.slot),
            ModModule::WsOsc(i) => self.ws_oscillators[i].mod_in().value(slot.slot),
            ModModule::WsInnerOsc { ws, inner } => {
                self.ws_oscillators[ws].inner_osc_mod_in(inner).value(slot.slot)
            }
        }
    }

    fn write_mod_slot(&mut self, slot: ModSlotRef, value: f64) {
        match slot.module {
            ModModule::Lfo(i) => self.lfo[i].mod_in_mut().set_value(slot.slot, value),
            ModModule::AmpEg => self.amp_eg.mod_in_mut().set_value(slot.slot, value),
            ModModule::FilterEg => self.filter_eg.mod_in_mut().set_value(slot.slot, value),
            ModModule::AuxEg => self.aux_eg.mod_in_mut().set_value(slot.slot, value),
            ModModule::Osc(i) => self.oscillators[i].mod_in_mut().set_value(slot.slot, value),
            ModModule::Filter(i) => self.filter[i].mod_in_mut().set_value(slot.slot, value),
            ModModule::Dca => self.dca.mod_in_mut().set_value(slot.slot, value),
            ModModule::WaveSequencer => {}
            ModModule::WsOsc(i) => {
                self.ws_oscillators[i].mod_in_mut().set_value(slot.slot, value)
            }
            ModModule::WsInnerOsc { ws, inner } => self.ws_oscillators[ws]
                .inner_osc_mod_in_mut(inner)
                .set_value(slot.slot, value),
        }
    }

    /// Gather source slots, run the matrix, scatter destination slots.
    fn run_mod_matrix(&mut self, params: &VoiceParams) {
        for row in 0..NUM_MOD_SOURCES {
            if let Some(slot) = self.mod_matrix.source_slot(row) {
                let value = self.read_mod_slot(slot);
                self.mod_matrix.set_source_value(row, value);
            }
        }

        self.mod_matrix.run(&params.mod_matrix);

        for col in 0..NUM_MOD_DESTINATIONS {
            if let Some(slot) = self.mod_matrix.dest_slot(col) {
                let value = self.mod_matrix.dest_value_by_col(col);
                self.write_mod_slot(slot, value);
            }
        }
    }

    /// FM operator graph for the selected algorithm. Operator outputs
    /// feed the next operator's phase through a scratch copy of the
    /// source buffer.
    fn render_fm_oscillators(
        &mut self,
        params: &VoiceParams,
        midi: &MidiInputData,
        samples: usize,
    ) {
        macro_rules! render_osc {
            ($index:expr, fm: none) => {{
                let shared = OscSharedContext {
                    midi,
                    wavetables: &self.wavetable_db,
                    samples: &self.pcm_db,
                    morph_banks: &self.morph_banks,
                    unison_detune_cents: self.unison_detune_cents,
                    unison_start_phase: self.unison_start_phase,
                    samples_to_process: samples,
                };
                self.oscillators[$index].render(&params.osc[$index], &shared, None);
            }};
            ($index:expr, fm: $source:expr) => {{
                self.fm_scratch.copy_from($source, samples);
                let shared = OscSharedContext {
                    midi,
                    wavetables: &self.wavetable_db,
                    samples: &self.pcm_db,
                    morph_banks: &self.morph_banks,
                    unison_detune_cents: self.unison_detune_cents,
                    unison_start_phase: self.unison_start_phase,
                    samples_to_process: samples,
                };
                self.oscillators[$index].render(&params.osc[$index], &shared, Some(&self.fm_scratch));
            }};
        }

        match params.fm_algorithm {
            // 4 -> 3 -> 2 -> 1
            FmAlgorithm::Fm1 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: self.oscillators[3].buffers());
                render_osc!(1, fm: self.oscillators[2].buffers());
                render_osc!(0, fm: self.oscillators[1].buffers());
                self.mix_buffers.copy_from(self.oscillators[0].buffers(), samples);
            }
            // (4 + 3) -> 2 -> 1
            FmAlgorithm::Fm2 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: none);
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[3].buffers(), samples, 0.5);
                self.mix_buffers.accumulate_from(self.oscillators[2].buffers(), samples, 0.5);
                render_osc!(1, fm: &self.mix_buffers);
                render_osc!(0, fm: self.oscillators[1].buffers());
                self.mix_buffers.copy_from(self.oscillators[0].buffers(), samples);
            }
            // (3 -> 2) + 4 -> 1
            FmAlgorithm::Fm3 => {
                render_osc!(2, fm: none);
                render_osc!(1, fm: self.oscillators[2].buffers());
                render_osc!(3, fm: none);
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[1].buffers(), samples, 0.5);
                self.mix_buffers.accumulate_from(self.oscillators[3].buffers(), samples, 0.5);
                render_osc!(0, fm: &self.mix_buffers);
                self.mix_buffers.copy_from(self.oscillators[0].buffers(), samples);
            }
            // (4 -> 3) + 2 -> 1
            FmAlgorithm::Fm4 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: self.oscillators[3].buffers());
                render_osc!(1, fm: none);
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[2].buffers(), samples, 0.5);
                self.mix_buffers.accumulate_from(self.oscillators[1].buffers(), samples, 0.5);
                render_osc!(0, fm: &self.mix_buffers);
                self.mix_buffers.copy_from(self.oscillators[0].buffers(), samples);
            }
            // (3 -> 1) + (4 -> 2)
            FmAlgorithm::Fm5 => {
                render_osc!(2, fm: none);
                render_osc!(0, fm: self.oscillators[2].buffers());
                render_osc!(3, fm: none);
                render_osc!(1, fm: self.oscillators[3].buffers());
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[0].buffers(), samples, 0.5);
                self.mix_buffers.accumulate_from(self.oscillators[1].buffers(), samples, 0.5);
            }
            // 4 -> (1 + 2 + 3)
            FmAlgorithm::Fm6 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: self.oscillators[3].buffers());
                render_osc!(1, fm: self.oscillators[3].buffers());
                render_osc!(0, fm: self.oscillators[3].buffers());
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[2].buffers(), samples, 0.333);
                self.mix_buffers.accumulate_from(self.oscillators[1].buffers(), samples, 0.333);
                self.mix_buffers.accumulate_from(self.oscillators[0].buffers(), samples, 0.333);
            }
            // (4 -> 3) + 2 + 1
            FmAlgorithm::Fm7 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: self.oscillators[3].buffers());
                render_osc!(1, fm: none);
                render_osc!(0, fm: none);
                self.mix_buffers.flush();
                self.mix_buffers.accumulate_from(self.oscillators[2].buffers(), samples, 0.333);
                self.mix_buffers.accumulate_from(self.oscillators[1].buffers(), samples, 0.333);
                self.mix_buffers.accumulate_from(self.oscillators[0].buffers(), samples, 0.333);
            }
            // 1 + 2 + 3 + 4
            FmAlgorithm::Fm8 => {
                render_osc!(3, fm: none);
                render_osc!(2, fm: none);
                render_osc!(1, fm: none);
                render_osc!(0, fm: none);
                self.mix_buffers.flush();
                for i in 0..NUM_OSC {
                    self.mix_buffers.accumulate_from(self.oscillators[i].buffers(), samples, 0.25);
                }
            }
        }
    }

    /// Render one block into the voice output buffer.
    pub fn render(&mut self, params: &VoiceParams, midi: &MidiInputData, samples_to_process: usize) {
        let samples = samples_to_process.min(self.block_size);
        self.mix_buffers.flush();

        // legato rides on the amp EG parameters
        let mut amp_eg_params = params.amp_eg;
        amp_eg_params.legato_mode = self.legato_mode;

        // --- modulators first
        let bpm = midi.aux.bpm;
        for (i, lfo) in self.lfo.iter_mut().enumerate() {
            lfo.update(&params.lfo[i], bpm);
            lfo.render(&params.lfo[i], samples);
        }
        let pedal = midi.sustain_pedal_down();
        self.amp_eg.update(&amp_eg_params, pedal);
        self.amp_eg.render(&amp_eg_params, samples);
        self.filter_eg.update(&params.filter_eg, pedal);
        self.filter_eg.render(&params.filter_eg, samples);
        self.aux_eg.update(&params.aux_eg, pedal);
        self.aux_eg.render(&params.aux_eg, samples);

        if self.flavor == SynthFlavor::WaveSequence {
            self.wave_sequencer.render(&params.wave_sequencer, bpm, samples);
        }

        // --- matrix moves all block modulation
        self.run_mod_matrix(params);

        // --- oscillator section
        match self.flavor {
            SynthFlavor::Fm => self.render_fm_oscillators(params, midi, samples),
            SynthFlavor::WaveSequence => {
                for (i, ws) in self.ws_oscillators.iter_mut().enumerate() {
                    let shared = OscSharedContext {
                        midi,
                        wavetables: &self.wavetable_db,
                        samples: &self.pcm_db,
                        morph_banks: &self.morph_banks,
                        unison_detune_cents: self.unison_detune_cents,
                        unison_start_phase: self.unison_start_phase,
                        samples_to_process: samples,
                    };
                    ws.render(&params.ws_osc[i], &shared);
                }
                for ws in &self.ws_oscillators {
                    self.mix_buffers.accumulate_from(ws.buffers(), samples, 0.5);
                }
            }
            _ => {
                for i in 0..NUM_OSC {
                    let shared = OscSharedContext {
                        midi,
                        wavetables: &self.wavetable_db,
                        samples: &self.pcm_db,
                        morph_banks: &self.morph_banks,
                        unison_detune_cents: self.unison_detune_cents,
                        unison_start_phase: self.unison_start_phase,
                        samples_to_process: samples,
                    };
                    self.oscillators[i].render(&params.osc[i], &shared, None);
                    self.mix_buffers
                        .accumulate_from(self.oscillators[i].buffers(), samples, 0.25);
                }
                // cobbled wavetables carry small DC offsets that add up
                let (left, right) = self.mix_buffers.channels_mut();
                for i in 0..samples {
                    left[i] = self.dc_filter[0].process(left[i]);
                    right[i] = self.dc_filter[1].process(right[i]);
                }
            }
        }

        // --- filter routing
        match params.filter_routing {
            FilterRouting::Series => {
                self.filter[0].buffers_mut().copy_from(&self.mix_buffers, samples);
                self.filter[0].render(&params.filter[0], samples);

                let (first, second) = self.filter.split_at_mut(1);
                second[0].buffers_mut().copy_from(first[0].buffers(), samples);
                second[0].render(&params.filter[1], samples);

                self.dca.buffers_mut().copy_from(self.filter[1].buffers(), samples);
            }
            FilterRouting::Parallel => {
                self.filter[0].buffers_mut().copy_from(&self.mix_buffers, samples);
                self.filter[1].buffers_mut().copy_from(&self.mix_buffers, samples);
                self.mix_buffers.flush();

                self.filter[0].render(&params.filter[0], samples);
                self.filter[1].render(&params.filter[1], samples);
                self.mix_buffers.accumulate_from(self.filter[0].buffers(), samples, 0.5);
                self.mix_buffers.accumulate_from(self.filter[1].buffers(), samples, 0.5);

                self.dca.buffers_mut().copy_from(&self.mix_buffers, samples);
            }
        }

        // --- DCA to the voice output
        self.dca.render(&params.dca, samples);
        self.output_buffers.copy_from(self.dca.buffers(), samples);

        // --- retirement / deferred steal
        if self.voice_is_active && self.amp_eg.state() == EgState::Off {
            if self.flavor == SynthFlavor::WaveSequence {
                self.wave_sequencer.clear_status_array();
            }
            if self.steal_pending {
                let off_event = self.voice_midi_event;
                self.do_note_off(&off_event, params, midi);
                self.voice_midi_event = self.voice_steal_midi_event;
                let on_event = self.voice_midi_event;
                self.timestamp = 0; // the incoming note starts aging fresh
                self.do_note_on(&on_event, params, midi);
                self.steal_pending = false;
            } else {
                self.voice_is_active = false;
                self.timestamp = 0;
            }
        }
    }

    pub fn do_note_on(&mut self, event: &MidiEvent, params: &VoiceParams, midi: &MidiInputData) {
        let midi_pitch = midi_note_to_freq(event.data1);
        let last_midi_note = self.current_midi_note;
        self.current_midi_note = event.data1 as i32;

        let note_event = MidiNoteEvent::new(midi_pitch, event.data1, event.data2);

        // portamento from the previous note
        let glide_info = GlideInfo {
            start_note: if last_midi_note >= 0 {
                last_midi_note as u8
            } else {
                event.data1
            },
            end_note: event.data1,
            glide_time_msec: params.glide_time_msec,
            sample_rate: self.sample_rate,
        };
        let start_glide = params.glide_time_msec > 0.0 && last_midi_note >= 0;

        if self.flavor == SynthFlavor::WaveSequence {
            for ws in &mut self.ws_oscillators {
                if start_glide {
                    ws.start_glide_modulation(glide_info);
                }
            }
            for i in 0..self.ws_oscillators.len() {
                let ctx = OscSharedContext {
                    midi,
                    wavetables: &self.wavetable_db,
                    samples: &self.pcm_db,
                    morph_banks: &self.morph_banks,
                    unison_detune_cents: self.unison_detune_cents,
                    unison_start_phase: self.unison_start_phase,
                    samples_to_process: self.block_size,
                };
                self.ws_oscillators[i].note_on(&ctx, &note_event);
            }
            self.wave_sequencer.note_on(&params.wave_sequencer, midi.aux.bpm);
        } else {
            for i in 0..NUM_OSC {
                if start_glide {
                    self.oscillators[i].start_glide_modulation(glide_info);
                }
                let ctx = OscSharedContext {
                    midi,
                    wavetables: &self.wavetable_db,
                    samples: &self.pcm_db,
                    morph_banks: &self.morph_banks,
                    unison_detune_cents: self.unison_detune_cents,
                    unison_start_phase: self.unison_start_phase,
                    samples_to_process: self.block_size,
                };
                self.oscillators[i].note_on(&params.osc[i], &ctx, &note_event);
            }
        }

        for (i, lfo) in self.lfo.iter_mut().enumerate() {
            lfo.note_on(&params.lfo[i]);
        }
        self.dca.note_on(&note_event);
        for filter in &mut self.filter {
            filter.note_on(&note_event);
        }

        let mut amp_eg_params = params.amp_eg;
        amp_eg_params.legato_mode = self.legato_mode;
        self.amp_eg.note_on(&amp_eg_params, &note_event);
        self.filter_eg.note_on(&params.filter_eg, &note_event);
        self.aux_eg.note_on(&params.aux_eg, &note_event);

        self.voice_is_active = true;
        self.voice_note_state = VoiceState::NoteOn;
        self.voice_midi_event = *event;
    }

    pub fn do_note_off(&mut self, event: &MidiEvent, params: &VoiceParams, _midi: &MidiInputData) {
        let midi_pitch = midi_note_to_freq(event.data1);
        let note_event = MidiNoteEvent::new(midi_pitch, event.data1, event.data2);

        if self.flavor == SynthFlavor::WaveSequence {
            for ws in &mut self.ws_oscillators {
                ws.note_off(&note_event);
            }
            self.wave_sequencer.note_off();
        } else {
            for i in 0..NUM_OSC {
                self.oscillators[i].note_off(&params.osc[i], &note_event);
            }
        }

        for filter in &mut self.filter {
            filter.note_off(&note_event);
        }

        let mut amp_eg_params = params.amp_eg;
        amp_eg_params.legato_mode = self.legato_mode;
        self.amp_eg.note_off(&amp_eg_params);
        self.filter_eg.note_off(&params.filter_eg);
        self.aux_eg.note_off(&params.aux_eg);

        // the amp EG decides the final state from here
        self.voice_note_state = VoiceState::NoteOff;
    }

    /// Note on/off dispatch; all other messages are handled above the
    /// voice. A note-on landing on an active non-legato voice queues a
    /// steal and starts the shutdown ramp.
    pub fn process_midi_event(
        &mut self,
        event: &MidiEvent,
        params: &VoiceParams,
        midi: &MidiInputData,
    ) {
        match event.message {
            NOTE_ON => {
                if self.voice_is_active && !self.legato_mode {
                    self.steal_pending = true;
                    self.voice_steal_midi_event = *event;
                    self.amp_eg.shutdown();
                } else {
                    self.timestamp = 0;
                    self.do_note_on(event, params, midi);
                }
            }
            NOTE_OFF => {
                self.do_note_off(event, params, midi);
            }
            _ => {}
        }
    }

    pub fn is_voice_active(&self) -> bool {
        self.voice_is_active
    }

    pub fn voice_state(&self) -> VoiceState {
        self.voice_note_state
    }

    pub fn amp_eg_state(&self) -> EgState {
        self.amp_eg.state()
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn increment_timestamp(&mut self) {
        self.timestamp += 1;
    }

    pub fn clear_timestamp(&mut self) {
        self.timestamp = 0;
    }

    pub fn midi_note_number(&self) -> u8 {
        self.voice_midi_event.data1
    }

    pub fn steal_midi_note_number(&self) -> u8 {
        self.voice_steal_midi_event.data1
    }

    pub fn voice_is_stealing(&self) -> bool {
        self.steal_pending
    }

    pub fn output_buffers(&self) -> &AudioBuffer {
        &self.output_buffers
    }

    /// Sequencer activity lights, for the engine to surface to a UI.
    pub fn wave_sequencer_status(
        &self,
    ) -> &crate::dsp::sequencer::WaveSequencerStatusMeters {
        self.wave_sequencer.status_meters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::synthesis::build_standard_database;
    use crate::params::{EgParams, SynthParams};

    const FS: f64 = 48000.0;
    const BLOCK: usize = 64;

    fn make_voice(flavor: SynthFlavor, params: &mut SynthParams) -> (Voice, MidiInputData) {
        Voice::wire_hardwired_routings(&mut params.voice.mod_matrix, flavor);
        let (wavetables, morph_banks) = build_standard_database(FS);
        let mut voice = Voice::new(
            flavor,
            BLOCK,
            Arc::new(wavetables),
            Arc::new(morph_banks),
            Arc::new(PcmSampleDatabase::new()),
            &params.voice,
        );
        voice.reset(&params.voice, FS);
        voice.update(&params.voice, params.synth_mode, 0.0, 0.0);
        (voice, MidiInputData::default())
    }

    fn fast_eg() -> EgParams {
        EgParams {
            attack_time_msec: 1.0,
            decay_time_msec: 1.0,
            sustain_level: 1.0,
            release_time_msec: 2.0,
            ..EgParams::default()
        }
    }

    #[test]
    fn test_voice_lifecycle() {
        let mut params = SynthParams::default();
        params.voice.amp_eg = fast_eg();
        let (mut voice, midi) = make_voice(SynthFlavor::Wavetable, &mut params);

        assert!(!voice.is_voice_active());
        voice.process_midi_event(&MidiEvent::note_on(60, 100), &params.voice, &midi);
        assert!(voice.is_voice_active());
        assert_eq!(voice.voice_state(), VoiceState::NoteOn);

        // sustain: output is non-zero
        let mut energy = 0.0;
        for _ in 0..20 {
            voice.render(&params.voice, &midi, BLOCK);
            energy += voice
                .output_buffers()
                .left()
                .iter()
                .map(|v| v * v)
                .sum::<f64>();
        }
        assert!(energy > 0.0, "active voice must make sound");

        voice.process_midi_event(&MidiEvent::note_off(60, 0), &params.voice, &midi);
        assert_eq!(voice.voice_state(), VoiceState::NoteOff);

        // the 2 ms release retires the voice via the amp EG
        for _ in 0..10 {
            voice.render(&params.voice, &midi, BLOCK);
        }
        assert!(!voice.is_voice_active());
        // invariant: retired voice has no age and no pending steal
        assert_eq!(voice.timestamp(), 0);
        assert!(!voice.voice_is_stealing());
    }

    #[test]
    fn test_steal_consumes_pending_event() {
        let mut params = SynthParams::default();
        params.voice.amp_eg = fast_eg();
        let (mut voice, midi) = make_voice(SynthFlavor::Wavetable, &mut params);

        voice.process_midi_event(&MidiEvent::note_on(60, 100), &params.voice, &midi);
        for _ in 0..5 {
            voice.render(&params.voice, &midi, BLOCK);
        }

        // second note-on while active: shutdown + pending steal
        voice.process_midi_event(&MidiEvent::note_on(67, 90), &params.voice, &midi);
        assert!(voice.voice_is_stealing());
        assert_eq!(voice.steal_midi_note_number(), 67);
        assert_eq!(voice.amp_eg_state(), EgState::Shutdown);

        // within the shutdown time the voice flips to the new note
        let shutdown_blocks =
            (crate::params::SHUTDOWN_TIME_MSEC * FS / 1000.0 / BLOCK as f64).ceil() as usize + 2;
        for _ in 0..shutdown_blocks {
            voice.render(&params.voice, &midi, BLOCK);
        }
        assert!(voice.is_voice_active());
        assert!(!voice.voice_is_stealing());
        assert_eq!(voice.midi_note_number(), 67);
    }

    #[test]
    fn test_amp_eg_hardwire_drives_dca() {
        // with the amp EG sitting at 0.5 the DCA EG-mod slot must read
        // exactly 0.5 after run(), regardless of user intensities
        let mut params = SynthParams::default();
        params.voice.amp_eg = EgParams {
            attack_time_msec: 0.0,
            decay_time_msec: 0.0,
            sustain_level: 0.5,
            ..EgParams::default()
        };
        // user intensities must not matter for a hardwired routing
        params.voice.mod_matrix.source_intensity[ModSource::AmpEgNorm as usize] = 0.0;
        params.voice.mod_matrix.dest_intensity[ModDestination::DcaEgMod as usize] = 0.0;

        let (mut voice, midi) = make_voice(SynthFlavor::Wavetable, &mut params);
        voice.process_midi_event(&MidiEvent::note_on(60, 127), &params.voice, &midi);
        for _ in 0..10 {
            voice.render(&params.voice, &midi, BLOCK);
        }
        let value = voice.mod_matrix.dest_value(ModDestination::DcaEgMod);
        assert!((value - 0.5).abs() < 1e-9, "DCA EG mod = {value}");
    }

    #[test]
    fn test_parallel_and_series_filter_routing() {
        for routing in [FilterRouting::Series, FilterRouting::Parallel] {
            let mut params = SynthParams::default();
            params.voice.amp_eg = fast_eg();
            params.voice.filter_routing = routing;
            let (mut voice, midi) = make_voice(SynthFlavor::Wavetable, &mut params);

            voice.process_midi_event(&MidiEvent::note_on(57, 100), &params.voice, &midi);
            let mut energy = 0.0;
            for _ in 0..20 {
                voice.render(&params.voice, &midi, BLOCK);
                energy += voice
                    .output_buffers()
                    .left()
                    .iter()
                    .map(|v| v * v)
                    .sum::<f64>();
            }
            assert!(energy > 0.0, "{routing:?} routing must pass signal");
        }
    }

    #[test]
    fn test_fm_flavor_renders_all_algorithms() {
        for algorithm in [
            FmAlgorithm::Fm1,
            FmAlgorithm::Fm2,
            FmAlgorithm::Fm3,
            FmAlgorithm::Fm4,
            FmAlgorithm::Fm5,
            FmAlgorithm::Fm6,
            FmAlgorithm::Fm7,
            FmAlgorithm::Fm8,
        ] {
            let mut params = SynthParams::default();
            params.voice.amp_eg = fast_eg();
            params.voice.fm_algorithm = algorithm;
            let (mut voice, midi) = make_voice(SynthFlavor::Fm, &mut params);

            voice.process_midi_event(&MidiEvent::note_on(60, 100), &params.voice, &midi);
            let mut energy = 0.0;
            for _ in 0..20 {
                voice.render(&params.voice, &midi, BLOCK);
                for &v in voice.output_buffers().left() {
                    assert!(v.is_finite());
                    energy += v * v;
                }
            }
            assert!(energy > 0.0, "{algorithm:?} must produce output");
        }
    }

    #[test]
    fn test_wave_sequence_flavor_renders() {
        let mut params = SynthParams::default();
        params.voice.amp_eg = fast_eg();
        let (mut voice, midi) = make_voice(SynthFlavor::WaveSequence, &mut params);

        voice.process_midi_event(&MidiEvent::note_on(60, 100), &params.voice, &midi);
        let mut energy = 0.0;
        for _ in 0..50 {
            voice.render(&params.voice, &midi, BLOCK);
            for &v in voice.output_buffers().left() {
                assert!(v.is_finite());
                energy += v * v;
            }
        }
        assert!(energy > 0.0, "wave-sequence voice must produce output");

        // the sequencer's step number must have been forwarded into the
        // WS oscillators through the hardwired matrix rows
        let mix_a = voice.ws_oscillators[0]
            .mod_in_mut()
            .value(WAVESEQ_WAVE_A_GAIN_MOD);
        assert!(mix_a > 0.0, "sequencer mix gain must reach the oscillator");
    }

    #[test]
    fn test_legato_note_on_does_not_steal() {
        let mut params = SynthParams::default();
        params.synth_mode = SynthMode::Legato;
        params.voice.amp_eg = fast_eg();
        let (mut voice, midi) = make_voice(SynthFlavor::Wavetable, &mut params);
        voice.update(&params.voice, SynthMode::Legato, 0.0, 0.0);

        voice.process_midi_event(&MidiEvent::note_on(60, 100), &params.voice, &midi);
        for _ in 0..5 {
            voice.render(&params.voice, &midi, BLOCK);
        }
        voice.process_midi_event(&MidiEvent::note_on(64, 100), &params.voice, &midi);
        assert!(!voice.voice_is_stealing(), "legato must not steal");
        assert_eq!(voice.midi_note_number(), 64);
        assert!(voice.is_voice_active());
    }
}
