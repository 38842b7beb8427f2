//! Oscillator module: one selectable core behind a common shell that
//! owns the modulation arrays, the audio buffer, and the glide
//! (portamento) modulator.

pub mod classic_wt;
pub mod fm_op;
pub mod fourier_wt;
pub mod ks_core;
pub mod morph_wt;
pub mod pcm_core;
pub mod ws_oscillator;

use crate::audio::buffer::AudioBuffer;
use crate::dsp::glide::{GlideInfo, GlideModulator};
use crate::dsp::modulation::{ModArray, BIPOLAR_MOD};
use crate::dsp::synthesis::{MorphBankData, PcmSampleDatabase, WavetableDatabase};
use crate::midi::{MidiInputData, MidiNoteEvent};
use crate::params::{OscCoreKind, OscParams};

use classic_wt::ClassicWtCore;
use fm_op::FmOpCore;
use fourier_wt::FourierWtCore;
use ks_core::KsCore;
use morph_wt::MorphWtCore;
use pcm_core::PcmCore;

/// Bipolar pitch-mod range: +/- one octave at full modulation.
pub const OSC_BIPOLAR_MOD_RANGE_SEMITONES: f64 = 12.0;
/// Oscillator pitch clamp (MIDI note 0 fundamental up to 20.48 kHz).
pub const OSC_FMIN: f64 = crate::dsp::functions::MIDI_NOTE_0_FREQ;
pub const OSC_FMAX: f64 = 20480.0;

/// Additive hard-sync modulation slope: |unique mod| 0..1 maps onto this
/// many extra ratio units.
pub const HSYNC_MOD_SLOPE: f64 = 3.0;

/// Read-only per-block context shared by every oscillator core.
#[derive(Clone, Copy)]
pub struct OscSharedContext<'a> {
    pub midi: &'a MidiInputData,
    pub wavetables: &'a WavetableDatabase,
    pub samples: &'a PcmSampleDatabase,
    pub morph_banks: &'a [MorphBankData],
    pub unison_detune_cents: f64,
    pub unison_start_phase: f64,
    pub samples_to_process: usize,
}

/// Combined pitch-modulation offset in semitones: glide + bipolar mod +
/// pitch bend + master tuning + the stacked detune controls.
pub fn pitch_mod_semitones(
    params: &OscParams,
    shared: &OscSharedContext<'_>,
    mod_in: &ModArray,
    glide_mod: f64,
) -> f64 {
    let freq_mod = mod_in.value(BIPOLAR_MOD) * OSC_BIPOLAR_MOD_RANGE_SEMITONES;
    glide_mod
        + freq_mod
        + shared.midi.pitch_bend_semitones()
        + shared.midi.master_tuning_semitones()
        + params.osc_specific_detune
        + params.octave_detune * 12.0
        + params.coarse_detune
        + params.fine_detune / 100.0
        + shared.unison_detune_cents / 100.0
}

/// `midi_pitch * 2^(mod/12)` clamped to the oscillator range.
pub fn modulated_oscillator_frequency(midi_pitch: f64, pitch_mod_semitones: f64) -> f64 {
    let pitch_shift = 2.0_f64.powf(pitch_mod_semitones / 12.0);
    (midi_pitch * pitch_shift).clamp(OSC_FMIN, OSC_FMAX)
}

enum OscCore {
    ClassicWt(ClassicWtCore),
    MorphWt(MorphWtCore),
    FourierWt(FourierWtCore),
    FmOp(Box<FmOpCore>),
    KarplusStrong(Box<KsCore>),
    Pcm(PcmCore),
}

/// One oscillator slot of a voice.
pub struct Oscillator {
    core: OscCore,
    core_kind: OscCoreKind,
    mod_in: ModArray,
    mod_out: ModArray,
    buffers: AudioBuffer,
    glide: GlideModulator,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(core_kind: OscCoreKind, block_size: usize) -> Self {
        Self {
            core: Self::make_core(core_kind),
            core_kind,
            mod_in: ModArray::new(),
            mod_out: ModArray::new(),
            buffers: AudioBuffer::new(block_size),
            glide: GlideModulator::default(),
            sample_rate: 0.0,
        }
    }

    fn make_core(core_kind: OscCoreKind) -> OscCore {
        match core_kind {
            OscCoreKind::ClassicWt => OscCore::ClassicWt(ClassicWtCore::default()),
            OscCoreKind::MorphWt => OscCore::MorphWt(MorphWtCore::default()),
            OscCoreKind::FourierWt => OscCore::FourierWt(FourierWtCore::default()),
            OscCoreKind::FmOp => OscCore::FmOp(Box::default()),
            OscCoreKind::KarplusStrong => OscCore::KarplusStrong(Box::default()),
            OscCoreKind::Pcm => OscCore::Pcm(PcmCore::default()),
        }
    }

    pub fn core_kind(&self) -> OscCoreKind {
        self.core_kind
    }

    /// Swap the core in place; the new core starts silent until the next
    /// note-on.
    pub fn select_core(&mut self, core_kind: OscCoreKind, params: &OscParams) {
        if core_kind == self.core_kind {
            return;
        }
        self.core_kind = core_kind;
        self.core = Self::make_core(core_kind);
        if self.sample_rate > 0.0 {
            self.reset_core(params);
        }
    }

    fn reset_core(&mut self, params: &OscParams) {
        match &mut self.core {
            OscCore::ClassicWt(core) => core.reset(params, self.sample_rate),
            OscCore::MorphWt(core) => core.reset(params, self.sample_rate),
            OscCore::FourierWt(core) => core.reset(params, self.sample_rate),
            OscCore::FmOp(core) => core.reset(params, self.sample_rate),
            OscCore::KarplusStrong(core) => core.reset(params, self.sample_rate),
            OscCore::Pcm(core) => core.reset(params, self.sample_rate),
        }
    }

    pub fn reset(&mut self, params: &OscParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.reset_core(params);
        self.buffers.flush();
        self.glide = GlideModulator::default();
    }

    /// Per-block derived settings: pitch, table/sample selection, pan.
    pub fn update(&mut self, params: &OscParams, shared: &OscSharedContext<'_>) {
        let glide_mod = self.glide.next_modulation_value();
        match &mut self.core {
            OscCore::ClassicWt(core) => core.update(params, shared, &self.mod_in, glide_mod),
            OscCore::MorphWt(core) => core.update(params, shared, &self.mod_in, glide_mod),
            OscCore::FourierWt(core) => core.update(params, shared, &self.mod_in, glide_mod),
            OscCore::FmOp(core) => core.update(params, shared, &self.mod_in, glide_mod),
            OscCore::KarplusStrong(core) => core.update(params, shared, &self.mod_in, glide_mod),
            OscCore::Pcm(core) => core.update(params, shared, &self.mod_in, glide_mod),
        }
    }

    /// Render one block into the module buffer; `fm_buffer` carries
    /// phase-modulation audio from another operator, if patched.
    pub fn render(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        fm_buffer: Option<&AudioBuffer>,
    ) {
        self.update(params, shared);
        let samples = shared.samples_to_process.min(self.buffers.block_size());
        match &mut self.core {
            OscCore::ClassicWt(core) => core.render(params, &mut self.buffers, samples, fm_buffer),
            OscCore::MorphWt(core) => core.render(params, &mut self.buffers, samples, fm_buffer),
            OscCore::FourierWt(core) => core.render(params, &mut self.buffers, samples, fm_buffer),
            OscCore::FmOp(core) => {
                core.render(params, shared, &mut self.buffers, samples, fm_buffer)
            }
            OscCore::KarplusStrong(core) => core.render(params, &mut self.buffers, samples),
            OscCore::Pcm(core) => core.render(params, shared, &mut self.buffers, samples),
        }
        self.glide.advance_clock(samples);
    }

    pub fn note_on(
        &mut self,
        params: &OscParams,
        shared: &OscSharedContext<'_>,
        note_event: &MidiNoteEvent,
    ) {
        match &mut self.core {
            OscCore::ClassicWt(core) => core.note_on(params, shared, note_event),
            OscCore::MorphWt(core) => core.note_on(params, shared, note_event),
            OscCore::FourierWt(core) => core.note_on(params, shared, note_event),
            OscCore::FmOp(core) => core.note_on(params, note_event),
            OscCore::KarplusStrong(core) => core.note_on(params, note_event),
            OscCore::Pcm(core) => core.note_on(params, note_event),
        }
    }

    pub fn note_off(&mut self, params: &OscParams, note_event: &MidiNoteEvent) {
        match &mut self.core {
            OscCore::FmOp(core) => core.note_off(params, note_event),
            OscCore::Pcm(core) => core.note_off(params, note_event),
            _ => {}
        }
    }

    pub fn start_glide_modulation(&mut self, glide_info: GlideInfo) {
        self.glide.start_modulator(glide_info);
    }

    pub fn buffers(&self) -> &AudioBuffer {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffers
    }

    pub fn mod_in(&self) -> &ModArray {
        &self.mod_in
    }

    pub fn mod_in_mut(&mut self) -> &mut ModArray {
        &mut self.mod_in
    }

    pub fn mod_out(&self) -> &ModArray {
        &self.mod_out
    }
}
