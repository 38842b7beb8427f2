//! Scalar modulation plumbing: the per-module slot arrays and the
//! per-voice routing matrix that links them.
//!
//! Every module owns two [`ModArray`]s - "inputs I consume" and "outputs I
//! produce". The matrix never holds pointers into modules; it stores
//! stable [`ModSlotRef`] indices that the owning voice resolves when it
//! gathers source values and scatters destination values around
//! [`matrix::ModMatrix::run`].

pub mod matrix;

pub use matrix::{ModMatrix, ModMatrixParams, ModRouting, ModTransform};

/// Slot count in each modulation array.
pub const NUM_MOD_CHANNELS: usize = 32;

// --- modulation INPUT slots -------------------------------------------
/// Bipolar pitch/frequency modulation, +/- 1 maps to the osc mod range.
pub const BIPOLAR_MOD: usize = 0;
/// Core-specific modulation (hard-sync for classic WT, pan for KS/FM, ...).
pub const UNIQUE_MOD: usize = 1;
/// Phase-distortion / waveshape amount.
pub const SHAPE_MOD: usize = 2;
/// Morphing-wavetable position.
pub const WAVE_MORPH_MOD: usize = 3;
/// Envelope input (filter fc, DCA gain).
pub const EG_MOD: usize = 4;
/// Unipolar max-down amplitude mod (tremolo); neutral value is 1.0.
pub const MAX_DOWN_AMP_MOD: usize = 5;
/// Pan position modulation.
pub const PAN_MOD: usize = 6;
/// EG retrigger; rising edge across 0.5 restarts the envelope.
pub const TRIGGER_MOD: usize = 7;

// --- wave-sequencer driven inputs (WS oscillators only) ---------------
pub const WAVESEQ_WAVE_A_GAIN_MOD: usize = 8;
pub const WAVESEQ_WAVE_B_GAIN_MOD: usize = 9;
pub const WAVESEQ_WAVE_INDEX_A_MOD: usize = 10;
pub const WAVESEQ_WAVE_INDEX_B_MOD: usize = 11;
pub const WAVESEQ_AMP_A_MOD: usize = 12;
pub const WAVESEQ_AMP_B_MOD: usize = 13;
pub const WAVESEQ_PITCH_A_MOD: usize = 14;
pub const WAVESEQ_PITCH_B_MOD: usize = 15;
pub const WAVESEQ_XFADE_DONE_MOD: usize = 16;
pub const WAVE_STEP_NUMBER_A: usize = 17;
pub const WAVE_STEP_NUMBER_B: usize = 18;

// --- modulation OUTPUT slots ------------------------------------------
pub const EG_NORMAL_OUTPUT: usize = 0;
pub const EG_BIASED_OUTPUT: usize = 1;

pub const LFO_NORMAL_OUTPUT: usize = 0;
pub const LFO_INVERTED_OUTPUT: usize = 1;
pub const LFO_UNIPOLAR_FROM_MAX: usize = 2;
pub const LFO_UNIPOLAR_FROM_MIN: usize = 3;

pub const WS_WAVE_MIX_A: usize = 0;
pub const WS_WAVE_MIX_B: usize = 1;
pub const WS_WAVE_INDEX_A: usize = 2;
pub const WS_WAVE_INDEX_B: usize = 3;
pub const WS_WAVE_AMP_MOD_A: usize = 4;
pub const WS_WAVE_AMP_MOD_B: usize = 5;
pub const WS_PITCH_MOD_A: usize = 6;
pub const WS_PITCH_MOD_B: usize = 7;
pub const WS_STEP_SEQ_MOD: usize = 8;
pub const WS_XFADE_DONE: usize = 9;
pub const WS_WAVE_STEP_NUMBER_A: usize = 10;
pub const WS_WAVE_STEP_NUMBER_B: usize = 11;

/// Fixed-size bank of scalar modulation values.
#[derive(Debug, Clone, Copy)]
pub struct ModArray {
    values: [f64; NUM_MOD_CHANNELS],
}

impl Default for ModArray {
    fn default() -> Self {
        let mut values = [0.0; NUM_MOD_CHANNELS];
        // max-down amp mod is multiplicative; its rest value is unity
        values[MAX_DOWN_AMP_MOD] = 1.0;
        Self { values }
    }
}

impl ModArray {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn value(&self, slot: usize) -> f64 {
        self.values[slot]
    }

    #[inline]
    pub fn set_value(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The modules of one voice that expose modulation slots. Oscillator and
/// filter indices address the fixed per-voice arrays; `WsInnerOsc`
/// addresses one of the four wavetable oscillators inside a
/// wave-sequencing oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModModule {
    Lfo(usize),
    AmpEg,
    FilterEg,
    AuxEg,
    Osc(usize),
    Filter(usize),
    Dca,
    WaveSequencer,
    WsOsc(usize),
    WsInnerOsc { ws: usize, inner: usize },
}

/// Stable handle to one slot of one module's modulation array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModSlotRef {
    pub module: ModModule,
    pub slot: usize,
}

impl ModSlotRef {
    pub fn new(module: ModModule, slot: usize) -> Self {
        Self { module, slot }
    }
}
