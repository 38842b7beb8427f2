//! All user-facing parameter structures.
//!
//! One [`SynthParams`] snapshot travels from the host/GUI thread to the
//! audio thread through a lock-free triple buffer; the engine reads it
//! once per block and fans the sub-structures out to the voices. Every
//! struct derives `Serialize`/`Deserialize` so a host can persist or
//! transmit parameter state as JSON.

use crate::dsp::functions::NoteDuration;
use crate::dsp::modulation::ModMatrixParams;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_VOICES: usize = 16;
pub const NUM_OSC: usize = 4;
pub const NUM_LFO: usize = 2;
pub const NUM_FILTER: usize = 2;
pub const MAX_SEQ_STEPS: usize = 8;
/// Wavetable oscillators inside one wave-sequencing oscillator.
pub const NUM_WS_INNER_OSC: usize = 4;
/// Wave-sequencing oscillators per voice (main + detuned).
pub const NUM_WS_OSC: usize = 2;

/// Duration of the voice-stealing shutdown ramp.
pub const SHUTDOWN_TIME_MSEC: f64 = 10.0;

pub const NUM_MOD_KNOBS: usize = 4;
pub const MOD_KNOB_A: usize = 0;
pub const MOD_KNOB_B: usize = 1;
pub const MOD_KNOB_C: usize = 2;
pub const MOD_KNOB_D: usize = 3;

/// Polyphony / keyboard behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SynthMode {
    Mono,
    Legato,
    Unison,
    UnisonLegato,
    #[default]
    Poly,
}

/// The voice architecture, fixed at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SynthFlavor {
    /// Four wavetable-family oscillators summed at 1/4 with a DC blocker.
    #[default]
    Wavetable,
    /// Four FM operators patched through one of eight algorithms.
    Fm,
    /// Two wave-sequencing oscillators driven by the wave sequencer.
    WaveSequence,
    /// Four plucked-string oscillators.
    Pluck,
    /// Four PCM sample oscillators.
    Sampler,
}

/// Oscillator core selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OscCoreKind {
    #[default]
    ClassicWt,
    MorphWt,
    FourierWt,
    FmOp,
    KarplusStrong,
    Pcm,
}

impl fmt::Display for OscCoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscCoreKind::ClassicWt => write!(f, "Classic WT"),
            OscCoreKind::MorphWt => write!(f, "Morph WT"),
            OscCoreKind::FourierWt => write!(f, "Fourier WT"),
            OscCoreKind::FmOp => write!(f, "FM Op"),
            OscCoreKind::KarplusStrong => write!(f, "Plucked String"),
            OscCoreKind::Pcm => write!(f, "PCM"),
        }
    }
}

/// Plucked-string models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KsModel {
    #[default]
    NylonGuitar,
    DistortedGuitar,
    Bass,
    Silent,
}

/// PCM loop behavior requested by the user (the file's own loop points
/// still decide where wraps land).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PcmLoopMode {
    #[default]
    Sustain,
    Loop,
    OneShot,
}

/// Embedded DX envelope settings for one FM operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FmOperatorEgParams {
    pub start_level: f64,
    pub attack_time_msec: f64,
    pub decay_time_msec: f64,
    pub decay_level: f64,
    pub slope_time_msec: f64,
    pub sustain_level: f64,
    pub release_time_msec: f64,
    pub curvature: f64,
}

impl Default for FmOperatorEgParams {
    fn default() -> Self {
        Self {
            start_level: 0.0,
            attack_time_msec: 5.0,
            decay_time_msec: 100.0,
            decay_level: 0.7,
            slope_time_msec: 150.0,
            sustain_level: 0.6,
            release_time_msec: 250.0,
            curvature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscParams {
    pub core: OscCoreKind,
    /// Index into the selected core's waveform list.
    pub wave_index: usize,
    pub output_amplitude_db: f64,
    pub pan: f64,
    /// Octave/semitone/cent detuning, summed into the pitch computation.
    pub octave_detune: f64,
    pub coarse_detune: f64,
    pub fine_detune: f64,
    /// Extra semitone offset; the wave sequencer drives this per step.
    pub osc_specific_detune: f64,
    /// Phase-modulation depth for incoming FM buffers.
    pub phase_mod_index: f64,
    /// FM operator frequency ratio.
    pub ratio: f64,
    /// Core mod knobs A-D; meaning is core-specific (classic WT:
    /// shape/hard-sync/phase, KS: detune/boost/bite/pluck-pos, FM:
    /// feedback on D, morph WT: start on C and intensity on D).
    pub mod_knob: [f64; NUM_MOD_KNOBS],
    /// Force drum/SFX one-shots to retrigger on every step (WS use).
    pub force_loop: bool,

    pub fm_eg: FmOperatorEgParams,

    pub ks_model: KsModel,
    /// Resonator feedback scalar in (0, 1).
    pub ks_decay: f64,
    pub ks_attack_msec: f64,
    pub ks_hold_msec: f64,
    pub ks_release_msec: f64,

    /// PCM patch name in the sample database.
    pub pcm_patch: String,
    pub pcm_loop_mode: PcmLoopMode,

    /// Morph bank name in the wavetable database.
    pub morph_bank: String,
}

impl Default for OscParams {
    fn default() -> Self {
        Self {
            core: OscCoreKind::ClassicWt,
            wave_index: 0,
            output_amplitude_db: 0.0,
            pan: 0.0,
            octave_detune: 0.0,
            coarse_detune: 0.0,
            fine_detune: 0.0,
            osc_specific_detune: 0.0,
            phase_mod_index: 2.0,
            ratio: 1.0,
            mod_knob: [0.0, 0.0, 0.0, 0.5],
            force_loop: false,
            fm_eg: FmOperatorEgParams::default(),
            ks_model: KsModel::NylonGuitar,
            ks_decay: 0.97,
            ks_attack_msec: 2.0,
            ks_hold_msec: 0.0,
            ks_release_msec: 20.0,
            pcm_patch: String::new(),
            pcm_loop_mode: PcmLoopMode::Sustain,
            morph_bank: "saw morph".to_string(),
        }
    }
}

/// Envelope generator core selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EgCoreKind {
    #[default]
    LinearEg,
    DxEg,
}

/// DX envelope contours: with or without the sustain hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DxEgContour {
    #[default]
    Adslsr,
    Adslr,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EgParams {
    pub core: EgCoreKind,
    pub contour: DxEgContour,
    pub attack_time_msec: f64,
    pub decay_time_msec: f64,
    pub sustain_level: f64,
    pub release_time_msec: f64,
    /// Direct DX fields; the panel knobs override these unless the core
    /// runs standalone inside an FM operator.
    pub start_level: f64,
    pub decay_level: f64,
    pub slope_time_msec: f64,
    pub curvature: f64,
    pub velocity_to_attack_scaling: bool,
    pub note_number_to_decay_scaling: bool,
    /// Set per block by the voice from the synth mode; not user-facing.
    pub legato_mode: bool,
    /// A: start level, B: decay level (DX), C: slope time (DX), D: curvature (DX).
    pub mod_knob: [f64; NUM_MOD_KNOBS],
}

impl Default for EgParams {
    fn default() -> Self {
        Self {
            core: EgCoreKind::LinearEg,
            contour: DxEgContour::Adslsr,
            attack_time_msec: 10.0,
            decay_time_msec: 100.0,
            sustain_level: 0.707,
            release_time_msec: 200.0,
            start_level: 0.0,
            decay_level: 0.7,
            slope_time_msec: 150.0,
            curvature: 0.5,
            velocity_to_attack_scaling: false,
            note_number_to_decay_scaling: false,
            legato_mode: false,
            mod_knob: [0.0, 0.5, 0.5, 0.5],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LfoCoreKind {
    #[default]
    Classic,
    Fm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Saw,
    RampDown,
    Pulse,
    SampleHold,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FmLfoWaveform {
    #[default]
    Fm2,
    Fm3A,
    Fm3B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LfoMode {
    /// Restart phase on every note-on.
    #[default]
    Sync,
    /// Run one cycle after note-on, then hold at zero.
    OneShot,
    /// Never restart.
    FreeRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoParams {
    pub core: LfoCoreKind,
    pub waveform: LfoWaveform,
    pub fm_waveform: FmLfoWaveform,
    pub mode: LfoMode,
    pub frequency_hz: f64,
    pub output_amplitude: f64,
    /// Bipolar stepper bits; 0 disables quantization.
    pub quantize: u32,
    /// A: shape, B: delay (classic) / ratio (FM), C: fade-in (classic) /
    /// index (FM), D: BPM sync note value.
    pub mod_knob: [f64; NUM_MOD_KNOBS],
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            core: LfoCoreKind::Classic,
            waveform: LfoWaveform::Sine,
            fm_waveform: FmLfoWaveform::Fm2,
            mode: LfoMode::Sync,
            frequency_hz: 0.5,
            output_amplitude: 1.0,
            quantize: 0,
            mod_knob: [0.5, 0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterCoreKind {
    #[default]
    Svf,
    Biquad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterType {
    #[default]
    Lpf2,
    Hpf2,
    Bpf2,
    Bsf2,
    Lpf1,
    Hpf1,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub core: FilterCoreKind,
    pub filter_type: FilterType,
    pub fc: f64,
    pub q: f64,
    pub output_gain_db: f64,
    pub enable_key_track: bool,
    pub key_track_ratio: f64,
    /// Filter-EG modulation depth applied to the hardwired EG input.
    pub eg_mod_intensity: f64,
    /// Bipolar (LFO) modulation depth.
    pub bipolar_mod_intensity: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            core: FilterCoreKind::Svf,
            filter_type: FilterType::Lpf2,
            fc: 1000.0,
            q: 0.707,
            output_gain_db: 0.0,
            enable_key_track: false,
            key_track_ratio: 1.0,
            eg_mod_intensity: 1.0,
            bipolar_mod_intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcaParams {
    pub gain_db: f64,
    pub pan: f64,
}

impl Default for DcaParams {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            pan: 0.0,
        }
    }
}

/// Filter chain topology inside the voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterRouting {
    #[default]
    Series,
    Parallel,
}

/// DX-style four-operator algorithms; operator 1 is the left-most
/// carrier in the comments below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FmAlgorithm {
    /// 4 -> 3 -> 2 -> 1
    #[default]
    Fm1,
    /// (4 + 3) -> 2 -> 1
    Fm2,
    /// (3 -> 2) + 4 -> 1
    Fm3,
    /// (4 -> 3) + 2 -> 1
    Fm4,
    /// (3 -> 1) + (4 -> 2)
    Fm5,
    /// 4 -> (1 + 2 + 3)
    Fm6,
    /// (4 -> 3) + 2 + 1
    Fm7,
    /// 1 + 2 + 3 + 4
    Fm8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoopDirection {
    #[default]
    Forward,
    Backward,
    ForwardBackward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepMode {
    #[default]
    Note,
    Rest,
}

/// Lanes other than timing, for indexed loop settings.
pub const WAVE_LANE: usize = 0;
pub const PITCH_LANE: usize = 1;
pub const STEP_SEQ_LANE: usize = 2;
pub const NUM_MOD_LANES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSequencerParams {
    pub halt_sequencer: bool,
    /// [-5, +5]; uniform stretch/shrink of every step duration.
    pub time_stretch: f64,
    pub interpolate_step_seq_mod: bool,

    pub randomize_step_order: bool,
    pub randomize_wave_order: bool,
    pub randomize_pitch_order: bool,
    pub randomize_ss_mod_order: bool,

    /// Timing-lane loop points, 1-indexed to match panel numbering.
    pub timing_loop_start: usize,
    pub timing_loop_end: usize,
    pub timing_loop_direction: LoopDirection,

    pub step_duration: [NoteDuration; MAX_SEQ_STEPS],
    pub xfade_duration: [NoteDuration; MAX_SEQ_STEPS],
    pub step_type: [StepMode; MAX_SEQ_STEPS],

    pub mod_loop_start: [usize; NUM_MOD_LANES],
    pub mod_loop_end: [usize; NUM_MOD_LANES],
    pub mod_loop_direction: [LoopDirection; NUM_MOD_LANES],

    /// Wave lane: waveform index per step plus the locked amplitude in dB.
    pub wave_lane_value: [f64; MAX_SEQ_STEPS],
    pub wave_lane_amp_db: [f64; MAX_SEQ_STEPS],
    pub wave_lane_probability_pct: [f64; MAX_SEQ_STEPS],

    pub pitch_lane_value: [f64; MAX_SEQ_STEPS],
    pub pitch_lane_probability_pct: [f64; MAX_SEQ_STEPS],

    pub step_seq_value: [f64; MAX_SEQ_STEPS],
    pub step_seq_probability_pct: [f64; MAX_SEQ_STEPS],
}

impl Default for WaveSequencerParams {
    fn default() -> Self {
        Self {
            halt_sequencer: false,
            time_stretch: 0.0,
            interpolate_step_seq_mod: false,
            randomize_step_order: false,
            randomize_wave_order: false,
            randomize_pitch_order: false,
            randomize_ss_mod_order: false,
            timing_loop_start: 1,
            timing_loop_end: MAX_SEQ_STEPS,
            timing_loop_direction: LoopDirection::Forward,
            step_duration: [NoteDuration::Quarter; MAX_SEQ_STEPS],
            xfade_duration: [NoteDuration::Sixteenth; MAX_SEQ_STEPS],
            step_type: [StepMode::Note; MAX_SEQ_STEPS],
            mod_loop_start: [1; NUM_MOD_LANES],
            mod_loop_end: [MAX_SEQ_STEPS; NUM_MOD_LANES],
            mod_loop_direction: [LoopDirection::Forward; NUM_MOD_LANES],
            wave_lane_value: [0.0; MAX_SEQ_STEPS],
            wave_lane_amp_db: [0.0; MAX_SEQ_STEPS],
            wave_lane_probability_pct: [100.0; MAX_SEQ_STEPS],
            pitch_lane_value: [0.0; MAX_SEQ_STEPS],
            pitch_lane_probability_pct: [100.0; MAX_SEQ_STEPS],
            step_seq_value: [-1.0, 1.0, -0.3, -0.1, 1.0, 0.6, 0.3, 0.0],
            step_seq_probability_pct: [100.0; MAX_SEQ_STEPS],
        }
    }
}

/// Per-step settings a wave-sequencing oscillator forwards to whichever
/// internal oscillator plays that step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsOscParams {
    pub pan: [f64; MAX_SEQ_STEPS],
    /// Hard-sync knob value per step (0 = off).
    pub hard_sync_knob: [f64; MAX_SEQ_STEPS],
    pub morph_intensity: [f64; MAX_SEQ_STEPS],
    pub detune_semis: [f64; MAX_SEQ_STEPS],
    pub detune_cents: [f64; MAX_SEQ_STEPS],
    /// >= 0 pins every step to one waveform for auditioning.
    pub solo_wave_index: i32,
}

impl Default for WsOscParams {
    fn default() -> Self {
        Self {
            pan: [0.0; MAX_SEQ_STEPS],
            hard_sync_knob: [0.0; MAX_SEQ_STEPS],
            morph_intensity: [1.0; MAX_SEQ_STEPS],
            detune_semis: [0.0; MAX_SEQ_STEPS],
            detune_cents: [0.0; MAX_SEQ_STEPS],
            solo_wave_index: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VoiceParams {
    pub glide_time_msec: f64,
    pub filter_routing: FilterRouting,
    pub fm_algorithm: FmAlgorithm,
    pub osc: [OscParams; NUM_OSC],
    pub lfo: [LfoParams; NUM_LFO],
    pub amp_eg: EgParams,
    pub filter_eg: EgParams,
    pub aux_eg: EgParams,
    pub filter: [FilterParams; NUM_FILTER],
    pub dca: DcaParams,
    pub ws_osc: [WsOscParams; NUM_WS_OSC],
    pub wave_sequencer: WaveSequencerParams,
    pub mod_matrix: ModMatrixParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayParams {
    pub left_delay_msec: f64,
    pub right_delay_msec: f64,
    pub feedback_pct: f64,
    pub dry_level_db: f64,
    pub wet_level_db: f64,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            left_delay_msec: 250.0,
            right_delay_msec: 250.0,
            feedback_pct: 30.0,
            dry_level_db: -3.0,
            wet_level_db: -10.0,
        }
    }
}

/// The complete engine parameter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthParams {
    pub synth_mode: SynthMode,
    pub global_volume_db: f64,
    pub global_pitch_bend_sens_coarse: u8,
    pub global_pitch_bend_sens_fine: u8,
    /// -64..+63 semitones.
    pub global_tuning_coarse: i32,
    /// -100..+100 cents.
    pub global_tuning_fine: i32,
    pub global_unison_detune_cents: f64,
    pub enable_midi_note_events: bool,
    pub enable_delay_fx: bool,
    pub delay: DelayParams,
    pub voice: VoiceParams,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            synth_mode: SynthMode::Poly,
            global_volume_db: 0.0,
            global_pitch_bend_sens_coarse: 2,
            global_pitch_bend_sens_fine: 0,
            global_tuning_coarse: 0,
            global_tuning_fine: 0,
            global_unison_detune_cents: 15.0,
            enable_midi_note_events: true,
            enable_delay_fx: false,
            delay: DelayParams::default(),
            voice: VoiceParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let params = SynthParams::default();
        assert_eq!(params.synth_mode, SynthMode::Poly);
        assert!(params.enable_midi_note_events);
        assert_eq!(params.voice.osc[0].core, OscCoreKind::ClassicWt);
        assert!(params.voice.amp_eg.sustain_level > 0.0);
        assert_eq!(params.voice.wave_sequencer.timing_loop_end, MAX_SEQ_STEPS);
    }

    #[test]
    fn test_params_json_round_trip() {
        let params = SynthParams::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: SynthParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
