//! Envelope generators.
//!
//! Two cores share the module shell: a linear ADSR and a DX-style
//! ADSlSR/ADSlR with a slope segment and a curvature blend. Both run
//! their state machine at sample rate but publish only the first
//! sample's value into the modulation outputs (block-rate modulation);
//! the FM operator embeds its own DX core and reads it per sample.

use crate::dsp::modulation::{ModArray, EG_BIASED_OUTPUT, EG_NORMAL_OUTPUT, TRIGGER_MOD};
use crate::midi::MidiNoteEvent;
use crate::params::{
    DxEgContour, EgCoreKind, EgParams, MOD_KNOB_A, MOD_KNOB_B, MOD_KNOB_C, MOD_KNOB_D,
    SHUTDOWN_TIME_MSEC,
};
use crate::dsp::functions::{concave_xform, convex_xform, map_double_value, mod_knob_value_linear, reverse_concave_xform};

pub const MAX_EG_VALUE: f64 = 1.0;

/// Envelope state; `Slope` is only reachable on the DX core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EgState {
    #[default]
    Off,
    Attack,
    Decay,
    Slope,
    Sustain,
    Release,
    Shutdown,
}

/// Linear step increment for a segment time; zero time means "jump".
#[inline]
fn step_inc(time_msec: f64, sample_rate: f64, scale: f64) -> f64 {
    if time_msec == 0.0 || sample_rate == 0.0 {
        return 0.0;
    }
    scale * (1000.0 / (time_msec * sample_rate))
}

/// Linear ADSR core.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearEgCore {
    sample_rate: f64,
    state: EgState,
    envelope_output: f64,
    eg_step_inc: f64,
    inc_shutdown: f64,
    attack_time_scalar: f64,
    decay_time_scalar: f64,
    start_level: f64,
    sustain_override: bool,
    release_pending: bool,
}

impl LinearEgCore {
    pub fn reset(&mut self, params: &EgParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.start_level = params.mod_knob[MOD_KNOB_A];
        self.envelope_output = self.start_level;
        self.state = EgState::Off;
        self.sustain_override = false;
        self.release_pending = false;
    }

    pub fn update(&mut self, params: &EgParams, sustain_pedal_down: bool) {
        self.sustain_override = sustain_pedal_down;
        if self.release_pending && !self.sustain_override {
            self.release_pending = false;
            self.note_off(params);
        }
    }

    pub fn render(&mut self, params: &EgParams, samples_to_process: usize, mod_out: &mut ModArray) {
        for i in 0..samples_to_process {
            match self.state {
                EgState::Off => {
                    if !params.legato_mode {
                        self.envelope_output = self.start_level;
                    }
                }
                EgState::Attack => {
                    self.envelope_output += self.eg_step_inc;
                    if self.envelope_output >= MAX_EG_VALUE
                        || self.attack_time_scalar * params.attack_time_msec <= 0.0
                    {
                        self.envelope_output = MAX_EG_VALUE;
                        self.eg_step_inc = step_inc(
                            self.decay_time_scalar * params.decay_time_msec,
                            self.sample_rate,
                            -1.0,
                        );
                        self.state = EgState::Decay;
                    }
                }
                EgState::Decay => {
                    self.envelope_output += self.eg_step_inc;
                    if self.envelope_output <= params.sustain_level
                        || self.decay_time_scalar * params.decay_time_msec <= 0.0
                    {
                        self.envelope_output = params.sustain_level;
                        self.state = EgState::Sustain;
                    }
                }
                EgState::Sustain => {
                    self.envelope_output = params.sustain_level;
                }
                EgState::Release => {
                    self.envelope_output += self.eg_step_inc;
                    if self.envelope_output <= 0.0 || params.release_time_msec <= 0.0 {
                        self.envelope_output = 0.0;
                        self.state = EgState::Off;
                    }
                }
                EgState::Shutdown => {
                    self.envelope_output += self.inc_shutdown;
                    if self.envelope_output <= 0.0 {
                        self.envelope_output = 0.0;
                        self.state = EgState::Off;
                    }
                }
                EgState::Slope => unreachable!("linear core has no slope segment"),
            }

            if i == 0 {
                mod_out.set_value(EG_NORMAL_OUTPUT, self.envelope_output);
                mod_out.set_value(EG_BIASED_OUTPUT, self.envelope_output - params.sustain_level);
            }
        }
    }

    pub fn note_on(&mut self, params: &EgParams, note_event: &MidiNoteEvent) {
        self.start_level = params.mod_knob[MOD_KNOB_A].min(MAX_EG_VALUE);

        if !params.legato_mode {
            self.envelope_output = self.start_level;
        }

        self.attack_time_scalar = if params.velocity_to_attack_scaling {
            1.0 - note_event.midi_velocity as f64 / 127.0
        } else {
            1.0
        };
        self.decay_time_scalar = if params.note_number_to_decay_scaling {
            1.0 - note_event.midi_note as f64 / 127.0
        } else {
            1.0
        };

        let scale = MAX_EG_VALUE - self.start_level;
        self.eg_step_inc = step_inc(
            scale * self.attack_time_scalar * params.attack_time_msec,
            self.sample_rate,
            1.0,
        );

        if !params.legato_mode {
            self.envelope_output = self.start_level - self.eg_step_inc;
            self.state = EgState::Attack;
        } else if self.state == EgState::Off {
            self.state = EgState::Attack;
        }
    }

    pub fn note_off(&mut self, params: &EgParams) {
        if self.sustain_override {
            self.release_pending = true;
            return;
        }
        self.eg_step_inc = step_inc(params.release_time_msec, self.sample_rate, -1.0);
        if self.envelope_output > 0.0 {
            self.state = EgState::Release;
        } else {
            self.state = EgState::Off;
        }
    }

    pub fn shutdown(&mut self) {
        self.inc_shutdown = -(1000.0 * self.envelope_output) / SHUTDOWN_TIME_MSEC / self.sample_rate;
        self.state = EgState::Shutdown;
        self.sustain_override = false;
        self.release_pending = false;
    }

    pub fn state(&self) -> EgState {
        self.state
    }

    pub fn output(&self) -> f64 {
        self.envelope_output
    }
}

/// DX-style core: ADSlSR / ADSlR with curvature blending and a
/// retrigger modulation input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DxEgCore {
    sample_rate: f64,
    state: EgState,
    envelope_output: f64,
    dx_output: f64,
    eg_step_inc: f64,
    inc_shutdown: f64,
    attack_time_scalar: f64,
    decay_time_scalar: f64,
    start_level: f64,
    release_level: f64,
    sustain_override: bool,
    release_pending: bool,
    note_off: bool,
    retriggered: bool,
    last_trigger_mod: f64,
    /// Set by the FM operator which drives the EG fields directly.
    pub standalone_mode: bool,
}

/// Per-block derived settings for the DX core, resolved from mod knobs
/// unless the owner runs the core standalone (FM operator).
#[derive(Debug, Clone, Copy)]
struct DxSettings {
    decay_level: f64,
    slope_time_msec: f64,
    curvature: f64,
    start_level: f64,
}

impl DxEgCore {
    fn settings(&self, params: &EgParams) -> DxSettings {
        let mut settings = DxSettings {
            decay_level: params.decay_level,
            slope_time_msec: params.slope_time_msec,
            curvature: params.curvature,
            start_level: params.start_level,
        };
        // the panel knobs drive the DX fields except when an FM operator
        // owns the core and writes the fields directly
        if !self.standalone_mode {
            settings.start_level = params.mod_knob[MOD_KNOB_A];
            settings.decay_level = params.mod_knob[MOD_KNOB_B];
            settings.slope_time_msec =
                mod_knob_value_linear(params.mod_knob[MOD_KNOB_C], 0.0, 10000.0);
            settings.curvature = params.mod_knob[MOD_KNOB_D];
        }

        // a zero-length slope with a distinct decay level pops; snap the
        // decay level onto the sustain level in that case
        if settings.slope_time_msec <= 0.1 {
            settings.decay_level = params.sustain_level;
        }
        if settings.decay_level > 0.9 {
            settings.decay_level = 0.9;
        }
        settings
    }

    pub fn reset(&mut self, params: &EgParams, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.start_level = params.mod_knob[MOD_KNOB_A];
        self.envelope_output = self.start_level;
        self.dx_output = self.start_level;
        self.state = EgState::Off;
        self.note_off = false;
        self.retriggered = false;
        self.last_trigger_mod = 0.0;
        self.sustain_override = false;
        self.release_pending = false;
    }

    pub fn update(
        &mut self,
        params: &EgParams,
        sustain_pedal_down: bool,
        mod_in: &ModArray,
    ) {
        self.sustain_override = sustain_pedal_down;

        if self.release_pending && !self.sustain_override {
            self.release_pending = false;
            self.note_off(params);
        } else if !self.note_off {
            // retrigger on a rising edge across 0.5; ignored after note-off
            let retrig = mod_in.value(TRIGGER_MOD);
            if retrig > 0.5 && self.last_trigger_mod <= 0.5 {
                self.state = EgState::Release;
                self.retriggered = true;
            }
            self.last_trigger_mod = retrig;
        }
    }

    pub fn render(&mut self, params: &EgParams, samples_to_process: usize, mod_out: &mut ModArray) {
        let settings = self.settings(params);
        let slope_time = settings.slope_time_msec;
        let mut curve_value = 0.0;

        for i in 0..samples_to_process {
            match self.state {
                EgState::Off => {
                    if !params.legato_mode {
                        self.envelope_output = settings.start_level;
                    }
                }
                EgState::Attack => {
                    self.envelope_output += self.eg_step_inc;
                    curve_value = convex_xform(self.envelope_output);
                    self.retriggered = false;

                    if self.envelope_output >= MAX_EG_VALUE
                        || self.attack_time_scalar * params.attack_time_msec <= 0.0
                    {
                        self.envelope_output = MAX_EG_VALUE;
                        self.eg_step_inc = step_inc(
                            self.decay_time_scalar * params.decay_time_msec,
                            self.sample_rate,
                            -1.0,
                        );
                        self.state = EgState::Decay;
                    }
                }
                EgState::Decay => {
                    self.envelope_output += self.eg_step_inc;

                    // ride the concave curve between decay level and peak
                    let curve_floor = reverse_concave_xform(settings.decay_level);
                    let mapped = map_double_value(
                        self.envelope_output,
                        settings.decay_level,
                        1.0,
                        curve_floor,
                        1.0,
                    );
                    curve_value = concave_xform(mapped);

                    if self.envelope_output <= settings.decay_level
                        || self.decay_time_scalar * params.decay_time_msec <= 0.0
                    {
                        let scale = if settings.decay_level < params.sustain_level {
                            1.0
                        } else {
                            -1.0
                        };
                        self.eg_step_inc = step_inc(slope_time, self.sample_rate, scale);
                        self.envelope_output = settings.decay_level;
                        self.state = EgState::Slope;
                    }
                }
                EgState::Slope => {
                    self.envelope_output += self.eg_step_inc;
                    curve_value = self.envelope_output;

                    let hit_sustain = slope_time <= 0.0
                        || (self.eg_step_inc < 0.0 && self.envelope_output <= params.sustain_level)
                        || (self.eg_step_inc > 0.0 && self.envelope_output >= params.sustain_level)
                        || self.eg_step_inc == 0.0;
                    if hit_sustain {
                        self.envelope_output = params.sustain_level;
                        if params.contour == DxEgContour::Adslr {
                            self.eg_step_inc =
                                step_inc(params.release_time_msec, self.sample_rate, -1.0);
                            self.release_level = self.dx_output;
                            self.state = EgState::Release;
                        } else {
                            self.state = EgState::Sustain;
                        }
                    }
                }
                EgState::Sustain => {
                    self.envelope_output = params.sustain_level;
                    curve_value = params.sustain_level;
                }
                EgState::Release => {
                    self.envelope_output += self.eg_step_inc;

                    let curve_top = reverse_concave_xform(self.release_level.max(1e-9));
                    let mapped = map_double_value(
                        self.envelope_output,
                        0.0,
                        self.release_level.max(1e-9),
                        0.0,
                        curve_top,
                    );
                    curve_value = concave_xform(mapped);

                    if self.envelope_output <= 0.0 || params.release_time_msec <= 0.0 {
                        if self.retriggered {
                            self.envelope_output = settings.start_level;
                            self.eg_step_inc = step_inc(
                                (MAX_EG_VALUE - settings.start_level)
                                    * self.attack_time_scalar
                                    * params.attack_time_msec,
                                self.sample_rate,
                                1.0,
                            );
                            self.state = EgState::Attack;
                        } else {
                            self.envelope_output = 0.0;
                            self.state = EgState::Off;
                        }
                    }
                }
                EgState::Shutdown => {
                    self.envelope_output += self.inc_shutdown;
                    if self.envelope_output <= 0.0 {
                        self.envelope_output = 0.0;
                        self.state = EgState::Off;
                    }
                }
            }

            self.dx_output = settings.curvature * curve_value
                + (1.0 - settings.curvature) * self.envelope_output;

            if i == 0 {
                mod_out.set_value(EG_NORMAL_OUTPUT, self.dx_output);
                mod_out.set_value(EG_BIASED_OUTPUT, self.dx_output - params.sustain_level);
            }
        }
    }

    /// One state-machine tick; the FM operator calls this per sample and
    /// reads [`DxEgCore::output`] directly.
    pub fn render_sample(&mut self, params: &EgParams) -> f64 {
        let mut scratch = ModArray::new();
        self.render(params, 1, &mut scratch);
        self.dx_output
    }

    pub fn note_on(&mut self, params: &EgParams, note_event: &MidiNoteEvent) {
        let settings = self.settings(params);
        self.start_level = settings.start_level.min(MAX_EG_VALUE);

        if !params.legato_mode {
            self.envelope_output = self.start_level;
        }

        self.attack_time_scalar = if params.velocity_to_attack_scaling {
            1.0 - note_event.midi_velocity as f64 / 127.0
        } else {
            1.0
        };
        self.decay_time_scalar = if params.note_number_to_decay_scaling {
            1.0 - note_event.midi_note as f64 / 127.0
        } else {
            1.0
        };

        let scale = MAX_EG_VALUE - self.start_level;
        self.eg_step_inc = step_inc(
            scale * self.attack_time_scalar * params.attack_time_msec,
            self.sample_rate,
            1.0,
        );

        if !params.legato_mode {
            self.envelope_output = self.start_level - self.eg_step_inc;
            self.state = EgState::Attack;
        } else if self.state == EgState::Off {
            self.state = EgState::Attack;
        }

        self.note_off = false;
        self.retriggered = false;
        self.last_trigger_mod = 0.0;
    }

    pub fn note_off(&mut self, params: &EgParams) {
        if self.sustain_override {
            self.release_pending = true;
            return;
        }
        self.eg_step_inc = step_inc(params.release_time_msec, self.sample_rate, -1.0);
        self.release_level = self.dx_output;

        if self.envelope_output > 0.0 {
            self.state = EgState::Release;
        } else {
            self.state = EgState::Off;
        }
        self.note_off = true;
    }

    pub fn shutdown(&mut self) {
        self.inc_shutdown = -(1000.0 * self.envelope_output) / SHUTDOWN_TIME_MSEC / self.sample_rate;
        self.state = EgState::Shutdown;
        self.sustain_override = false;
        self.release_pending = false;
    }

    pub fn state(&self) -> EgState {
        self.state
    }

    pub fn output(&self) -> f64 {
        self.dx_output
    }
}

enum EgCore {
    Linear(LinearEgCore),
    Dx(DxEgCore),
}

/// The envelope generator module: core + modulation arrays.
pub struct EnvelopeGenerator {
    core: EgCore,
    core_kind: EgCoreKind,
    mod_in: ModArray,
    mod_out: ModArray,
}

impl EnvelopeGenerator {
    pub fn new(core_kind: EgCoreKind) -> Self {
        Self {
            core: Self::make_core(core_kind),
            core_kind,
            mod_in: ModArray::new(),
            mod_out: ModArray::new(),
        }
    }

    fn make_core(core_kind: EgCoreKind) -> EgCore {
        match core_kind {
            EgCoreKind::LinearEg => EgCore::Linear(LinearEgCore::default()),
            EgCoreKind::DxEg => EgCore::Dx(DxEgCore::default()),
        }
    }

    pub fn core_kind(&self) -> EgCoreKind {
        self.core_kind
    }

    /// Swap the core; the envelope restarts from Off.
    pub fn select_core(&mut self, core_kind: EgCoreKind, params: &EgParams, sample_rate: f64) {
        self.core_kind = core_kind;
        self.core = Self::make_core(core_kind);
        self.reset(params, sample_rate);
    }

    pub fn reset(&mut self, params: &EgParams, sample_rate: f64) {
        match &mut self.core {
            EgCore::Linear(core) => core.reset(params, sample_rate),
            EgCore::Dx(core) => core.reset(params, sample_rate),
        }
        self.mod_out.clear();
    }

    pub fn update(&mut self, params: &EgParams, sustain_pedal_down: bool) {
        match &mut self.core {
            EgCore::Linear(core) => core.update(params, sustain_pedal_down),
            EgCore::Dx(core) => core.update(params, sustain_pedal_down, &self.mod_in),
        }
    }

    pub fn render(&mut self, params: &EgParams, samples_to_process: usize) {
        match &mut self.core {
            EgCore::Linear(core) => core.render(params, samples_to_process, &mut self.mod_out),
            EgCore::Dx(core) => core.render(params, samples_to_process, &mut self.mod_out),
        }
    }

    pub fn note_on(&mut self, params: &EgParams, note_event: &MidiNoteEvent) {
        match &mut self.core {
            EgCore::Linear(core) => core.note_on(params, note_event),
            EgCore::Dx(core) => core.note_on(params, note_event),
        }
    }

    pub fn note_off(&mut self, params: &EgParams) {
        match &mut self.core {
            EgCore::Linear(core) => core.note_off(params),
            EgCore::Dx(core) => core.note_off(params),
        }
    }

    /// Begin the short linear steal ramp.
    pub fn shutdown(&mut self) {
        match &mut self.core {
            EgCore::Linear(core) => core.shutdown(),
            EgCore::Dx(core) => core.shutdown(),
        }
    }

    pub fn state(&self) -> EgState {
        match &self.core {
            EgCore::Linear(core) => core.state(),
            EgCore::Dx(core) => core.state(),
        }
    }

    pub fn output(&self) -> f64 {
        match &self.core {
            EgCore::Linear(core) => core.output(),
            EgCore::Dx(core) => core.output(),
        }
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
