//! Wave sequencer: a four-lane step machine that generates modulation,
//! not audio. It is the brain of the wave-sequence flavor - everything
//! the wave-sequencing oscillators do (which waveform, how loud, what
//! pitch offset, how the A/B pair crossfades) is driven by the values
//! this module deposits into its modulation outputs each block.
//!
//! # The Lane Model
//!
//! Four parallel lanes each own eight [`LaneStep`]s:
//!
//! - **Timing lane** - step duration and crossfade duration per step.
//!   This lane is the clock: when it advances, every other lane advances
//!   with it, so the four lanes always point at steps "in step".
//! - **Wave lane** - the waveform index pair (A = current step, B = next
//!   step) that the oscillators crossfade between.
//! - **Pitch lane** - a semitone offset per step.
//! - **Step-sequencer lane** - a generic bipolar modulation value,
//!   routable anywhere through the matrix (filter cutoff is the classic
//!   target).
//!
//! # Jump Tables and Looping
//!
//! A lane never walks its step array directly; it walks an 8-entry
//! *jump table* (a permutation of 0..7). With the identity table the
//! sequence is simply 0-1-2-...-7, but when `randomize_*_order` is on
//! the table is reshuffled every time the lane hits a loop endpoint, so
//! each pass through the loop plays the steps in a new order while still
//! visiting each exactly once. Loop start/end points are expressed by
//! threading next/previous links onto the endpoint steps; everything in
//! between links implicitly to its neighbor. Directions are `Forward`,
//! `Backward`, and `ForwardBackward` (ping-pong), which flips the lane's
//! running direction at each endpoint.
//!
//! # Hold / Crossfade Timing
//!
//! The [`XHoldFader`] runs the step clock: it counts through a *hold*
//! period at full A gain, then produces constant-power (A, B) gain pairs
//! over the *crossfade* period, and finally raises `crossfade_finished`.
//! That flag is the "latch now" moment: each lane promotes its next step
//! to current, loads a new next step (rolling its probability and
//! reshuffling if an endpoint was crossed), and the fader is re-armed.
//! Two timing subtleties are preserved from the original design:
//!
//! - The crossfade may never exceed the shorter of the two neighboring
//!   step durations (`set_current_timing_xfade_samples`).
//! - The very first step after note-on has **no** fade-in, so its hold
//!   is `duration - xfade/2`; from then on each step's hold subtracts
//!   the fade-in it just received, which is half the previous crossfade.
//!
//! # Probability and Rest Steps
//!
//! At note-on every mod-lane step draws a uniform number against its
//! probability percentage; losers are flagged null for that note and
//! hold the previous step's value instead of advancing it. Timing-lane
//! steps can also be marked `Rest`, which gates the corresponding wave
//! mix output to zero while the clock keeps running.
//!
//! # Outputs
//!
//! On the last sample of every block the sequencer writes its modulation
//! outputs: `WS_WAVE_MIX_A/B` (crossfade gains, rest-gated),
//! `WS_WAVE_INDEX_A/B`, `WS_WAVE_STEP_NUMBER_A/B`, `WS_WAVE_AMP_MOD_A/B`
//! (per-step dB trims), `WS_PITCH_MOD_A/B`, `WS_STEP_SEQ_MOD` (optionally
//! interpolated across the crossfade), and the one-shot `WS_XFADE_DONE`
//! flag the oscillators use to rotate their round-robin pair. The
//! voice's matrix hardwires all of these into the WS oscillators.

use crate::dsp::functions::{const_power_xfade, get_time_from_tempo, map_double_value};
use crate::dsp::modulation::{
    ModArray, WS_PITCH_MOD_A, WS_PITCH_MOD_B, WS_STEP_SEQ_MOD, WS_WAVE_AMP_MOD_A,
    WS_WAVE_AMP_MOD_B, WS_WAVE_INDEX_A, WS_WAVE_INDEX_B, WS_WAVE_MIX_A, WS_WAVE_MIX_B,
    WS_WAVE_STEP_NUMBER_A, WS_WAVE_STEP_NUMBER_B, WS_XFADE_DONE,
};
use crate::params::{
    LoopDirection, StepMode, WaveSequencerParams, MAX_SEQ_STEPS, PITCH_LANE, STEP_SEQ_LANE,
    WAVE_LANE,
};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Gains and status produced by the hold/crossfade state machine.
#[derive(Debug, Clone, Copy)]
pub struct XFadeData {
    pub linear_gain: [f64; 2],
    pub const_pwr_gain: [f64; 2],
    pub crossfade_finished: bool,
}

/// Counts through a hold period, then fades A into B over the crossfade
/// period; `crossfade_finished` fires on the sample after the fade ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct XHoldFader {
    hold_time_samples: u32,
    xfade_time_samples: u32,
    counter: u32,
}

impl XHoldFader {
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn set_hold_time_samples(&mut self, hold_time_samples: u32) {
        self.hold_time_samples = hold_time_samples;
        self.counter = 0;
    }

    pub fn set_xfade_time_samples(&mut self, xfade_time_samples: u32) {
        self.xfade_time_samples = xfade_time_samples;
    }

    pub fn xfade_time_samples(&self) -> u32 {
        self.xfade_time_samples
    }

    pub fn get_crossfade_data(&mut self) -> XFadeData {
        if self.counter < self.hold_time_samples {
            self.counter += 1;
            return XFadeData {
                linear_gain: [1.0, 0.0],
                const_pwr_gain: [1.0, 0.0],
                crossfade_finished: false,
            };
        }

        let fade_position = self.counter - self.hold_time_samples;
        if fade_position >= self.xfade_time_samples {
            return XFadeData {
                linear_gain: [0.0, 1.0],
                const_pwr_gain: [0.0, 1.0],
                crossfade_finished: true,
            };
        }

        let frac = fade_position as f64 / self.xfade_time_samples as f64;
        let (gain_a, gain_b) = const_power_xfade(frac);
        self.counter += 1;
        XFadeData {
            linear_gain: [1.0 - frac, frac],
            const_pwr_gain: [gain_a, gain_b],
            crossfade_finished: false,
        }
    }
}

/// One step of one lane.
#[derive(Debug, Clone, Copy)]
pub struct LaneStep {
    step_value: f64,
    step_duration_samples: u32,
    xfade_duration_samples: u32,
    /// Running copies, re-clamped each time the step is entered.
    pub step_duration_samples_running: u32,
    pub xfade_duration_samples_running: u32,
    probability_pct: f64,
    next_step_index: i32,
    previous_step_index: i32,
    is_null: bool,
}

impl Default for LaneStep {
    fn default() -> Self {
        Self {
            step_value: 0.0,
            step_duration_samples: 0,
            xfade_duration_samples: 0,
            step_duration_samples_running: 0,
            xfade_duration_samples_running: 0,
            probability_pct: 100.0,
            next_step_index: -1,
            previous_step_index: -1,
            is_null: false,
        }
    }
}

impl LaneStep {
    fn init_step_timing(&mut self) {
        self.step_duration_samples_running = self.step_duration_samples;
        self.xfade_duration_samples_running = self.xfade_duration_samples;
    }

    fn update_step_probability(&mut self, rng: &mut SmallRng) {
        let draw = rng.gen_range(0.0..100.0);
        self.is_null = draw > self.probability_pct;
    }

    pub fn step_value(&self) -> f64 {
        self.step_value
    }

    pub fn is_null_step(&self) -> bool {
        self.is_null
    }
}

/// A lane: eight steps plus the jump table that orders them. The jump
/// table is an 8-entry permutation reshuffled at loop points when
/// randomization is on.
pub struct Lane {
    pub lane_step: [LaneStep; MAX_SEQ_STEPS],
    pub current_step: LaneStep,
    pub next_step: LaneStep,
    pub start_point: usize,
    pub end_point: usize,
    pub forward_direction: bool,
    pub current_led_step: usize,
    pub current_led_step_duration: u32,

    jump_table: [usize; MAX_SEQ_STEPS],
    jump_table_index: usize,
    current_step_index: usize,
    next_step_index: usize,
    current_step_value: f64,
    next_step_value: f64,
    randomize_steps: bool,
    rng: SmallRng,
}

impl Default for Lane {
    fn default() -> Self {
        let mut lane = Self {
            lane_step: [LaneStep::default(); MAX_SEQ_STEPS],
            current_step: LaneStep::default(),
            next_step: LaneStep::default(),
            start_point: 0,
            end_point: MAX_SEQ_STEPS - 1,
            forward_direction: true,
            current_led_step: 0,
            current_led_step_duration: 0,
            jump_table: [0; MAX_SEQ_STEPS],
            jump_table_index: 0,
            current_step_index: 0,
            next_step_index: 0,
            current_step_value: 0.0,
            next_step_value: 0.0,
            randomize_steps: false,
            rng: SmallRng::from_entropy(),
        };
        lane.reset_jump_table();
        lane
    }
}

impl Lane {
    pub fn reset_jump_table(&mut self) {
        for (i, entry) in self.jump_table.iter_mut().enumerate() {
            *entry = i;
        }
    }

    fn shuffle_jump_table(&mut self) {
        self.jump_table.shuffle(&mut self.rng);
    }

    pub fn jump_table_value(&self, index: usize) -> usize {
        if index > MAX_SEQ_STEPS - 1 {
            return 0;
        }
        self.jump_table[index]
    }

    /// Re-thread the next/previous links so only the loop endpoints jump.
    pub fn update_lane_loop_points(&mut self) {
        for i in 0..MAX_SEQ_STEPS {
            let step = self.jump_table_value(i);
            self.lane_step[step].previous_step_index = if i == self.start_point {
                self.jump_table_value(self.end_point) as i32
            } else {
                -1
            };
            self.lane_step[step].next_step_index = if i == self.end_point {
                self.jump_table_value(self.start_point) as i32
            } else {
                -1
            };
        }
    }

    pub fn set_randomize_steps(&mut self, randomize_steps: bool) {
        if self.randomize_steps != randomize_steps {
            self.randomize_steps = randomize_steps;
            if !randomize_steps {
                self.reset_jump_table();
            }
        }
    }

    pub fn init_current_step(&mut self, jump_index: usize) {
        self.jump_table_index = jump_index;
        self.current_step_index = self.jump_table[jump_index];
        self.lane_step[self.current_step_index].init_step_timing();
        self.current_step = self.lane_step[self.current_step_index];
        self.current_step_value = self.current_step.step_value;
    }

    pub fn init_next_step(&mut self, direction: LoopDirection, apply_probability: bool) {
        let forward_backward = direction == LoopDirection::ForwardBackward;
        let next = self.find_next_step_index(forward_backward).0;
        self.load_step_as_next(next, apply_probability);
    }

    /// Promote the pending next step to current.
    pub fn set_current_step_from_next_step(&mut self) {
        self.current_step = self.lane_step[self.next_step_index];
        self.current_step_index = self.next_step_index;
        if !self.current_step.is_null {
            self.current_step_value = self.current_step.step_value;
        }
    }

    /// Advance to the following step, reshuffling at loop points when
    /// randomization is on. Returns true if a loop point was hit.
    pub fn load_next_step(&mut self, direction: LoopDirection, apply_probability: bool) -> bool {
        let forward_backward = direction == LoopDirection::ForwardBackward;
        let (next, looped) = self.find_next_step_index(forward_backward);

        if looped && self.randomize_steps {
            self.shuffle_jump_table();
            self.update_lane_loop_points();
        }

        self.load_step_as_next(next, apply_probability);
        looped
    }

    fn load_step_as_next(&mut self, next: usize, apply_probability: bool) {
        self.next_step_index = next;
        self.lane_step[next].init_step_timing();
        self.next_step = self.lane_step[next];

        // the roll lives on the working copy; the per-note-on roll in the
        // step array is what persists across the loop
        if apply_probability {
            self.next_step.update_step_probability(&mut self.rng);
        }

        self.next_step_value = if self.next_step.is_null {
            self.current_step.step_value
        } else {
            self.next_step.step_value
        };
    }

    /// Walk the jump table honoring direction and the loop-point links;
    /// returns (next step index, hit a loop point).
    fn find_next_step_index(&mut self, forward_backward: bool) -> (usize, bool) {
        let next_index = (self.jump_table_index + 1) & (MAX_SEQ_STEPS - 1);
        let previous_index =
            (self.jump_table_index + MAX_SEQ_STEPS - 1) & (MAX_SEQ_STEPS - 1);

        if self.forward_direction {
            if self.current_step.next_step_index < 0 {
                self.jump_table_index = next_index;
                (self.jump_table[next_index], false)
            } else if forward_backward {
                self.jump_table_index = previous_index;
                self.forward_direction = false;
                (self.jump_table[previous_index], true)
            } else {
                let next = self.current_step.next_step_index as usize;
                self.jump_table_index = next;
                (next, true)
            }
        } else if self.current_step.previous_step_index < 0 {
            self.jump_table_index = previous_index;
            (self.jump_table[previous_index], false)
        } else if forward_backward {
            self.jump_table_index = next_index;
            self.forward_direction = true;
            (self.jump_table[next_index], true)
        } else {
            let next = self.current_step.previous_step_index as usize;
            self.jump_table_index = next;
            (next, true)
        }
    }

    pub fn update_led_meter_with_current_step(&mut self) {
        self.current_led_step = self.current_step_index;
        self.current_led_step_duration = self.current_step.step_duration_samples_running;
    }

    pub fn update_led_meter_with_next_step(&mut self) {
        self.current_led_step = self.next_step_index;
        self.current_led_step_duration = self.next_step.step_duration_samples_running;
    }

    pub fn update_step_values(&mut self) {
        if !self.current_step.is_null {
            self.current_step_value = self.current_step.step_value;
        }
        if !self.next_step.is_null {
            self.next_step_value = self.next_step.step_value;
        }
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn next_step_index(&self) -> usize {
        self.next_step_index
    }

    pub fn current_step_value(&self) -> f64 {
        self.current_step_value
    }

    pub fn next_step_value(&self) -> f64 {
        self.next_step_value
    }
}

/// Lane activity lights for a UI; 1 marks the sounding step.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaveSequencerStatusMeters {
    pub timing_lane_meter: [u32; MAX_SEQ_STEPS],
    pub wave_lane_meter: [u32; MAX_SEQ_STEPS],
    pub pitch_lane_meter: [u32; MAX_SEQ_STEPS],
    pub step_seq_lane_meter: [u32; MAX_SEQ_STEPS],
}

pub struct WaveSequencer {
    mod_out: ModArray,
    timing_lane: Lane,
    wave_lane: Lane,
    pitch_lane: Lane,
    step_seq_lane: Lane,
    x_hold_fader: XHoldFader,
    initial_step: bool,
    sample_counter: u32,
    sample_rate: f64,
    samples_per_msec: f64,
    status_meters: WaveSequencerStatusMeters,
}

impl Default for WaveSequencer {
    fn default() -> Self {
        let mut sequencer = Self {
            mod_out: ModArray::new(),
            timing_lane: Lane::default(),
            wave_lane: Lane::default(),
            pitch_lane: Lane::default(),
            step_seq_lane: Lane::default(),
            x_hold_fader: XHoldFader::default(),
            initial_step: false,
            sample_counter: 0,
            sample_rate: 0.0,
            samples_per_msec: 0.0,
            status_meters: WaveSequencerStatusMeters::default(),
        };
        // first loop points: last step wraps to the first
        for lane in [
            &mut sequencer.timing_lane,
            &mut sequencer.wave_lane,
            &mut sequencer.pitch_lane,
            &mut sequencer.step_seq_lane,
        ] {
            lane.lane_step[0].previous_step_index = (MAX_SEQ_STEPS - 1) as i32;
            lane.lane_step[MAX_SEQ_STEPS - 1].next_step_index = 0;
        }
        sequencer
    }
}

impl WaveSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.samples_per_msec = sample_rate / 1000.0;
        self.sample_counter = 0;
    }

    pub fn status_meters(&self) -> &WaveSequencerStatusMeters {
        &self.status_meters
    }

    pub fn mod_out(&self) -> &ModArray {
        &self.mod_out
    }

    /// Uniform stretch/shrink multiplier from the [-5, +5] control.
    fn time_stretch_multiplier(time_stretch: f64) -> f64 {
        let mapped = map_double_value(time_stretch.clamp(-5.0, 5.0), -5.0, 5.0, 1.0, 9.0);
        if mapped >= 5.0 {
            mapped - 5.0 + 1.0
        } else {
            1.0 / (5.0 - mapped + 1.0)
        }
    }

    pub fn update(&mut self, params: &WaveSequencerParams, bpm: f64) {
        // forward/backward changes latch at loop boundaries, not here
        match params.timing_loop_direction {
            LoopDirection::Forward => self.timing_lane.forward_direction = true,
            LoopDirection::Backward => self.timing_lane.forward_direction = false,
            LoopDirection::ForwardBackward => {}
        }
        for (lane, index) in [
            (&mut self.wave_lane, WAVE_LANE),
            (&mut self.pitch_lane, PITCH_LANE),
            (&mut self.step_seq_lane, STEP_SEQ_LANE),
        ] {
            match params.mod_loop_direction[index] {
                LoopDirection::Forward => lane.forward_direction = true,
                LoopDirection::Backward => lane.forward_direction = false,
                LoopDirection::ForwardBackward => {}
            }
        }

        let stretch = Self::time_stretch_multiplier(params.time_stretch);

        for i in 0..MAX_SEQ_STEPS {
            let step_msec =
                get_time_from_tempo(bpm, params.step_duration[i]) * 1000.0 * stretch;
            let xfade_msec =
                get_time_from_tempo(bpm, params.xfade_duration[i]) * 1000.0 * stretch;

            self.timing_lane.lane_step[i].step_duration_samples =
                (step_msec * self.samples_per_msec) as u32;
            self.timing_lane.lane_step[i].xfade_duration_samples =
                (xfade_msec * self.samples_per_msec) as u32;

            self.wave_lane.lane_step[i].step_value = params.wave_lane_value[i];
            self.wave_lane.lane_step[i].probability_pct = params.wave_lane_probability_pct[i];

            self.pitch_lane.lane_step[i].step_value = params.pitch_lane_value[i];
            self.pitch_lane.lane_step[i].probability_pct = params.pitch_lane_probability_pct[i];

            self.step_seq_lane.lane_step[i].step_value = params.step_seq_value[i];
            self.step_seq_lane.lane_step[i].probability_pct = params.step_seq_probability_pct[i];
        }

        // panel loop points are 1-indexed
        self.timing_lane.start_point = params.timing_loop_start.saturating_sub(1);
        self.timing_lane.end_point = params.timing_loop_end.saturating_sub(1);
        self.timing_lane.set_randomize_steps(params.randomize_step_order);
        self.timing_lane.update_lane_loop_points();

        self.wave_lane.start_point = params.mod_loop_start[WAVE_LANE].saturating_sub(1);
        self.wave_lane.end_point = params.mod_loop_end[WAVE_LANE].saturating_sub(1);
        self.wave_lane.set_randomize_steps(params.randomize_wave_order);
        self.wave_lane.update_lane_loop_points();

        self.pitch_lane.start_point = params.mod_loop_start[PITCH_LANE].saturating_sub(1);
        self.pitch_lane.end_point = params.mod_loop_end[PITCH_LANE].saturating_sub(1);
        self.pitch_lane.set_randomize_steps(params.randomize_pitch_order);
        self.pitch_lane.update_lane_loop_points();

        self.step_seq_lane.start_point = params.mod_loop_start[STEP_SEQ_LANE].saturating_sub(1);
        self.step_seq_lane.end_point = params.mod_loop_end[STEP_SEQ_LANE].saturating_sub(1);
        self.step_seq_lane
            .set_randomize_steps(params.randomize_ss_mod_order);
        self.step_seq_lane.update_lane_loop_points();

        self.wave_lane.update_step_values();
        self.pitch_lane.update_step_values();
        self.step_seq_lane.update_step_values();
    }

    pub fn clear_status_array(&mut self) {
        self.status_meters = WaveSequencerStatusMeters::default();
    }

    /// Crossfade may never exceed the shorter of the two step lengths.
    fn set_current_timing_xfade_samples(&mut self) -> u32 {
        let max_xfade = self
            .timing_lane
            .current_step
            .step_duration_samples_running
            .min(self.timing_lane.next_step.step_duration_samples_running);
        let clamped = self
            .timing_lane
            .current_step
            .xfade_duration_samples_running
            .min(max_xfade);
        self.timing_lane.current_step.xfade_duration_samples_running = clamped;
        clamped
    }

    fn set_xfade_hold_params(&mut self, xfade_in_time_samples: u32) {
        let duration = self.timing_lane.current_step.step_duration_samples_running;
        let xfade = self.timing_lane.current_step.xfade_duration_samples_running;
        let hold = duration
            .saturating_sub(xfade_in_time_samples)
            .saturating_sub(xfade / 2);

        self.x_hold_fader.set_hold_time_samples(hold);
        self.x_hold_fader.set_xfade_time_samples(xfade);
    }

    fn advance_all_lanes(&mut self, params: &WaveSequencerParams) {
        self.wave_lane.set_current_step_from_next_step();
        self.pitch_lane.set_current_step_from_next_step();
        self.step_seq_lane.set_current_step_from_next_step();

        // timing controls the next layer
        self.timing_lane.set_current_step_from_next_step();
        self.timing_lane
            .load_next_step(params.timing_loop_direction, false);

        self.wave_lane
            .load_next_step(params.mod_loop_direction[WAVE_LANE], true);
        self.pitch_lane
            .load_next_step(params.mod_loop_direction[PITCH_LANE], true);
        self.step_seq_lane
            .load_next_step(params.mod_loop_direction[STEP_SEQ_LANE], true);
    }

    pub fn render(&mut self, params: &WaveSequencerParams, bpm: f64, samples_to_process: usize) {
        if params.halt_sequencer {
            return;
        }

        self.update(params, bpm);
        let mut xfade_done = false;
        let mut xfade_params = XFadeData {
            linear_gain: [1.0, 0.0],
            const_pwr_gain: [1.0, 0.0],
            crossfade_finished: false,
        };

        for i in 0..samples_to_process {
            self.sample_counter += 1;

            xfade_params = self.x_hold_fader.get_crossfade_data();

            if xfade_params.crossfade_finished {
                xfade_done = true;

                if self.initial_step {
                    self.advance_all_lanes(params);
                    self.set_current_timing_xfade_samples();

                    // the first boundary carries the whole fade-in
                    let xfade_in = self.x_hold_fader.xfade_time_samples();
                    self.set_xfade_hold_params(xfade_in);
                    self.initial_step = false;
                } else {
                    self.advance_all_lanes(params);
                    self.set_current_timing_xfade_samples();

                    // later boundaries only carry half the fade-in
                    let xfade_in = self.x_hold_fader.xfade_time_samples() / 2;
                    self.set_xfade_hold_params(xfade_in);
                }
            }

            // LED bookkeeping
            if self.timing_lane.current_led_step_duration == self.sample_counter {
                self.timing_lane.update_led_meter_with_next_step();
                self.wave_lane.update_led_meter_with_next_step();
                self.pitch_lane.update_led_meter_with_next_step();
                self.step_seq_lane.update_led_meter_with_next_step();

                self.clear_status_array();
                self.status_meters.timing_lane_meter[self.timing_lane.current_led_step] = 1;
                if !self.wave_lane.next_step.is_null_step() {
                    self.status_meters.wave_lane_meter[self.wave_lane.current_led_step] = 1;
                }
                if !self.pitch_lane.next_step.is_null_step() {
                    self.status_meters.pitch_lane_meter[self.pitch_lane.current_led_step] = 1;
                }
                if !self.step_seq_lane.next_step.is_null_step() {
                    self.status_meters.step_seq_lane_meter[self.step_seq_lane.current_led_step] =
                        1;
                }
                self.sample_counter = 0;
            }

            // modulation outputs latch on the last sample of the block
            if i == samples_to_process - 1 {
                self.mod_out
                    .set_value(WS_XFADE_DONE, if xfade_done { 1.0 } else { 0.0 });

                let current_is_rest = params.step_type
                    [self.timing_lane.current_step_index()]
                    == StepMode::Rest;
                let next_is_rest =
                    params.step_type[self.timing_lane.next_step_index()] == StepMode::Rest;

                self.mod_out.set_value(
                    WS_WAVE_MIX_A,
                    if current_is_rest {
                        0.0
                    } else {
                        xfade_params.const_pwr_gain[0]
                    },
                );
                self.mod_out.set_value(
                    WS_WAVE_MIX_B,
                    if next_is_rest {
                        0.0
                    } else {
                        xfade_params.const_pwr_gain[1]
                    },
                );

                self.mod_out.set_value(
                    WS_WAVE_STEP_NUMBER_A,
                    self.wave_lane.current_step_index() as f64,
                );
                self.mod_out.set_value(
                    WS_WAVE_STEP_NUMBER_B,
                    self.wave_lane.next_step_index() as f64,
                );

                self.mod_out
                    .set_value(WS_WAVE_INDEX_A, self.wave_lane.current_step_value());
                self.mod_out
                    .set_value(WS_WAVE_INDEX_B, self.wave_lane.next_step_value());

                // amplitudes are locked to waveforms; no separate lane
                self.mod_out.set_value(
                    WS_WAVE_AMP_MOD_A,
                    params.wave_lane_amp_db[self.pitch_lane.current_step_index()],
                );
                self.mod_out.set_value(
                    WS_WAVE_AMP_MOD_B,
                    params.wave_lane_amp_db[self.pitch_lane.next_step_index()],
                );

                self.mod_out
                    .set_value(WS_PITCH_MOD_A, self.pitch_lane.current_step_value());
                self.mod_out
                    .set_value(WS_PITCH_MOD_B, self.pitch_lane.next_step_value());

                if params.interpolate_step_seq_mod {
                    let interpolated = xfade_params.linear_gain[0]
                        * self.step_seq_lane.current_step_value()
                        + xfade_params.linear_gain[1] * self.step_seq_lane.next_step_value();
                    self.mod_out.set_value(WS_STEP_SEQ_MOD, interpolated);
                } else {
                    self.mod_out
                        .set_value(WS_STEP_SEQ_MOD, self.step_seq_lane.current_step_value());
                }
            }
        }
    }

    pub fn note_on(&mut self, params: &WaveSequencerParams, bpm: f64) {
        self.timing_lane.reset_jump_table();
        self.wave_lane.reset_jump_table();
        self.pitch_lane.reset_jump_table();
        self.step_seq_lane.reset_jump_table();

        self.update(params, bpm);

        self.mod_out.clear();

        self.x_hold_fader.reset();
        self.initial_step = true;
        self.sample_counter = 0;

        // per-note probability roll for every mod-lane step
        for i in 0..MAX_SEQ_STEPS {
            let wave_rng = &mut self.wave_lane.rng;
            self.wave_lane.lane_step[i].update_step_probability(wave_rng);
            let pitch_rng = &mut self.pitch_lane.rng;
            self.pitch_lane.lane_step[i].update_step_probability(pitch_rng);
            let ss_rng = &mut self.step_seq_lane.rng;
            self.step_seq_lane.lane_step[i].update_step_probability(ss_rng);
        }

        // load the first pair of steps on every lane
        let timing_start = self.timing_lane.start_point;
        self.timing_lane.current_led_step = timing_start;
        self.timing_lane.init_current_step(timing_start);
        self.timing_lane
            .init_next_step(params.timing_loop_direction, false);
        self.set_current_timing_xfade_samples();

        let wave_start = self.wave_lane.start_point;
        self.wave_lane.init_current_step(wave_start);
        self.wave_lane
            .init_next_step(params.mod_loop_direction[WAVE_LANE], true);

        let pitch_start = self.pitch_lane.start_point;
        self.pitch_lane.init_current_step(pitch_start);
        self.pitch_lane
            .init_next_step(params.mod_loop_direction[PITCH_LANE], true);

        let ss_start = self.step_seq_lane.start_point;
        self.step_seq_lane.init_current_step(ss_start);
        self.step_seq_lane
            .init_next_step(params.mod_loop_direction[STEP_SEQ_LANE], true);

        // the very first step has no fade-in; the fade-out midpoint sets
        // the hold time
        let xfade_out_half = self.timing_lane.current_step.xfade_duration_samples_running / 2;
        let hold = self
            .timing_lane
            .current_step
            .step_duration_samples_running
            .saturating_sub(xfade_out_half);
        self.x_hold_fader.set_hold_time_samples(hold);
        self.x_hold_fader.set_xfade_time_samples(
            self.timing_lane.current_step.xfade_duration_samples_running,
        );

        self.timing_lane.update_led_meter_with_current_step();
        self.wave_lane.update_led_meter_with_current_step();
        self.pitch_lane.update_led_meter_with_current_step();
        self.step_seq_lane.update_led_meter_with_current_step();

        self.clear_status_array();
        self.status_meters.timing_lane_meter[self.timing_lane.current_led_step] = 1;
        self.status_meters.wave_lane_meter[self.wave_lane.current_led_step] = 1;
        self.status_meters.pitch_lane_meter[self.pitch_lane.current_led_step] = 1;
        self.status_meters.step_seq_lane_meter[self.step_seq_lane.current_led_step] = 1;
    }

    pub fn note_off(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::functions::NoteDuration;
    use approx::assert_relative_eq;

    const FS: f64 = 48000.0;

    /// BPM that makes a quarter note exactly 1000 samples at 48 kHz:
    /// 60/bpm * 48000 = 1000 -> bpm = 2880.
    const BPM_1000: f64 = 2880.0;

    fn sequencer_with(params: &WaveSequencerParams) -> WaveSequencer {
        let mut sequencer = WaveSequencer::new();
        sequencer.reset(FS);
        sequencer.note_on(params, BPM_1000);
        sequencer
    }

    #[test]
    fn test_xhold_fader_contract() {
        let mut fader = XHoldFader::default();
        fader.set_hold_time_samples(900);
        fader.set_xfade_time_samples(200);

        // hold: full A gain
        for _ in 0..900 {
            let data = fader.get_crossfade_data();
            assert_eq!(data.const_pwr_gain[0], 1.0);
            assert!(!data.crossfade_finished);
        }
        // fade: constant power throughout
        for _ in 0..200 {
            let data = fader.get_crossfade_data();
            assert!(!data.crossfade_finished);
            let power = data.const_pwr_gain[0] * data.const_pwr_gain[0]
                + data.const_pwr_gain[1] * data.const_pwr_gain[1];
            assert_relative_eq!(power, 1.0, epsilon = 1e-9);
        }
        // done
        let data = fader.get_crossfade_data();
        assert!(data.crossfade_finished);
        assert_eq!(data.const_pwr_gain[1], 1.0);
    }

    #[test]
    fn test_first_step_crossfade_timing() {
        // 1000-sample steps with a 200-sample crossfade: hold to 900,
        // constant-power fade 900..1100, xfade-done flag at 1100
        let params = WaveSequencerParams {
            step_duration: [NoteDuration::Quarter; MAX_SEQ_STEPS],
            xfade_duration: [NoteDuration::DottedEighth; MAX_SEQ_STEPS], // unused below
            ..WaveSequencerParams::default()
        };
        // dial the xfade to exactly 200 samples: 200/48000 s at 2880 bpm
        // = 0.2 quarter beats -> use the sixteenth-triplet slot instead
        // and verify against the sequencer's own clamped numbers.
        let mut params = params;
        params.xfade_duration = [NoteDuration::SixteenthTriplet; MAX_SEQ_STEPS];

        let mut sequencer = sequencer_with(&params);
        let xfade = sequencer.timing_lane.current_step.xfade_duration_samples_running as usize;
        let hold = 1000 - xfade / 2;
        assert!(xfade > 0);

        let mut done_at = None;
        for block in 0..40 {
            sequencer.render(&params, BPM_1000, 64);
            let mix_a = sequencer.mod_out().value(WS_WAVE_MIX_A);
            let mix_b = sequencer.mod_out().value(WS_WAVE_MIX_B);
            let sample_index = block * 64 + 63;

            if sample_index < hold - 1 {
                assert_relative_eq!(mix_a, 1.0, epsilon = 1e-9);
                assert_relative_eq!(mix_b, 0.0, epsilon = 1e-9);
            }
            if sequencer.mod_out().value(WS_XFADE_DONE) == 1.0 && done_at.is_none() {
                done_at = Some(sample_index);
            }
            // during any crossfade the gains stay constant power
            if mix_b > 0.0 && mix_a > 0.0 {
                assert_relative_eq!(mix_a * mix_a + mix_b * mix_b, 1.0, epsilon = 1e-9);
            }
        }
        let done_at = done_at.expect("crossfade must finish");
        let expected = hold + xfade;
        assert!(
            done_at >= expected - 64 && done_at <= expected + 64,
            "xfade done at {done_at}, expected near {expected}"
        );
    }

    #[test]
    fn test_steps_advance_in_order() {
        let params = WaveSequencerParams {
            wave_lane_value: [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            ..WaveSequencerParams::default()
        };
        let mut sequencer = sequencer_with(&params);

        let mut seen = Vec::new();
        for _ in 0..700 {
            sequencer.render(&params, BPM_1000, 64);
            let index = sequencer.mod_out().value(WS_WAVE_STEP_NUMBER_A) as usize;
            if seen.last() != Some(&index) {
                seen.push(index);
            }
        }
        // forward direction with identity jump table: ascending order
        assert!(seen.len() >= 4, "sequence advanced: {seen:?}");
        for pair in seen.windows(2) {
            let expected = (pair[0] + 1) % MAX_SEQ_STEPS;
            assert_eq!(pair[1], expected, "sequence {seen:?}");
        }
    }

    #[test]
    fn test_zero_probability_steps_are_null() {
        let params = WaveSequencerParams {
            wave_lane_probability_pct: [0.0; MAX_SEQ_STEPS],
            wave_lane_value: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            ..WaveSequencerParams::default()
        };
        let mut sequencer = sequencer_with(&params);
        for step in sequencer.wave_lane.lane_step.iter() {
            assert!(step.is_null_step());
        }
        // a null next step holds the current value instead of advancing
        sequencer.render(&params, BPM_1000, 64);
        assert_eq!(sequencer.mod_out().value(WS_WAVE_INDEX_B), 1.0);
    }

    #[test]
    fn test_rest_steps_zero_the_mix() {
        let mut step_type = [StepMode::Note; MAX_SEQ_STEPS];
        step_type[0] = StepMode::Rest;
        let params = WaveSequencerParams {
            step_type,
            ..WaveSequencerParams::default()
        };
        let mut sequencer = sequencer_with(&params);
        sequencer.render(&params, BPM_1000, 64);
        // current step is the rest: A mix gated to zero
        assert_eq!(sequencer.mod_out().value(WS_WAVE_MIX_A), 0.0);
    }

    #[test]
    fn test_time_stretch_multiplier_map() {
        assert_relative_eq!(
            WaveSequencer::time_stretch_multiplier(0.0),
            1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            WaveSequencer::time_stretch_multiplier(5.0),
            5.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            WaveSequencer::time_stretch_multiplier(-5.0),
            1.0 / 5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_backward_direction_descends() {
        let params = WaveSequencerParams {
            timing_loop_direction: LoopDirection::Backward,
            mod_loop_direction: [LoopDirection::Backward; crate::params::NUM_MOD_LANES],
            ..WaveSequencerParams::default()
        };
        let mut sequencer = sequencer_with(&params);

        let mut seen = Vec::new();
        for _ in 0..700 {
            sequencer.render(&params, BPM_1000, 64);
            let index = sequencer.mod_out().value(WS_WAVE_STEP_NUMBER_A) as usize;
            if seen.last() != Some(&index) {
                seen.push(index);
            }
        }
        assert!(seen.len() >= 3);
        for pair in seen.windows(2) {
            let expected = (pair[0] + MAX_SEQ_STEPS - 1) % MAX_SEQ_STEPS;
            assert_eq!(pair[1], expected, "sequence {seen:?}");
        }
    }

    #[test]
    fn test_randomize_reshuffles_at_loop_point() {
        let params = WaveSequencerParams {
            randomize_wave_order: true,
            ..WaveSequencerParams::default()
        };
        let mut sequencer = sequencer_with(&params);

        // drive through several full loops; a shuffled jump table stays a
        // permutation of 0..7
        for _ in 0..4000 {
            sequencer.render(&params, BPM_1000, 64);
        }
        let mut table = sequencer.wave_lane.jump_table;
        table.sort_unstable();
        assert_eq!(table, [0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
