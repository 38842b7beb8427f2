//! Shared DSP helper math: pitch conversion, gain laws, control tapers,
//! tempo-synced note durations.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// MIDI note 0 fundamental, the lowest pitch any oscillator will track.
pub const MIDI_NOTE_0_FREQ: f64 = 8.175_798_915_643_707;

/// Taper coefficient for the log/antilog control transforms (5 dB per
/// 12 dB of control travel, the classic audio-taper constant).
const CT_COEFFICIENT: f64 = 5.0 / 12.0;

/// 12-TET MIDI note number to frequency, A4 = 440 Hz.
#[inline]
pub fn midi_note_to_freq(note: u8) -> f64 {
    440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0)
}

/// Inverse of [`midi_note_to_freq`]: nearest MIDI note for a frequency.
#[inline]
pub fn midi_note_from_freq(frequency: f64) -> u8 {
    let note = (12.0 * (frequency / 440.0).log2() + 69.0).round();
    note.clamp(0.0, 127.0) as u8
}

#[inline]
pub fn db_to_raw(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

#[inline]
pub fn raw_to_db(raw: f64) -> f64 {
    20.0 * raw.max(1e-12).log10()
}

/// Equal-power pan law; `pan` is bipolar, -1 = hard left.
#[inline]
pub fn calculate_pan_values(pan: f64) -> (f64, f64) {
    let p = pan.clamp(-1.0, 1.0);
    let angle = (PI / 4.0) * (p + 1.0);
    (angle.cos(), angle.sin())
}

/// Constant-power crossfade gains for a fade position in [0, 1];
/// returns (gain_a, gain_b) with gain_a^2 + gain_b^2 == 1.
#[inline]
pub fn const_power_xfade(frac: f64) -> (f64, f64) {
    let f = frac.clamp(0.0, 1.0);
    ((f * PI / 2.0).cos(), (f * PI / 2.0).sin())
}

/// Map a unipolar mod-knob value [0, 1] onto a linear [min, max] range.
#[inline]
pub fn mod_knob_value_linear(knob: f64, min: f64, max: f64) -> f64 {
    min + knob.clamp(0.0, 1.0) * (max - min)
}

/// Linear range remap.
#[inline]
pub fn map_double_value(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if (in_max - in_min).abs() < f64::EPSILON {
        return out_min;
    }
    out_min + (out_max - out_min) * (value - in_min) / (in_max - in_min)
}

#[inline]
pub fn unipolar_to_bipolar(value: f64) -> f64 {
    2.0 * value - 1.0
}

#[inline]
pub fn bipolar_to_unipolar(value: f64) -> f64 {
    0.5 * value + 0.5
}

/// Concave taper: sags below the identity line, c(0) = 0, c(1) = 1.
#[inline]
pub fn concave_xform(value: f64) -> f64 {
    let z = 10.0_f64.powf(-1.0 / CT_COEFFICIENT);
    let x = value.clamp(0.0, 1.0);
    (10.0_f64.powf((x - 1.0) / CT_COEFFICIENT) - z) / (1.0 - z)
}

/// Inverse of [`concave_xform`], for locating a level on the curve.
#[inline]
pub fn reverse_concave_xform(value: f64) -> f64 {
    let z = 10.0_f64.powf(-1.0 / CT_COEFFICIENT);
    let y = value.clamp(0.0, 1.0);
    1.0 + CT_COEFFICIENT * (y * (1.0 - z) + z).log10()
}

/// Convex taper: bows above the identity line, the mirror of the concave.
#[inline]
pub fn convex_xform(value: f64) -> f64 {
    1.0 - concave_xform(1.0 - value.clamp(0.0, 1.0))
}

#[inline]
pub fn bipolar_convex_xform(value: f64) -> f64 {
    value.signum() * convex_xform(value.abs())
}

#[inline]
pub fn bipolar_concave_xform(value: f64) -> f64 {
    value.signum() * concave_xform(value.abs())
}

/// Parabolic sine approximation, in/out over [-pi, pi]; cheaper than
/// `sin()` and accurate to about -60 dB, fine for modulators.
#[inline]
pub fn parabolic_sine(angle: f64) -> f64 {
    const B: f64 = 4.0 / PI;
    const C: f64 = -4.0 / (PI * PI);
    const P: f64 = 0.225;
    let y = B * angle + C * angle * angle.abs();
    P * (y * y.abs() - y) + y
}

/// Bipolar stepper: rounds onto 2^bits levels.
#[inline]
pub fn quantize_bipolar_value(value: f64, levels: f64) -> f64 {
    (value * levels).floor() / levels
}

/// Overdriven soft clipper, normalized so the output peaks at +/-1.
#[inline]
pub fn tanh_waveshaper(x: f64, saturation: f64) -> f64 {
    (saturation * x).tanh() / saturation.tanh()
}

#[inline]
pub fn do_linear_interpolation(y1: f64, y2: f64, fraction: f64) -> f64 {
    y1 + fraction * (y2 - y1)
}

/// Tempo-relative note durations for BPM-synced LFO rates and wave
/// sequencer steps, ordered longest first; `Off` disables syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NoteDuration {
    Whole,
    DottedHalf,
    Half,
    HalfTriplet,
    DottedQuarter,
    #[default]
    Quarter,
    QuarterTriplet,
    DottedEighth,
    Eighth,
    EighthTriplet,
    DottedSixteenth,
    Sixteenth,
    SixteenthTriplet,
    ThirtySecond,
    ThirtySecondTriplet,
    SixtyFourth,
    SixtyFourthTriplet,
    Off,
}

pub const NOTE_DURATIONS: [NoteDuration; 18] = [
    NoteDuration::Whole,
    NoteDuration::DottedHalf,
    NoteDuration::Half,
    NoteDuration::HalfTriplet,
    NoteDuration::DottedQuarter,
    NoteDuration::Quarter,
    NoteDuration::QuarterTriplet,
    NoteDuration::DottedEighth,
    NoteDuration::Eighth,
    NoteDuration::EighthTriplet,
    NoteDuration::DottedSixteenth,
    NoteDuration::Sixteenth,
    NoteDuration::SixteenthTriplet,
    NoteDuration::ThirtySecond,
    NoteDuration::ThirtySecondTriplet,
    NoteDuration::SixtyFourth,
    NoteDuration::SixtyFourthTriplet,
    NoteDuration::Off,
];

impl NoteDuration {
    /// Duration in quarter-note beats.
    pub fn beats(self) -> f64 {
        match self {
            NoteDuration::Whole => 4.0,
            NoteDuration::DottedHalf => 3.0,
            NoteDuration::Half => 2.0,
            NoteDuration::HalfTriplet => 4.0 / 3.0,
            NoteDuration::DottedQuarter => 1.5,
            NoteDuration::Quarter => 1.0,
            NoteDuration::QuarterTriplet => 2.0 / 3.0,
            NoteDuration::DottedEighth => 0.75,
            NoteDuration::Eighth => 0.5,
            NoteDuration::EighthTriplet => 1.0 / 3.0,
            NoteDuration::DottedSixteenth => 0.375,
            NoteDuration::Sixteenth => 0.25,
            NoteDuration::SixteenthTriplet => 1.0 / 6.0,
            NoteDuration::ThirtySecond => 0.125,
            NoteDuration::ThirtySecondTriplet => 1.0 / 12.0,
            NoteDuration::SixtyFourth => 0.0625,
            NoteDuration::SixtyFourthTriplet => 1.0 / 24.0,
            NoteDuration::Off => 0.0,
        }
    }

    /// Select a duration from a unipolar mod-knob value.
    pub fn from_knob(knob: f64) -> Self {
        let index = (knob.clamp(0.0, 1.0) * (NOTE_DURATIONS.len() - 1) as f64).round() as usize;
        NOTE_DURATIONS[index]
    }
}

/// Duration of a note value at a tempo, in seconds; 0.0 means "off".
#[inline]
pub fn get_time_from_tempo(bpm: f64, duration: NoteDuration) -> f64 {
    if duration == NoteDuration::Off || bpm <= 0.0 {
        return 0.0;
    }
    duration.beats() * 60.0 / bpm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_midi_note_round_trip() {
        for n in 0u8..128 {
            assert_eq!(midi_note_from_freq(midi_note_to_freq(n)), n);
        }
    }

    #[test]
    fn test_a4_is_440() {
        assert_relative_eq!(midi_note_to_freq(69), 440.0, epsilon = 1e-9);
        assert_relative_eq!(midi_note_to_freq(0), MIDI_NOTE_0_FREQ, epsilon = 1e-9);
    }

    #[test]
    fn test_pan_law_is_equal_power() {
        for pan in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let (l, r) = calculate_pan_values(pan);
            assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-12);
        }
        let (l, r) = calculate_pan_values(-1.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-12);
        assert_relative_eq!(r, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_const_power_xfade_endpoints() {
        let (a, b) = const_power_xfade(0.0);
        assert_relative_eq!(a, 1.0, epsilon = 1e-12);
        assert_relative_eq!(b, 0.0, epsilon = 1e-12);
        let (a, b) = const_power_xfade(1.0);
        assert!(a.abs() < 1e-12 && (b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_taper_fixed_points() {
        for f in [concave_xform, convex_xform] {
            assert_relative_eq!(f(0.0), 0.0, epsilon = 1e-9);
            assert_relative_eq!(f(1.0), 1.0, epsilon = 1e-9);
        }
        assert!(concave_xform(0.5) < 0.5);
        assert!(convex_xform(0.5) > 0.5);
    }

    #[test]
    fn test_concave_inverse() {
        for x in [0.1, 0.25, 0.5, 0.9] {
            assert_relative_eq!(reverse_concave_xform(concave_xform(x)), x, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_parabolic_sine_accuracy() {
        // oscillator convention: phase m in [0,1) maps through -(2*pi*m - pi)
        for i in 0..64 {
            let m = i as f64 / 64.0;
            let approx_sin = parabolic_sine(-(2.0 * PI * m - PI));
            assert_relative_eq!(approx_sin, (2.0 * PI * m).sin(), epsilon = 2e-3);
        }
    }

    #[test]
    fn test_note_durations_at_120bpm() {
        assert_relative_eq!(
            get_time_from_tempo(120.0, NoteDuration::Quarter),
            0.5,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            get_time_from_tempo(120.0, NoteDuration::Whole),
            2.0,
            epsilon = 1e-12
        );
        assert_eq!(get_time_from_tempo(120.0, NoteDuration::Off), 0.0);
        assert_eq!(NoteDuration::from_knob(1.0), NoteDuration::Off);
        assert_eq!(NoteDuration::from_knob(0.0), NoteDuration::Whole);
    }
}
