//! Band-limited wavetable storage.
//!
//! A [`StaticTableSource`] holds 128 single-cycle tables, one per MIDI
//! note, each truncated to the harmonic count that stays alias-free at
//! that note's fundamental. Table lengths are powers of two so lookup
//! wraps with a mask. Tables are built by additive Fourier synthesis at
//! reset time (they depend on the sample rate) and shared read-only
//! between voices.

use crate::dsp::functions::{do_linear_interpolation, midi_note_to_freq};
use crate::midi::NUM_MIDI_NOTES;
use std::f64::consts::PI;
use std::sync::Arc;

/// Default single-cycle table length (power of two).
pub const DEFAULT_TABLE_LENGTH: usize = 256;

/// One single-cycle table plus its read metadata.
#[derive(Debug, Clone)]
pub struct StaticWavetable {
    samples: Arc<[f64]>,
    wrap_mask: usize,
    output_comp: f64,
    /// Sample rate the table was built for.
    pub table_sample_rate: f64,
}

impl StaticWavetable {
    /// `samples.len()` must be a power of two.
    pub fn new(samples: Arc<[f64]>, output_comp: f64, table_sample_rate: f64) -> Self {
        assert!(samples.len().is_power_of_two());
        let wrap_mask = samples.len() - 1;
        Self {
            samples,
            wrap_mask,
            output_comp,
            table_sample_rate,
        }
    }

    /// Source-artifact encoding: tables stored as raw `u64` bit patterns
    /// of their `f64` samples.
    pub fn from_bit_patterns(bits: &[u64], output_comp: f64, table_sample_rate: f64) -> Self {
        let samples: Arc<[f64]> = bits.iter().map(|&b| f64::from_bits(b)).collect();
        Self::new(samples, output_comp, table_sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn output_comp(&self) -> f64 {
        self.output_comp
    }

    /// Linear-interpolated lookup at normalized phase [0, 1).
    #[inline]
    pub fn read(&self, phase: f64) -> f64 {
        let location = self.samples.len() as f64 * phase;
        let index = location as usize & self.wrap_mask;
        let next = (index + 1) & self.wrap_mask;
        let frac = location - location.floor();
        self.output_comp
            * do_linear_interpolation(self.samples[index], self.samples[next], frac)
    }
}

/// A named set of 128 per-note tables, the unit stored in the database.
pub trait WavetableSource: Send + Sync {
    fn name(&self) -> &str;
    /// Table for a MIDI note; band-limited for that note's fundamental.
    fn select_table(&self, midi_note: u8) -> &StaticWavetable;
}

/// The standard per-note table set.
pub struct StaticTableSource {
    name: String,
    tables: Vec<StaticWavetable>,
}

impl StaticTableSource {
    pub fn new(name: impl Into<String>, tables: Vec<StaticWavetable>) -> Self {
        assert_eq!(tables.len(), NUM_MIDI_NOTES);
        Self {
            name: name.into(),
            tables,
        }
    }
}

impl WavetableSource for StaticTableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_table(&self, midi_note: u8) -> &StaticWavetable {
        &self.tables[midi_note as usize & 0x7F]
    }
}

/// Pure sine source: one table serves every note (a sine never aliases
/// below Nyquist). Used by the FM operator cores.
pub struct SineTableSource {
    name: String,
    table: StaticWavetable,
}

impl SineTableSource {
    pub fn new(sample_rate: f64) -> Self {
        let samples: Arc<[f64]> = (0..DEFAULT_TABLE_LENGTH)
            .map(|i| (2.0 * PI * i as f64 / DEFAULT_TABLE_LENGTH as f64).sin())
            .collect();
        Self {
            name: "sine".to_string(),
            table: StaticWavetable::new(samples, 1.0, sample_rate),
        }
    }
}

impl WavetableSource for SineTableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_table(&self, _midi_note: u8) -> &StaticWavetable {
        &self.table
    }
}

/// Waveforms the Fourier builders can synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourierWaveform {
    /// All harmonics at 1/n.
    Sawtooth,
    /// Odd harmonics at 1/n.
    Square,
    /// Odd harmonics at 1/n^2, alternating sign.
    Triangle,
    /// All harmonics at 1/n^2 on cosines.
    Parabola,
}

pub(crate) fn synthesize_cycle(waveform: FourierWaveform, num_harmonics: usize) -> Vec<f64> {
    let len = DEFAULT_TABLE_LENGTH;
    let mut table = vec![0.0; len];

    for (i, sample) in table.iter_mut().enumerate() {
        let phase = i as f64 / len as f64;
        if num_harmonics < 1 {
            *sample = (2.0 * PI * phase).sin();
            continue;
        }
        for h in 1..=num_harmonics {
            let n = h as f64;
            *sample += match waveform {
                FourierWaveform::Sawtooth => (2.0 * PI * phase * n).sin() / n,
                FourierWaveform::Square => {
                    if h % 2 == 1 {
                        (2.0 * PI * phase * n).sin() / n
                    } else {
                        0.0
                    }
                }
                FourierWaveform::Triangle => {
                    if h % 2 == 1 {
                        let sign = if (h / 2) % 2 == 0 { 1.0 } else { -1.0 };
                        sign * (2.0 * PI * phase * n).sin() / (n * n)
                    } else {
                        0.0
                    }
                }
                FourierWaveform::Parabola => (2.0 * PI * phase * n).cos() / (n * n),
            };
        }
    }

    // normalize by peak
    let peak = table.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    if peak > 0.0 {
        for sample in &mut table {
            *sample /= peak;
        }
    }
    table
}

/// Number of harmonics that stay below Nyquist for a fundamental.
pub fn harmonics_below_nyquist(fundamental_hz: f64, sample_rate: f64) -> usize {
    let count = (sample_rate / 2.0 / fundamental_hz) - 1.0;
    if count < 1.0 {
        0
    } else {
        count as usize
    }
}

/// Build a 128-note table set by additive synthesis, one table per
/// octave seed (all notes of an octave share the table band-limited at
/// the octave's top).
pub fn build_fourier_table_set(
    name: &str,
    waveform: FourierWaveform,
    sample_rate: f64,
) -> StaticTableSource {
    let mut tables = Vec::with_capacity(NUM_MIDI_NOTES);
    let mut seed_note = 0usize;

    while seed_note < NUM_MIDI_NOTES {
        // band-limit against the top note of this octave span
        let top_note = (seed_note + 11).min(NUM_MIDI_NOTES - 1);
        let seed_freq = midi_note_to_freq(top_note as u8);
        let num_harmonics = harmonics_below_nyquist(seed_freq, sample_rate);

        let cycle = synthesize_cycle(waveform, num_harmonics);
        let samples: Arc<[f64]> = cycle.into();
        let table = StaticWavetable::new(samples, 1.0, sample_rate);

        for _ in seed_note..=top_note {
            tables.push(table.clone());
        }
        seed_note += 12;
    }

    StaticTableSource::new(name, tables)
}

/// A morph bank: an ordered list of waveform names (each a registered
/// table source) that a morphing oscillator sweeps across.
#[derive(Debug, Clone, Default)]
pub struct MorphBankData {
    pub bank_name: String,
    pub table_names: Vec<String>,
}

impl MorphBankData {
    pub fn num_tables(&self) -> usize {
        self.table_names.len()
    }
}
