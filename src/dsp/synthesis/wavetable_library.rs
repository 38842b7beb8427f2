//! Shared read-only wavetable database.
//!
//! Built once per `reset(sample_rate)` (Fourier tables are fs-dependent),
//! then handed to every voice behind an `Arc`. Lookup by stable `u32`
//! index is the fast path; name lookup exists for user-facing routing.

use super::wavetable::{
    build_fourier_table_set, FourierWaveform, MorphBankData, SineTableSource, WavetableSource,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct WavetableDatabase {
    sources: Vec<Arc<dyn WavetableSource>>,
    name_to_index: HashMap<String, u32>,
}

impl Default for WavetableDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl WavetableDatabase {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// Register a table source. A duplicate name is rejected and the
    /// existing entry wins; the returned index is always valid.
    pub fn add_table_source(&mut self, source: Arc<dyn WavetableSource>) -> u32 {
        let name = source.name().to_string();
        if let Some(&index) = self.name_to_index.get(&name) {
            return index;
        }
        let index = self.sources.len() as u32;
        self.sources.push(source);
        self.name_to_index.insert(name, index);
        index
    }

    pub fn table_source(&self, name: &str) -> Option<&Arc<dyn WavetableSource>> {
        self.name_to_index
            .get(name)
            .map(|&index| &self.sources[index as usize])
    }

    pub fn table_source_by_index(&self, index: u32) -> Option<&Arc<dyn WavetableSource>> {
        self.sources.get(index as usize)
    }

    pub fn waveform_index(&self, name: &str) -> Option<u32> {
        self.name_to_index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Waveform names served by the classic wavetable core, in module-string
/// order.
pub const CLASSIC_WAVEFORMS: [&str; 5] = ["saw", "square", "triangle", "parabola", "sine"];

/// Number of tables in each generated morph bank.
pub const MORPH_BANK_TABLES: usize = 16;

/// Morph bank names served by the morphing core.
pub const MORPH_BANKS: [&str; 2] = ["saw morph", "square morph"];

/// Build the database every voice shares: the classic waveform sets, the
/// sine source for FM operators, and the harmonic-series morph banks.
pub fn build_standard_database(sample_rate: f64) -> (WavetableDatabase, Vec<MorphBankData>) {
    let mut db = WavetableDatabase::new();

    db.add_table_source(Arc::new(build_fourier_table_set(
        "saw",
        FourierWaveform::Sawtooth,
        sample_rate,
    )));
    db.add_table_source(Arc::new(build_fourier_table_set(
        "square",
        FourierWaveform::Square,
        sample_rate,
    )));
    db.add_table_source(Arc::new(build_fourier_table_set(
        "triangle",
        FourierWaveform::Triangle,
        sample_rate,
    )));
    db.add_table_source(Arc::new(build_fourier_table_set(
        "parabola",
        FourierWaveform::Parabola,
        sample_rate,
    )));
    db.add_table_source(Arc::new(SineTableSource::new(sample_rate)));

    // morph banks: progressively brighter harmonic-series tables
    let mut banks = Vec::new();
    for (bank_name, waveform) in [
        ("saw morph", FourierWaveform::Sawtooth),
        ("square morph", FourierWaveform::Square),
    ] {
        let mut bank = MorphBankData {
            bank_name: bank_name.to_string(),
            table_names: Vec::with_capacity(MORPH_BANK_TABLES),
        };
        for step in 0..MORPH_BANK_TABLES {
            let name = format!("{bank_name} {step}");
            db.add_table_source(Arc::new(build_limited_set(
                &name,
                waveform,
                sample_rate,
                step + 1,
            )));
            bank.table_names.push(name);
        }
        banks.push(bank);
    }

    (db, banks)
}

/// A Fourier set whose harmonic count is additionally capped, used to
/// grade the morph banks from dull to bright.
fn build_limited_set(
    name: &str,
    waveform: FourierWaveform,
    sample_rate: f64,
    max_harmonics: usize,
) -> super::wavetable::StaticTableSource {
    use super::wavetable::{harmonics_below_nyquist, StaticTableSource, StaticWavetable};
    use crate::dsp::functions::midi_note_to_freq;
    use crate::midi::NUM_MIDI_NOTES;

    let mut tables: Vec<StaticWavetable> = Vec::with_capacity(NUM_MIDI_NOTES);
    let mut seed_note = 0usize;
    while seed_note < NUM_MIDI_NOTES {
        let top_note = (seed_note + 11).min(NUM_MIDI_NOTES - 1);
        let fundamental = midi_note_to_freq(top_note as u8);
        let harmonics = harmonics_below_nyquist(fundamental, sample_rate).min(max_harmonics);
        let cycle = super::wavetable::synthesize_cycle(waveform, harmonics);
        let table = StaticWavetable::new(cycle.into(), 1.0, sample_rate);
        for _ in seed_note..=top_note {
            tables.push(table.clone());
        }
        seed_note += 12;
    }
    StaticTableSource::new(name, tables)
}
