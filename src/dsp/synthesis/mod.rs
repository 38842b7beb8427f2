//! Shared sample-data sources: band-limited wavetable sets and PCM
//! multi-sample patches, plus the read-only databases that voices share.

pub mod pcm_library;
pub mod pcm_sample;
pub mod wavetable;
pub mod wavetable_library;

pub use pcm_library::{PcmSampleDatabase, PcmSampleOutput, PcmSampleSource};
pub use pcm_sample::{PcmSample, SampleLoopMode, WaveFolder};
pub use wavetable::{
    build_fourier_table_set, FourierWaveform, MorphBankData, SineTableSource, StaticTableSource,
    StaticWavetable, WavetableSource,
};
pub use wavetable_library::{
    build_standard_database, WavetableDatabase, CLASSIC_WAVEFORMS, MORPH_BANKS, MORPH_BANK_TABLES,
};
