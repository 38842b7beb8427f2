//! modsynth - a polyphonic, block-based modular synthesizer core.
//!
//! The crate is organized the way the audio flows: `midi` defines the event
//! format and the shared per-engine MIDI record, `dsp` holds the signal
//! generation and processing building blocks (oscillator cores, envelope
//! generators, LFOs, filters, the wave sequencer, and the modulation
//! matrix), and `audio` composes them into voices and the engine that
//! allocates, steals, and sums those voices into stereo blocks.

pub mod audio;
pub mod dsp;
pub mod midi;
pub mod params;

pub use audio::engine::{SynthEngine, SynthProcessInfo};
pub use params::SynthParams;
