//! Multi-sample patches and the shared PCM database.

use super::pcm_sample::{PcmSample, SampleLoopMode, WaveFolder};
use crate::dsp::functions::{do_linear_interpolation, midi_note_from_freq, midi_note_to_freq};
use crate::midi::NUM_MIDI_NOTES;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One stereo frame read out of a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmSampleOutput {
    pub left: f64,
    pub right: f64,
    pub num_active_channels: u16,
}

/// A patch: 128 keyboard slots sharing decoded samples, selected by the
/// oscillator's target frequency each block.
pub struct PcmSampleSource {
    name: String,
    sample_set: [Option<Arc<PcmSample>>; NUM_MIDI_NOTES],
    loop_mode: SampleLoopMode,
}

impl PcmSampleSource {
    /// Parse a folder of WAV files; the folder name becomes the patch name.
    pub fn from_folder(path: &Path, pitchless_loops: bool, aubio_slices: bool) -> Self {
        let folder = WaveFolder::new(path);
        let name = folder.folder_name().to_string();
        let sample_set = folder.parse_folder(pitchless_loops, aubio_slices);
        Self {
            name,
            sample_set,
            loop_mode: SampleLoopMode::default(),
        }
    }

    pub fn from_sample_set(
        name: impl Into<String>,
        sample_set: [Option<Arc<PcmSample>>; NUM_MIDI_NOTES],
    ) -> Self {
        Self {
            name: name.into(),
            sample_set,
            loop_mode: SampleLoopMode::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_loop_mode(&mut self, loop_mode: SampleLoopMode) {
        self.loop_mode = loop_mode;
    }

    pub fn loop_mode(&self) -> SampleLoopMode {
        self.loop_mode
    }

    pub fn valid_sample_count(&self) -> usize {
        self.sample_set.iter().filter(|s| s.is_some()).count()
    }

    pub fn sample_for_note(&self, midi_note: u8) -> Option<&Arc<PcmSample>> {
        self.sample_set[midi_note as usize & 0x7F].as_ref()
    }

    /// Select the sample for an oscillator frequency; returns the phase
    /// increment (1.0 for pitchless samples, f/f_unity otherwise).
    pub fn select_sample(&self, osc_frequency: f64) -> (Option<&Arc<PcmSample>>, f64) {
        let note = midi_note_from_freq(osc_frequency);
        let Some(sample) = self.sample_for_note(note) else {
            return (None, 0.0);
        };
        let inc = if sample.pitchless {
            1.0
        } else {
            let unity_freq = midi_note_to_freq(sample.unity_midi_note);
            osc_frequency / unity_freq
        };
        (Some(sample), inc)
    }

    /// Interpolated read at a fractional frame index, applying the loop
    /// policy; advances `read_index` by `inc`. A parked index (< 0)
    /// produces silence.
    pub fn read_sample(
        sample: &PcmSample,
        loop_mode: SampleLoopMode,
        read_index: &mut f64,
        inc: f64,
    ) -> PcmSampleOutput {
        let mut output = PcmSampleOutput {
            num_active_channels: sample.num_channels,
            ..Default::default()
        };
        if *read_index < 0.0 {
            return output;
        }

        let last_frame = sample.frames().saturating_sub(1) as f64;

        if sample.loop_count > 0 {
            match loop_mode {
                SampleLoopMode::Sustain => {
                    if sample.loop_end > sample.loop_start {
                        while *read_index >= sample.loop_end as f64 {
                            *read_index =
                                *read_index - sample.loop_end as f64 + sample.loop_start as f64;
                        }
                    }
                }
                SampleLoopMode::Loop => {
                    if *read_index > last_frame - 1.0 {
                        *read_index = 0.0;
                    }
                }
                SampleLoopMode::OneShot => {
                    if *read_index > last_frame - 1.0 {
                        *read_index = -1.0;
                        return output;
                    }
                }
            }
        } else {
            // no loop points in the file
            match loop_mode {
                SampleLoopMode::Sustain | SampleLoopMode::OneShot => {
                    if *read_index > last_frame - 1.0 {
                        *read_index = -1.0;
                        return output;
                    }
                }
                SampleLoopMode::Loop => {
                    if *read_index > last_frame - 1.0 {
                        *read_index = 0.0;
                    }
                }
            }
        }

        let frame = *read_index as usize;
        let frac = *read_index - frame as f64;
        let channels = sample.num_channels as usize;
        let frames = sample.frames();

        if channels == 1 {
            let next = if frame + 1 > frames - 1 { 0 } else { frame + 1 };
            let value = do_linear_interpolation(
                sample.samples[frame] as f64,
                sample.samples[next] as f64,
                frac,
            );
            output.left = value;
            output.right = value;
        } else {
            let index_left = frame * 2;
            let next_left = if index_left + 2 > sample.sample_count - 1 {
                0
            } else {
                index_left + 2
            };
            output.left = do_linear_interpolation(
                sample.samples[index_left] as f64,
                sample.samples[next_left] as f64,
                frac,
            );
            let index_right = index_left + 1;
            let next_right = if index_right + 2 > sample.sample_count - 1 {
                1
            } else {
                index_right + 2
            };
            output.right = do_linear_interpolation(
                sample.samples[index_right] as f64,
                sample.samples[next_right] as f64,
                frac,
            );
        }

        *read_index += inc;
        output
    }
}

/// Shared read-only store of PCM patches, keyed by patch name.
#[derive(Default)]
pub struct PcmSampleDatabase {
    sources: Vec<Arc<PcmSampleSource>>,
    name_to_index: HashMap<String, u32>,
}

impl PcmSampleDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patch; a duplicate name is rejected and the existing
    /// entry wins.
    pub fn add_sample_source(&mut self, source: Arc<PcmSampleSource>) -> u32 {
        if let Some(&index) = self.name_to_index.get(source.name()) {
            return index;
        }
        let index = self.sources.len() as u32;
        self.name_to_index.insert(source.name().to_string(), index);
        self.sources.push(source);
        index
    }

    /// Parse every subfolder of `path` as one patch.
    pub fn add_sample_folders(&mut self, path: &Path) {
        let Ok(entries) = std::fs::read_dir(path) else {
            eprintln!("Warning: cannot read sample root {}", path.display());
            return;
        };
        for entry in entries.flatten() {
            let sub = entry.path();
            if sub.is_dir() {
                let source = PcmSampleSource::from_folder(&sub, false, false);
                if source.valid_sample_count() > 0 {
                    self.add_sample_source(Arc::new(source));
                }
            }
        }
    }

    pub fn sample_source(&self, name: &str) -> Option<&Arc<PcmSampleSource>> {
        self.name_to_index
            .get(name)
            .map(|&index| &self.sources[index as usize])
    }

    pub fn sample_source_by_index(&self, index: u32) -> Option<&Arc<PcmSampleSource>> {
        self.sources.get(index as usize)
    }

    pub fn patch_index(&self, name: &str) -> Option<u32> {
        self.name_to_index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
