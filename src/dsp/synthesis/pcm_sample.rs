//! PCM sample loading.
//!
//! WAV decoding goes through `hound` (16/24/32-bit int, 32-bit float);
//! 64-bit float files, which hound does not handle, fall back to a direct
//! `data`-chunk read. The `smpl` chunk (unity note, pitch fraction, loop
//! points) is not exposed by hound either, so it is pulled out with an
//! explicit RIFF chunk scan. A file that fails to parse is skipped with a
//! warning; loading never panics on malformed input.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::midi::NUM_MIDI_NOTES;

/// Loop behavior stamped on a sample from its `smpl` chunk (or forced by
/// the folder policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleLoopMode {
    /// Wrap between loop points while the note sounds; after note-off the
    /// sample keeps playing from its current position (tape-style).
    #[default]
    Sustain,
    /// Wrap back to the loop start (or 0) at the loop end (or EOF).
    Loop,
    /// Play once; the read index parks at -1 and produces silence after.
    OneShot,
}

/// One decoded multi-sample zone: interleaved samples plus loop metadata.
#[derive(Debug, Clone)]
pub struct PcmSample {
    pub num_channels: u16,
    pub sample_rate: u32,
    /// Total interleaved sample count (frames * channels).
    pub sample_count: usize,
    pub samples: Vec<f32>,
    /// Loop points in frames.
    pub loop_start: usize,
    pub loop_end: usize,
    pub loop_count: u32,
    pub unity_midi_note: u8,
    pub unity_pitch_fraction: u32,
    /// Phase increment pinned to 1.0 (drum loops, aubio slices).
    pub pitchless: bool,
}

impl PcmSample {
    pub fn frames(&self) -> usize {
        self.sample_count / self.num_channels as usize
    }

    /// Decode a WAV file and its `smpl` chunk.
    pub fn load(path: &Path) -> Result<Self, String> {
        let bytes =
            fs::read(path).map_err(|e| format!("{}: read failed: {e}", path.display()))?;
        let mut sample = decode_wav_bytes(&bytes)?;

        if let Some(smpl) = scan_smpl_chunk(&bytes) {
            sample.unity_midi_note = (smpl.unity_note & 0x7F) as u8;
            sample.unity_pitch_fraction = smpl.pitch_fraction;
            sample.loop_count = smpl.loop_count;
            if smpl.loop_count > 0 {
                sample.loop_start = smpl.loop_start as usize;
                sample.loop_end = (smpl.loop_end as usize).min(sample.frames().saturating_sub(1));
            }
        }
        Ok(sample)
    }
}

/// `smpl` chunk fields the engine uses.
struct SmplChunk {
    unity_note: u32,
    pitch_fraction: u32,
    loop_count: u32,
    loop_start: u32,
    loop_end: u32,
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Walk the RIFF chunk list looking for `smpl`.
fn scan_smpl_chunk(bytes: &[u8]) -> Option<SmplChunk> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let mut offset = 12usize;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32_le(bytes, offset + 4)? as usize;
        let data = offset + 8;
        if id == b"smpl" && size >= 36 {
            let loop_count = read_u32_le(bytes, data + 28)?;
            let (mut loop_start, mut loop_end) = (0, 0);
            if loop_count > 0 && size >= 36 + 24 {
                // first loop record: id, type, start, end, fraction, count
                loop_start = read_u32_le(bytes, data + 36 + 8)?;
                loop_end = read_u32_le(bytes, data + 36 + 12)?;
            }
            return Some(SmplChunk {
                unity_note: read_u32_le(bytes, data + 12)?,
                pitch_fraction: read_u32_le(bytes, data + 16)?,
                loop_count,
                loop_start,
                loop_end,
            });
        }
        // chunks are word-aligned
        offset = data + size + (size & 1);
    }
    None
}

/// Decode the audio payload with hound, falling back to a raw read for
/// 64-bit float data.
fn decode_wav_bytes(bytes: &[u8]) -> Result<PcmSample, String> {
    match hound::WavReader::new(Cursor::new(bytes)) {
        Ok(mut reader) => {
            let spec = reader.spec();
            let samples: Vec<f32> = match spec.sample_format {
                hound::SampleFormat::Float => reader
                    .samples::<f32>()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format!("float sample read failed: {e}"))?,
                hound::SampleFormat::Int => {
                    let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| v as f32 / max_value))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| format!("int sample read failed: {e}"))?
                }
            };
            if samples.is_empty() {
                return Err("WAV file contains no samples".to_string());
            }
            if spec.channels == 0 || spec.channels > 2 {
                return Err(format!("unsupported channel count {}", spec.channels));
            }
            let frames = samples.len() / spec.channels as usize;
            Ok(PcmSample {
                num_channels: spec.channels,
                sample_rate: spec.sample_rate,
                sample_count: samples.len(),
                samples,
                loop_start: 0,
                loop_end: frames.saturating_sub(1),
                loop_count: 0,
                unity_midi_note: 0,
                unity_pitch_fraction: 0,
                pitchless: false,
            })
        }
        Err(hound_err) => {
            decode_float64_wav(bytes).map_err(|e| format!("{hound_err}; f64 fallback: {e}"))
        }
    }
}

/// Minimal fmt/data reader for format-3, 64-bit IEEE float files.
fn decode_float64_wav(bytes: &[u8]) -> Result<PcmSample, String> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err("not a RIFF/WAVE file".to_string());
    }
    let mut offset = 12usize;
    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut bits = 0u16;
    let mut format = 0u16;
    let mut data: Option<&[u8]> = None;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32_le(bytes, offset + 4).ok_or("truncated chunk")? as usize;
        let body = offset + 8;
        if body + size > bytes.len() {
            break;
        }
        match id {
            b"fmt " if size >= 16 => {
                format = u16::from_le_bytes([bytes[body], bytes[body + 1]]);
                channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
                sample_rate = read_u32_le(bytes, body + 4).unwrap_or(0);
                bits = u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]);
            }
            b"data" => data = Some(&bytes[body..body + size]),
            _ => {}
        }
        offset = body + size + (size & 1);
    }

    if format != 3 || bits != 64 {
        return Err(format!("unsupported sub-format (fmt {format}, {bits} bits)"));
    }
    if channels == 0 || channels > 2 {
        return Err(format!("unsupported channel count {channels}"));
    }
    let data = data.ok_or("missing data chunk")?;
    let samples: Vec<f32> = data
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
        .collect();
    if samples.is_empty() {
        return Err("WAV file contains no samples".to_string());
    }
    let frames = samples.len() / channels as usize;
    Ok(PcmSample {
        num_channels: channels,
        sample_rate,
        sample_count: samples.len(),
        samples,
        loop_start: 0,
        loop_end: frames.saturating_sub(1),
        loop_count: 0,
        unity_midi_note: 0,
        unity_pitch_fraction: 0,
        pitchless: false,
    })
}

const NOTE_NAMES_SHARP: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const NOTE_NAMES_FLAT: [&str; 12] = [
    "C", "DB", "D", "EB", "E", "F", "GB", "G", "AB", "A", "BB", "B",
];

/// Find a note-name + octave substring in a filename ("A4" = MIDI 69,
/// octaves -1..8). `shift_up_octave` adds 12 for libraries labeled in the
/// other octave-numbering convention.
pub fn find_note_number_in_name(filename: &str, shift_up_octave: bool) -> Option<u8> {
    let upper = filename.to_uppercase();
    for midi in 0..120u32 {
        let octave = midi as i32 / 12 - 1;
        let index = (midi % 12) as usize;
        let sharp = format!("{}{}", NOTE_NAMES_SHARP[index], octave);
        let flat = format!("{}{}", NOTE_NAMES_FLAT[index], octave);
        if upper.contains(&sharp) || upper.contains(&flat) {
            let mut note = midi;
            if shift_up_octave && note + 12 < 128 {
                note += 12;
            }
            return Some(note as u8);
        }
    }
    None
}

/// C-major scale intervals used to spread aubio slices up the keyboard.
const MAJOR_SCALE_STEPS: [u8; 7] = [2, 2, 1, 2, 2, 2, 1];

/// Parses one folder of WAV files into a 128-slot multi-sample set.
pub struct WaveFolder {
    folder_path: PathBuf,
    folder_name: String,
}

impl WaveFolder {
    pub fn new(folder_path: impl Into<PathBuf>) -> Self {
        let folder_path = folder_path.into();
        let folder_name = folder_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            folder_path,
            folder_name,
        }
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Load every `.wav` in the folder and map each to its keyboard slot:
    /// `smpl` unity note first, then a note name in the filename, then
    /// append order. Afterwards unfilled slots inherit the nearest higher
    /// sample (spec: pointer-sharing fill).
    pub fn parse_folder(
        &self,
        pitchless_loops: bool,
        aubio_slices: bool,
    ) -> [Option<Arc<PcmSample>>; NUM_MIDI_NOTES] {
        const NONE: Option<Arc<PcmSample>> = None;
        let mut sample_set: [Option<Arc<PcmSample>>; NUM_MIDI_NOTES] = [NONE; NUM_MIDI_NOTES];

        let mut files = self.collect_wav_files(aubio_slices);
        files.sort_by_key(|(order, _)| *order);

        let mut aubio_note = 60usize;
        let mut step_count = 0usize;
        let mut fallback_slot = 0usize;

        for (_, path) in files {
            let mut sample = match PcmSample::load(&path) {
                Ok(sample) => sample,
                Err(e) => {
                    eprintln!("Warning: skipping {}: {e}", path.display());
                    continue;
                }
            };
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if aubio_slices {
                sample.loop_start = 0;
                sample.loop_end = sample.frames().saturating_sub(1);
                sample.loop_count = 1;
                sample.pitchless = true;
                if aubio_note < NUM_MIDI_NOTES {
                    sample_set[aubio_note] = Some(Arc::new(sample));
                }
                aubio_note += MAJOR_SCALE_STEPS[step_count] as usize;
                step_count = (step_count + 1) % MAJOR_SCALE_STEPS.len();
            } else if pitchless_loops {
                sample.loop_start = 0;
                sample.loop_end = sample.frames().saturating_sub(1);
                sample.loop_count = 1;
                sample.pitchless = true;
                let slot = find_note_number_in_name(&filename, false)
                    .map(usize::from)
                    .unwrap_or_else(|| {
                        let s = fallback_slot;
                        fallback_slot += 1;
                        s
                    });
                if slot < NUM_MIDI_NOTES {
                    sample_set[slot] = Some(Arc::new(sample));
                }
            } else if sample.unity_midi_note > 0 {
                let slot = sample.unity_midi_note as usize;
                sample_set[slot] = Some(Arc::new(sample));
            } else if let Some(note) = find_note_number_in_name(&filename, false) {
                sample.unity_midi_note = note;
                sample_set[note as usize] = Some(Arc::new(sample));
            } else if fallback_slot < NUM_MIDI_NOTES {
                sample_set[fallback_slot] = Some(Arc::new(sample));
                fallback_slot += 1;
            }
        }

        if !aubio_slices {
            fill_note_gaps(&mut sample_set);
        }
        sample_set
    }

    /// Gather `.wav` paths; aubio filenames (`<folder>_<N>.wav`) are keyed
    /// by their slice number so they load in slice order.
    fn collect_wav_files(&self, aubio_slices: bool) -> Vec<(i64, PathBuf)> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.folder_path) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!(
                    "Warning: cannot read sample folder {}: {e}",
                    self.folder_path.display()
                );
                return files;
            }
        };

        let mut append_order = 0i64;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_wav = path
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if !is_wav {
                continue;
            }
            let key = if aubio_slices {
                self.aubio_slice_number(&path).unwrap_or(append_order)
            } else {
                append_order
            };
            files.push((key, path));
            append_order += 1;
        }
        files
    }

    fn aubio_slice_number(&self, path: &Path) -> Option<i64> {
        let stem = path.file_stem()?.to_string_lossy().to_uppercase();
        let prefix = format!("{}_", self.folder_name.to_uppercase());
        stem.strip_prefix(&prefix)?.parse::<i64>().ok()
    }
}

/// Nearest-higher inheritance: every empty slot takes the closest sample
/// above it; slots above the highest sample reuse it.
fn fill_note_gaps(sample_set: &mut [Option<Arc<PcmSample>>; NUM_MIDI_NOTES]) {
    let mut last: Option<Arc<PcmSample>> = None;
    let mut last_index: Option<usize> = None;
    for (i, slot) in sample_set.iter().enumerate() {
        if slot.is_some() {
            last = slot.clone();
            last_index = Some(i);
        }
    }
    let Some(last_index) = last_index else {
        return; // empty folder
    };

    for slot in sample_set.iter_mut().skip(last_index) {
        if slot.is_none() {
            *slot = last.clone();
        }
    }

    let mut inherit = last;
    for i in (0..last_index).rev() {
        match &sample_set[i] {
            Some(sample) => inherit = Some(sample.clone()),
            None => sample_set[i] = inherit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_test_wav(
        path: &Path,
        channels: u16,
        frames: usize,
        smpl: Option<(u32, u32, u32)>, // (unity note, loop start, loop end)
    ) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames * channels as usize {
            writer.write_sample((i as i32 % 256 - 128) as i16 * 100).unwrap();
        }
        writer.finalize().unwrap();

        if let Some((unity, loop_start, loop_end)) = smpl {
            // append an smpl chunk and patch the RIFF size
            let mut bytes = fs::read(path).unwrap();
            let mut chunk = Vec::new();
            chunk.extend_from_slice(b"smpl");
            chunk.extend_from_slice(&60u32.to_le_bytes()); // chunk size
            chunk.extend_from_slice(&[0u8; 12]); // manufacturer, product, period
            chunk.extend_from_slice(&unity.to_le_bytes());
            chunk.extend_from_slice(&[0u8; 12]); // fraction, SMPTE
            chunk.extend_from_slice(&1u32.to_le_bytes()); // loop count
            chunk.extend_from_slice(&0u32.to_le_bytes()); // sampler data
            chunk.extend_from_slice(&0u32.to_le_bytes()); // cue id
            chunk.extend_from_slice(&0u32.to_le_bytes()); // type
            chunk.extend_from_slice(&loop_start.to_le_bytes());
            chunk.extend_from_slice(&loop_end.to_le_bytes());
            chunk.extend_from_slice(&[0u8; 8]); // fraction, play count
            bytes.extend_from_slice(&chunk);
            let riff_size = (bytes.len() - 8) as u32;
            bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
            let mut f = fs::File::create(path).unwrap();
            f.write_all(&bytes).unwrap();
        }
    }

    #[test]
    fn test_load_wav_with_smpl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a4.wav");
        write_test_wav(&path, 1, 1000, Some((69, 100, 900)));

        let sample = PcmSample::load(&path).unwrap();
        assert_eq!(sample.unity_midi_note, 69);
        assert_eq!(sample.loop_count, 1);
        assert_eq!(sample.loop_start, 100);
        assert_eq!(sample.loop_end, 900);
        assert_eq!(sample.frames(), 1000);
    }

    #[test]
    fn test_malformed_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        fs::write(&path, b"this is not a wave file at all").unwrap();
        assert!(PcmSample::load(&path).is_err());
    }

    #[test]
    fn test_note_name_parse() {
        assert_eq!(find_note_number_in_name("piano_A4.wav", false), Some(69));
        assert_eq!(find_note_number_in_name("PIANO_c#3.WAV", false), Some(49));
        assert_eq!(find_note_number_in_name("bass-Db2.wav", false), Some(37));
        assert_eq!(find_note_number_in_name("kick.wav", false), None);
        // octave shift policy
        assert_eq!(find_note_number_in_name("piano_A4.wav", true), Some(81));
    }

    #[test]
    fn test_folder_parse_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        write_test_wav(&dir.path().join("C3.wav"), 1, 64, Some((48, 0, 63)));
        write_test_wav(&dir.path().join("C5.wav"), 1, 64, Some((72, 0, 63)));

        let folder = WaveFolder::new(dir.path());
        let set = folder.parse_folder(false, false);

        // every slot must be filled by nearest-higher inheritance
        for slot in set.iter() {
            assert!(slot.is_some());
        }
        assert_eq!(set[48].as_ref().unwrap().unity_midi_note, 48);
        assert_eq!(set[72].as_ref().unwrap().unity_midi_note, 72);
        // between the two zones the upper sample is inherited
        assert_eq!(set[60].as_ref().unwrap().unity_midi_note, 72);
        // above the highest zone it extends upward
        assert_eq!(set[120].as_ref().unwrap().unity_midi_note, 72);
        // below the lowest zone the lowest sample extends down
        assert_eq!(set[10].as_ref().unwrap().unity_midi_note, 48);
    }

    #[test]
    fn test_aubio_slices_map_to_major_scale() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        for i in 0..3 {
            write_test_wav(&dir.path().join(format!("{name}_{i}.wav")), 1, 32, None);
        }
        let folder = WaveFolder::new(dir.path());
        let set = folder.parse_folder(false, true);
        // C major from middle C: 60, 62, 64
        assert!(set[60].is_some());
        assert!(set[62].is_some());
        assert!(set[64].is_some());
        assert!(set[61].is_none());
        assert!(set[60].as_ref().unwrap().pitchless);
    }
}
