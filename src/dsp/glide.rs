//! Portamento: a linear semitone ramp from the previous note to the
//! current note. Plain scalar state machine, not a module.

/// Everything needed to start a glide, gathered at note-on.
#[derive(Debug, Clone, Copy)]
pub struct GlideInfo {
    pub start_note: u8,
    pub end_note: u8,
    pub glide_time_msec: f64,
    pub sample_rate: f64,
}

/// Produces a decaying semitone offset: starts at (start - end) and
/// ramps linearly to zero over the glide time.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlideModulator {
    current_semitones: f64,
    step_per_sample: f64,
    samples_remaining: u64,
}

impl GlideModulator {
    pub fn start_modulator(&mut self, info: GlideInfo) {
        let total_samples = (info.glide_time_msec * info.sample_rate / 1000.0).round() as u64;
        let range = info.start_note as f64 - info.end_note as f64;
        if total_samples == 0 || range == 0.0 {
            self.current_semitones = 0.0;
            self.samples_remaining = 0;
            self.step_per_sample = 0.0;
            return;
        }
        self.current_semitones = range;
        self.step_per_sample = range / total_samples as f64;
        self.samples_remaining = total_samples;
    }

    pub fn is_active(&self) -> bool {
        self.samples_remaining > 0
    }

    /// Current semitone offset; read once per block during update().
    pub fn next_modulation_value(&self) -> f64 {
        if self.samples_remaining > 0 {
            self.current_semitones
        } else {
            0.0
        }
    }

    /// Consume one block's worth of samples.
    pub fn advance_clock(&mut self, samples: usize) {
        if self.samples_remaining == 0 {
            return;
        }
        let advance = (samples as u64).min(self.samples_remaining);
        self.current_semitones -= self.step_per_sample * advance as f64;
        self.samples_remaining -= advance;
        if self.samples_remaining == 0 {
            self.current_semitones = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_glide_ramps_to_zero() {
        let mut glide = GlideModulator::default();
        glide.start_modulator(GlideInfo {
            start_note: 72,
            end_note: 60,
            glide_time_msec: 10.0,
            sample_rate: 48000.0,
        });
        // starts a full octave above the target
        assert_relative_eq!(glide.next_modulation_value(), 12.0, epsilon = 1e-9);

        glide.advance_clock(240); // half the glide
        assert_relative_eq!(glide.next_modulation_value(), 6.0, epsilon = 1e-9);

        glide.advance_clock(240);
        assert_eq!(glide.next_modulation_value(), 0.0);
        assert!(!glide.is_active());
    }

    #[test]
    fn test_zero_glide_time_is_inert() {
        let mut glide = GlideModulator::default();
        glide.start_modulator(GlideInfo {
            start_note: 72,
            end_note: 60,
            glide_time_msec: 0.0,
            sample_rate: 48000.0,
        });
        assert_eq!(glide.next_modulation_value(), 0.0);
    }

    #[test]
    fn test_downward_glide() {
        let mut glide = GlideModulator::default();
        glide.start_modulator(GlideInfo {
            start_note: 48,
            end_note: 60,
            glide_time_msec: 5.0,
            sample_rate: 48000.0,
        });
        assert_relative_eq!(glide.next_modulation_value(), -12.0, epsilon = 1e-9);
        glide.advance_clock(1000);
        assert_eq!(glide.next_modulation_value(), 0.0);
    }
}
