//! Ping-pong stereo delay: each channel's feedback is written into the
//! opposite channel's delay line, so echoes bounce across the image.

use crate::audio::buffer::AudioBuffer;
use crate::dsp::functions::{db_to_raw, do_linear_interpolation};
use crate::params::DelayParams;

/// Longest supported delay per side.
const MAX_DELAY_MSEC: f64 = 2000.0;

/// Circular buffer with fractional-sample read.
#[derive(Debug, Clone, Default)]
struct DelayBuffer {
    buffer: Vec<f64>,
    wrap_mask: usize,
    write_index: usize,
}

impl DelayBuffer {
    fn create(&mut self, length_samples: usize) {
        let length = (length_samples + 1).next_power_of_two();
        self.buffer = vec![0.0; length];
        self.wrap_mask = length - 1;
        self.write_index = 0;
    }

    #[inline]
    fn read(&self, delay_samples: f64) -> f64 {
        let int_delay = delay_samples as usize;
        let frac = delay_samples - int_delay as f64;
        let len = self.buffer.len();
        let index_a = (self.write_index + len - int_delay) & self.wrap_mask;
        let index_b = (self.write_index + len - int_delay - 1) & self.wrap_mask;
        do_linear_interpolation(self.buffer[index_a], self.buffer[index_b], frac)
    }

    #[inline]
    fn write(&mut self, input: f64) {
        self.buffer[self.write_index] = input;
        self.write_index = (self.write_index + 1) & self.wrap_mask;
    }
}

pub struct PingPongDelay {
    sample_rate: f64,
    samples_per_msec: f64,
    delay_buffer_left: DelayBuffer,
    delay_buffer_right: DelayBuffer,
    delay_in_samples_left: f64,
    delay_in_samples_right: f64,
    dry_mix: f64,
    wet_mix: f64,
    buffers: AudioBuffer,
}

impl PingPongDelay {
    pub fn new(block_size: usize) -> Self {
        Self {
            sample_rate: 0.0,
            samples_per_msec: 0.0,
            delay_buffer_left: DelayBuffer::default(),
            delay_buffer_right: DelayBuffer::default(),
            delay_in_samples_left: 0.0,
            delay_in_samples_right: 0.0,
            dry_mix: 1.0,
            wet_mix: 0.5,
            buffers: AudioBuffer::new(block_size),
        }
    }

    pub fn reset(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.samples_per_msec = sample_rate / 1000.0;
        let max_samples = (MAX_DELAY_MSEC * self.samples_per_msec) as usize;
        self.delay_buffer_left.create(max_samples);
        self.delay_buffer_right.create(max_samples);
    }

    fn update(&mut self, params: &DelayParams) {
        self.dry_mix = db_to_raw(params.dry_level_db);
        self.wet_mix = db_to_raw(params.wet_level_db);
        self.delay_in_samples_left =
            (params.left_delay_msec * self.samples_per_msec).clamp(1.0, MAX_DELAY_MSEC * self.samples_per_msec);
        self.delay_in_samples_right =
            (params.right_delay_msec * self.samples_per_msec).clamp(1.0, MAX_DELAY_MSEC * self.samples_per_msec);
    }

    /// Process the module buffer in place.
    pub fn render(&mut self, params: &DelayParams, samples_to_process: usize) {
        self.update(params);
        let feedback = params.feedback_pct / 100.0;
        let n = samples_to_process.min(self.buffers.block_size());
        let (left, right) = self.buffers.channels_mut();

        for i in 0..n {
            let xn_left = left[i];
            let xn_right = right[i];

            let yn_left = self.delay_buffer_left.read(self.delay_in_samples_left);
            let yn_right = self.delay_buffer_right.read(self.delay_in_samples_right);

            let dn_left = xn_left + feedback * yn_left;
            let dn_right = xn_right + feedback * yn_right;

            // the cross-write makes the ping-pong
            self.delay_buffer_left.write(dn_right);
            self.delay_buffer_right.write(dn_left);

            left[i] = self.dry_mix * xn_left + self.wet_mix * yn_left;
            right[i] = self.dry_mix * xn_right + self.wet_mix * yn_right;
        }
    }

    pub fn buffers(&self) -> &AudioBuffer {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 48000.0;

    #[test]
    fn test_echo_bounces_to_opposite_channel() {
        let params = DelayParams {
            left_delay_msec: 1.0, // 48 samples
            right_delay_msec: 1.0,
            feedback_pct: 0.0,
            dry_level_db: -96.0,
            wet_level_db: 0.0,
        };
        let mut delay = PingPongDelay::new(64);
        delay.reset(FS);

        // impulse on the left only
        delay.buffers_mut().left_mut()[0] = 1.0;
        delay.render(&params, 64);

        // after 48 samples the echo appears on the RIGHT channel
        let right_tap = delay.buffers().right()[48];
        let left_tap = delay.buffers().left()[48];
        assert!(right_tap > 0.5, "right echo {right_tap}");
        assert!(left_tap.abs() < 1e-6, "left must stay quiet, got {left_tap}");
    }

    #[test]
    fn test_feedback_produces_repeats() {
        let params = DelayParams {
            left_delay_msec: 0.25, // 12 samples
            right_delay_msec: 0.25,
            feedback_pct: 50.0,
            dry_level_db: -96.0,
            wet_level_db: 0.0,
        };
        let mut delay = PingPongDelay::new(64);
        delay.reset(FS);

        delay.buffers_mut().left_mut()[0] = 1.0;
        delay.render(&params, 64);

        // repeats at 12-sample spacing, alternating channels
        assert!(delay.buffers().right()[12] > 0.5);
        assert!(delay.buffers().left()[24] > 0.2);
        assert!(delay.buffers().right()[36] > 0.1);
    }

    #[test]
    fn test_dry_path_preserved() {
        let params = DelayParams {
            dry_level_db: 0.0,
            wet_level_db: -96.0,
            ..DelayParams::default()
        };
        let mut delay = PingPongDelay::new(64);
        delay.reset(FS);
        for i in 0..64 {
            delay.buffers_mut().left_mut()[i] = (i as f64 / 64.0).sin();
        }
        let input: Vec<f64> = delay.buffers().left().to_vec();
        delay.render(&params, 64);
        for i in 0..64 {
            assert!((delay.buffers().left()[i] - input[i]).abs() < 1e-4);
        }
    }
}
