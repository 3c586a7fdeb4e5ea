// src/fx_components/delay.rs

//! A fractional feedback delay using a circular buffer and linear interpolation.

/// Per-sample one-pole smoothing applied to time and feedback to prevent clicks.
const SMOOTHING_COEFF: f32 = 0.9995;

#[derive(Debug)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    max_delay_samples: usize,
    sample_rate: f32,
    smoothed_seconds: f32,
    smoothed_feedback: f32,
}

impl DelayLine {
    pub fn new(max_delay_seconds: f32, sample_rate: f32, seconds: f32, feedback: f32) -> Self {
        // One extra sample so the longest delay never reads the slot being written.
        let max_delay_samples = ((max_delay_seconds * sample_rate).ceil() as usize).max(1) + 1;
        Self {
            buffer: vec![0.0; max_delay_samples],
            write_pos: 0,
            max_delay_samples,
            sample_rate,
            smoothed_seconds: seconds,
            smoothed_feedback: feedback,
        }
    }

    #[inline]
    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.max_delay_samples;
    }

    #[inline]
    fn read(&self, delay_samples: f32) -> f32 {
        let len = self.max_delay_samples as f32;
        let delay_samples = delay_samples.clamp(1.0, len - 1.0);
        let read_pos_float = (self.write_pos as f32 - delay_samples + len) % len;
        let index1 = read_pos_float.floor() as usize % self.max_delay_samples;
        let index2 = (index1 + 1) % self.max_delay_samples;
        let fraction = read_pos_float.fract();
        let sample1 = self.buffer[index1];
        let sample2 = self.buffer[index2];
        sample1 + fraction * (sample2 - sample1)
    }

    /// Processes one sample and returns the mixed output
    /// `input * (1 - mix) + delayed * mix`.
    #[inline]
    pub fn process(&mut self, input: f32, seconds: f32, feedback: f32, mix: f32) -> f32 {
        self.smoothed_seconds =
            SMOOTHING_COEFF * self.smoothed_seconds + (1.0 - SMOOTHING_COEFF) * seconds;
        self.smoothed_feedback =
            SMOOTHING_COEFF * self.smoothed_feedback + (1.0 - SMOOTHING_COEFF) * feedback;

        let delayed = self.read(self.smoothed_seconds * self.sample_rate);
        let write_sample = input + delayed * self.smoothed_feedback;
        self.write(write_sample.clamp(-1.0, 1.0));

        input * (1.0 - mix) + delayed * mix
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}
