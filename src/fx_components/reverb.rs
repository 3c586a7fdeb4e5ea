// src/fx_components/reverb.rs

//! A Schroeder-style reverb with one tank per channel.
//!
//! Each tank is a bank of parallel comb filters feeding two series all-pass
//! diffusers. Tanks for channels past the first get slightly longer delay lines
//! so the tails decorrelate, which is what `width` then spreads across the
//! stereo image.

/// Extra delay (in 44.1 kHz samples) added per channel to decorrelate tanks.
const STEREO_SPREAD: f32 = 23.0;
/// Feedback range the room size is mapped onto.
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

/// A simple one-pole low-pass filter, used for damping the reverb tail.
#[derive(Debug, Clone, Copy, Default)]
struct DampingFilter {
    z1: f32,
}
impl DampingFilter {
    #[inline(always)]
    fn process(&mut self, input: f32, coeff: f32) -> f32 {
        let output = input * (1.0 - coeff) + self.z1 * coeff;
        self.z1 = output;
        output
    }
}

#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    damping_filter: DampingFilter,
}
impl CombFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            damping_filter: DampingFilter::default(),
        }
    }
    #[inline(always)]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        let damped_output = self.damping_filter.process(output, damping);
        self.buffer[self.write_pos] = input + damped_output * feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }
    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.damping_filter = DampingFilter::default();
        self.write_pos = 0;
    }
}

/// Smears the phase of a signal to increase echo density.
#[derive(Debug, Clone)]
struct AllPassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
}
impl AllPassFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
        }
    }
    #[inline(always)]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = -input + delayed;
        self.buffer[self.write_pos] = input + delayed * 0.5; // G = 0.5 (fixed)
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }
    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

#[derive(Debug, Clone)]
struct Tank {
    comb_filters: [CombFilter; 4],
    all_pass_filters: [AllPassFilter; 2],
}

impl Tank {
    fn new(sr_factor: f32, spread: f32) -> Self {
        // Prime numbers are good for delay lengths to avoid periodic artifacts.
        let comb = |base: f32| CombFilter::new(((base + spread) * sr_factor) as usize);
        let all_pass = |base: f32| AllPassFilter::new(((base + spread) * sr_factor) as usize);
        Self {
            comb_filters: [comb(1117.0), comb(1187.0), comb(1277.0), comb(1351.0)],
            all_pass_filters: [all_pass(223.0), all_pass(557.0)],
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let comb_out = self
            .comb_filters
            .iter_mut()
            .map(|f| f.process(input, feedback, damping))
            .sum::<f32>()
            * 0.25;
        self.all_pass_filters
            .iter_mut()
            .fold(comb_out, |acc, f| f.process(acc))
    }

    fn clear(&mut self) {
        self.comb_filters.iter_mut().for_each(CombFilter::clear);
        self.all_pass_filters.iter_mut().for_each(AllPassFilter::clear);
    }
}

#[derive(Debug)]
pub struct Reverb {
    tanks: Vec<Tank>,
    /// Per-channel wet output of the current frame.
    wet_frame: Vec<f32>,
    feedback: f32,
    damping: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32, channels: usize) -> Self {
        let sr_factor = sample_rate / 44100.0;
        let channels = channels.max(1);
        Self {
            tanks: (0..channels)
                .map(|c| Tank::new(sr_factor, STEREO_SPREAD * c as f32))
                .collect(),
            wet_frame: vec![0.0; channels],
            feedback: ROOM_OFFSET,
            damping: 0.0,
        }
    }

    /// Applies room size and damping (both 0.0 to 1.0). Called once per block.
    pub fn configure(&mut self, room_size: f32, damping: f32) {
        self.feedback = room_size.clamp(0.0, 1.0) * ROOM_SCALE + ROOM_OFFSET;
        self.damping = damping.clamp(0.0, 1.0) * DAMP_SCALE;
    }

    /// Processes one interleaved frame in place.
    ///
    /// Each channel's output is `dry * input + wet * (mix of tank outputs)`, where
    /// `width` decides how much of a channel's own tank it keeps versus the
    /// average of the other channels' tanks.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32], wet: f32, dry: f32, width: f32) {
        let channels = frame.len().min(self.tanks.len());
        for c in 0..channels {
            self.wet_frame[c] = self.tanks[c].process(frame[c], self.feedback, self.damping);
        }

        if channels == 1 {
            frame[0] = frame[0] * dry + self.wet_frame[0] * wet;
            return;
        }

        let own = wet * (width * 0.5 + 0.5);
        let cross = wet * ((1.0 - width) * 0.5);
        let total: f32 = self.wet_frame[..channels].iter().sum();
        for c in 0..channels {
            let others = (total - self.wet_frame[c]) / (channels - 1) as f32;
            frame[c] = frame[c] * dry + self.wet_frame[c] * own + others * cross;
        }
    }

    /// Clears the tail.
    pub fn reset(&mut self) {
        self.tanks.iter_mut().for_each(Tank::clear);
        self.wet_frame.iter_mut().for_each(|s| *s = 0.0);
    }
}
