// src/fx.rs

//! The reverb + delay effects chain and its control-side parameter handle.
//!
//! Parameters are a small `Copy` struct published through an [`ArcSwap`]. The
//! control loop builds a fresh snapshot for every change and swaps it in whole,
//! the render thread loads one snapshot per block. A block therefore never sees
//! a mix of old and new fields, and neither side ever waits on the other.

use crate::asset::ChannelLayout;
use crate::error::EffectError;
use crate::fx_components::{DelayLine, Reverb};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const WET_LEVEL_RANGE: (f32, f32) = (0.0, 1.0);
pub const ROOM_SIZE_RANGE: (f32, f32) = (0.0, 1.0);
pub const DAMPING_RANGE: (f32, f32) = (0.0, 1.0);
pub const WIDTH_RANGE: (f32, f32) = (0.0, 1.0);
pub const DELAY_MIX_RANGE: (f32, f32) = (0.0, 1.0);
pub const DELAY_SECONDS_RANGE: (f32, f32) = (0.01, 4.0);
/// Kept below 1.0 so the delay cannot self-oscillate.
pub const FEEDBACK_RANGE: (f32, f32) = (0.0, 0.95);

/// Clamps into `range`; NaN collapses to the lower bound.
#[inline]
pub fn clamp_to(value: f32, range: (f32, f32)) -> f32 {
    if value.is_nan() {
        range.0
    } else {
        value.clamp(range.0, range.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    pub wet_level: f32,
    pub room_size: f32,
    pub damping: f32,
    pub width: f32,
    pub delay_mix: f32,
    pub delay_seconds: f32,
    pub feedback: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            wet_level: 0.0,
            room_size: 0.85,
            damping: 0.2,
            width: 0.9,
            delay_mix: 0.0,
            delay_seconds: 0.6,
            feedback: 0.65,
        }
    }
}

impl EffectParameters {
    /// Always `1 - wet_level`, so the total gain stays constant as the
    /// reverb is dialed in.
    #[inline]
    pub fn dry_level(&self) -> f32 {
        1.0 - self.wet_level
    }

    pub fn clamped(self) -> Self {
        Self {
            wet_level: clamp_to(self.wet_level, WET_LEVEL_RANGE),
            room_size: clamp_to(self.room_size, ROOM_SIZE_RANGE),
            damping: clamp_to(self.damping, DAMPING_RANGE),
            width: clamp_to(self.width, WIDTH_RANGE),
            delay_mix: clamp_to(self.delay_mix, DELAY_MIX_RANGE),
            delay_seconds: clamp_to(self.delay_seconds, DELAY_SECONDS_RANGE),
            feedback: clamp_to(self.feedback, FEEDBACK_RANGE),
        }
    }

    #[cfg(test)]
    pub fn is_within_ranges(&self) -> bool {
        *self == self.clamped()
    }
}

/// Cloneable setter handle for the effect parameters. Every setter clamps.
#[derive(Debug, Clone)]
pub struct EffectsControl {
    shared: Arc<ArcSwap<EffectParameters>>,
}

impl Default for EffectsControl {
    fn default() -> Self {
        Self::new(EffectParameters::default())
    }
}

impl EffectsControl {
    pub fn new(initial: EffectParameters) -> Self {
        Self {
            shared: Arc::new(ArcSwap::from_pointee(initial.clamped())),
        }
    }

    /// Current parameters. Lock-free; safe on the render thread.
    #[inline]
    pub fn snapshot(&self) -> EffectParameters {
        **self.shared.load()
    }

    pub fn set_wet_level(&self, wet_level: f32) {
        self.update(|p| p.wet_level = clamp_to(wet_level, WET_LEVEL_RANGE));
    }

    pub fn set_delay_mix(&self, mix: f32) {
        self.update(|p| p.delay_mix = clamp_to(mix, DELAY_MIX_RANGE));
    }

    pub fn update_reverb_parameters(
        &self,
        room_size: Option<f32>,
        damping: Option<f32>,
        width: Option<f32>,
    ) {
        self.update(|p| {
            if let Some(v) = room_size {
                p.room_size = clamp_to(v, ROOM_SIZE_RANGE);
            }
            if let Some(v) = damping {
                p.damping = clamp_to(v, DAMPING_RANGE);
            }
            if let Some(v) = width {
                p.width = clamp_to(v, WIDTH_RANGE);
            }
        });
    }

    pub fn update_delay_parameters(&self, delay_seconds: Option<f32>, feedback: Option<f32>) {
        self.update(|p| {
            if let Some(v) = delay_seconds {
                p.delay_seconds = clamp_to(v, DELAY_SECONDS_RANGE);
            }
            if let Some(v) = feedback {
                p.feedback = clamp_to(v, FEEDBACK_RANGE);
            }
        });
    }

    /// Replaces every field at once.
    pub fn replace(&self, params: EffectParameters) {
        let next = params.clamped();
        if next != self.snapshot() {
            self.shared.store(Arc::new(next));
        }
    }

    fn update(&self, apply: impl Fn(&mut EffectParameters)) {
        let current = self.snapshot();
        let mut next = current;
        apply(&mut next);
        if next == current {
            return;
        }
        self.shared.rcu(|p| {
            let mut next = **p;
            apply(&mut next);
            next
        });
    }
}

/// Audio-side effect state: one reverb tank and one delay line per channel.
///
/// The tails persist from one `process` call to the next, so a chain must be
/// fed consecutive blocks of the same stream.
#[derive(Debug)]
pub struct EffectsChain {
    control: EffectsControl,
    sample_rate: u32,
    layout: ChannelLayout,
    reverb: Reverb,
    delays: Vec<DelayLine>,
}

impl EffectsChain {
    pub fn new(
        sample_rate: u32,
        layout: ChannelLayout,
        control: EffectsControl,
    ) -> Result<Self, EffectError> {
        if sample_rate == 0 {
            return Err(EffectError::InvalidSampleRate(sample_rate));
        }
        let params = control.snapshot();
        let sr = sample_rate as f32;
        let reverb = Reverb::new(sr, layout.count());
        let delays = (0..layout.count())
            .map(|_| {
                DelayLine::new(
                    DELAY_SECONDS_RANGE.1,
                    sr,
                    params.delay_seconds,
                    params.feedback,
                )
            })
            .collect();
        Ok(Self {
            control,
            sample_rate,
            layout,
            reverb,
            delays,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Runs reverb then delay over an interleaved block in place. The frame
    /// count never changes.
    ///
    /// On a non-finite result the internal state is cleared and an error is
    /// returned; the block contents are then unspecified and the caller should
    /// fall back to its dry copy.
    pub fn process(&mut self, block: &mut [f32], layout: ChannelLayout) -> Result<(), EffectError> {
        if layout != self.layout {
            return Err(EffectError::ChannelMismatch {
                expected: self.layout.count(),
                actual: layout.count(),
            });
        }
        let channels = layout.count();
        if block.len() % channels != 0 {
            return Err(EffectError::ChannelMismatch {
                expected: channels,
                actual: block.len() % channels,
            });
        }

        let params = self.control.snapshot();
        let wet = params.wet_level;
        let dry = params.dry_level();
        self.reverb.configure(params.room_size, params.damping);

        for frame in block.chunks_exact_mut(channels) {
            self.reverb.process_frame(frame, wet, dry, params.width);
            for (sample, delay) in frame.iter_mut().zip(self.delays.iter_mut()) {
                *sample = delay.process(
                    *sample,
                    params.delay_seconds,
                    params.feedback,
                    params.delay_mix,
                );
            }
        }

        if block.iter().any(|s| !s.is_finite()) {
            self.reset();
            return Err(EffectError::NonFinite);
        }
        Ok(())
    }

    /// Drops all reverb and delay tails.
    pub fn reset(&mut self) {
        self.reverb.reset();
        self.delays.iter_mut().for_each(DelayLine::reset);
    }
}
