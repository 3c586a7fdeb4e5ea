// src/audio_engine.rs

//! The render context driven by the output device.
//!
//! [`PlaybackEngine`] owns everything the render step mutates: the current
//! asset, the read cursor, the effects chain and its scratch buffers. The
//! device callback reaches it through [`render_shared`], which never waits:
//! if the control side happens to hold the engine (only possible while the
//! stream is being torn down) the block is silent.

use crate::asset::{AudioAsset, ChannelLayout};
use crate::fx::EffectsChain;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Read position into the current asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackCursor {
    pub position: usize,
    pub active: bool,
}

/// Lock-free state the control side reads or writes while a stream runs.
#[derive(Debug)]
pub struct EngineShared {
    /// Linear output gain stored as `f32::to_bits`.
    master_gain: AtomicU32,
    /// Cursor position after the last rendered block.
    position: AtomicUsize,
    /// Blocks where the effects failed and dry audio was played instead.
    dry_fallbacks: AtomicUsize,
}

impl Default for EngineShared {
    fn default() -> Self {
        Self {
            master_gain: AtomicU32::new(1.0f32.to_bits()),
            position: AtomicUsize::new(0),
            dry_fallbacks: AtomicUsize::new(0),
        }
    }
}

impl EngineShared {
    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    pub fn set_master_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        self.master_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    pub fn dry_fallbacks(&self) -> usize {
        self.dry_fallbacks.load(Ordering::Relaxed)
    }
}

pub type SharedEngine = Arc<Mutex<PlaybackEngine>>;

pub struct PlaybackEngine {
    asset: Option<Arc<AudioAsset>>,
    cursor: PlaybackCursor,
    effects: Option<EffectsChain>,
    output: ChannelLayout,
    shared: Arc<EngineShared>,
    chunk: Vec<f32>,
    dry: Vec<f32>,
}

impl PlaybackEngine {
    /// `max_block_frames` sizes the scratch buffers up front so steady-state
    /// rendering does not allocate.
    pub fn new(output: ChannelLayout, shared: Arc<EngineShared>, max_block_frames: usize) -> Self {
        // Room for up to 8 source channels before a resize is needed.
        let capacity = max_block_frames.max(1) * 8;
        Self {
            asset: None,
            cursor: PlaybackCursor::default(),
            effects: None,
            output,
            shared,
            chunk: Vec::with_capacity(capacity),
            dry: Vec::with_capacity(capacity),
        }
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    /// Installs a new asset and rewinds. Only call while no stream is rendering.
    pub fn load(&mut self, asset: Arc<AudioAsset>) {
        self.asset = Some(asset);
        self.cursor = PlaybackCursor {
            position: 0,
            active: true,
        };
        self.shared.position.store(0, Ordering::Relaxed);
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn set_active(&mut self, active: bool) {
        self.cursor.active = active;
    }

    pub fn effects(&self) -> Option<&EffectsChain> {
        self.effects.as_ref()
    }

    pub fn set_effects(&mut self, effects: EffectsChain) {
        self.effects = Some(effects);
    }

    pub fn output_layout(&self) -> ChannelLayout {
        self.output
    }

    pub fn set_output_layout(&mut self, output: ChannelLayout) {
        self.output = output;
    }

    /// Fills `out` with `frames` interleaved frames in the output layout.
    ///
    /// Reads up to the end of the track, runs the effects, remaps channels,
    /// zero-pads a short final block and loops the cursor back to the start.
    pub fn render(&mut self, out: &mut [f32], frames: usize) {
        let out_ch = self.output.count();
        let frames = frames.min(out.len() / out_ch);

        let asset = match (&self.asset, self.cursor.active) {
            (Some(asset), true) => asset.clone(),
            _ => {
                out.fill(0.0);
                return;
            }
        };

        let total = asset.frame_count();
        if self.cursor.position >= total {
            self.cursor.position = 0;
        }
        let n = frames.min(total - self.cursor.position);
        let src_layout = asset.layout();
        let src = asset.frames(self.cursor.position, n);

        self.chunk.clear();
        self.chunk.extend_from_slice(src);

        let processed = match self.effects.as_mut() {
            Some(chain) => {
                self.dry.clear();
                self.dry.extend_from_slice(src);
                chain.process(&mut self.chunk, src_layout).is_ok()
            }
            None => true,
        };
        let block: &[f32] = if processed {
            &self.chunk
        } else {
            self.shared.dry_fallbacks.fetch_add(1, Ordering::Relaxed);
            &self.dry
        };

        let written = n * out_ch;
        remap_channels(block, src_layout, &mut out[..written], self.output);
        out[written..].fill(0.0);

        let gain = self.shared.master_gain();
        if gain != 1.0 {
            out[..written].iter_mut().for_each(|s| *s *= gain);
        }

        if n < frames {
            self.cursor.position = 0;
        } else {
            self.cursor.position += n;
            if self.cursor.position >= total {
                self.cursor.position = 0;
            }
        }
        self.shared
            .position
            .store(self.cursor.position, Ordering::Relaxed);
    }
}

/// Device-callback entry point. Never blocks.
pub fn render_shared(engine: &SharedEngine, out: &mut [f32], frames: usize) {
    match engine.try_lock() {
        Ok(mut engine) => engine.render(out, frames),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().render(out, frames),
        Err(TryLockError::WouldBlock) => out.fill(0.0),
    }
}

/// Copies interleaved frames from `src` to `dst`, changing the channel count.
///
/// Mono is duplicated onto every output channel. Going down in channels keeps
/// the leading channels (stereo to mono takes the left channel, it does not
/// average). Going up from more than one channel leaves the extra outputs silent.
pub fn remap_channels(
    src: &[f32],
    src_layout: ChannelLayout,
    dst: &mut [f32],
    dst_layout: ChannelLayout,
) {
    let src_ch = src_layout.count();
    let dst_ch = dst_layout.count();

    if src_ch == dst_ch {
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    for (in_frame, out_frame) in src.chunks_exact(src_ch).zip(dst.chunks_exact_mut(dst_ch)) {
        if src_ch == 1 {
            out_frame.fill(in_frame[0]);
        } else {
            for (c, sample) in out_frame.iter_mut().enumerate() {
                *sample = in_frame.get(c).copied().unwrap_or(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::EffectsControl;

    fn ramp_asset(frames: usize, channels: u16) -> Arc<AudioAsset> {
        let samples = (0..frames * channels as usize)
            .map(|i| (i + 1) as f32 / 1000.0)
            .collect();
        Arc::new(AudioAsset::new("ramp", samples, 48000, channels).unwrap())
    }

    fn engine_for(asset: &Arc<AudioAsset>, output: ChannelLayout, effects: Option<EffectsControl>) -> PlaybackEngine {
        let mut engine = PlaybackEngine::new(output, Arc::new(EngineShared::default()), 64);
        if let Some(control) = effects {
            engine.set_effects(
                EffectsChain::new(asset.sample_rate(), asset.layout(), control).unwrap(),
            );
        }
        engine.load(asset.clone());
        engine
    }

    #[test]
    fn test_silence_without_asset() {
        let mut engine = PlaybackEngine::new(ChannelLayout::STEREO, Arc::new(EngineShared::default()), 16);
        let mut out = vec![1.0; 32];
        engine.render(&mut out, 16);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_silence_when_inactive() {
        let asset = ramp_asset(100, 1);
        let mut engine = engine_for(&asset, ChannelLayout::MONO, None);
        engine.set_active(false);
        let mut out = vec![1.0; 16];
        engine.render(&mut out, 16);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.cursor().position, 0);
    }

    #[test]
    fn test_full_block_matches_processed_source() {
        let asset = ramp_asset(100, 2);
        let control = EffectsControl::default();
        control.set_wet_level(0.6);
        control.set_delay_mix(0.3);
        let mut engine = engine_for(&asset, ChannelLayout::STEREO, Some(control.clone()));
        let mut reference =
            EffectsChain::new(asset.sample_rate(), asset.layout(), control).unwrap();

        for block in 0..3 {
            let mut out = vec![0.0; 32];
            engine.render(&mut out, 16);

            let mut expected = asset.frames(block * 16, 16).to_vec();
            reference.process(&mut expected, asset.layout()).unwrap();
            assert_eq!(out, expected);
        }
        assert_eq!(engine.cursor().position, 48);
    }

    #[test]
    fn test_end_of_track_pads_and_wraps() {
        let asset = ramp_asset(20, 1);
        let mut engine = engine_for(&asset, ChannelLayout::MONO, Some(EffectsControl::default()));

        let mut out = vec![0.0; 16];
        engine.render(&mut out, 16);
        assert_eq!(engine.cursor().position, 16);

        let mut out = vec![9.0; 16];
        engine.render(&mut out, 16);
        assert_eq!(&out[..4], asset.frames(16, 4));
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(engine.cursor().position, 0);

        let mut out = vec![0.0; 16];
        engine.render(&mut out, 16);
        assert_eq!(&out[..], asset.frames(0, 16));
    }

    #[test]
    fn test_boundary_tail_is_processed_and_padding_stays_silent() {
        let asset = ramp_asset(20, 1);
        let control = EffectsControl::default();
        control.set_wet_level(0.6);
        control.set_delay_mix(0.3);
        let mut engine = engine_for(&asset, ChannelLayout::MONO, Some(control.clone()));
        let mut reference =
            EffectsChain::new(asset.sample_rate(), asset.layout(), control).unwrap();

        let mut out = vec![0.0; 16];
        engine.render(&mut out, 16);
        let mut head = asset.frames(0, 16).to_vec();
        reference.process(&mut head, asset.layout()).unwrap();
        assert_eq!(out, head);

        let mut out = vec![9.0; 16];
        engine.render(&mut out, 16);
        let mut tail = asset.frames(16, 4).to_vec();
        reference.process(&mut tail, asset.layout()).unwrap();
        assert_eq!(&out[..4], &tail[..]);
        assert_ne!(&out[..4], asset.frames(16, 4));
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(engine.cursor().position, 0);
    }

    #[test]
    fn test_exact_end_wraps_without_padding() {
        let asset = ramp_asset(32, 1);
        let mut engine = engine_for(&asset, ChannelLayout::MONO, None);
        let mut out = vec![0.0; 16];
        engine.render(&mut out, 16);
        engine.render(&mut out, 16);
        assert_eq!(&out[..], asset.frames(16, 16));
        assert_eq!(engine.cursor().position, 0);
    }

    #[test]
    fn test_effect_failure_falls_back_to_dry() {
        let asset = ramp_asset(64, 2);
        let shared = Arc::new(EngineShared::default());
        let mut engine = PlaybackEngine::new(ChannelLayout::STEREO, shared.clone(), 16);
        // A mono chain cannot process a stereo asset.
        let control = EffectsControl::default();
        control.set_wet_level(1.0);
        engine.set_effects(EffectsChain::new(48000, ChannelLayout::MONO, control).unwrap());
        engine.load(asset.clone());

        let mut out = vec![0.0; 32];
        engine.render(&mut out, 16);
        assert_eq!(&out[..], asset.frames(0, 16));
        assert_eq!(shared.dry_fallbacks(), 1);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let asset = ramp_asset(8, 1);
        let mut engine = engine_for(&asset, ChannelLayout::STEREO, None);
        let mut out = vec![0.0; 8];
        engine.render(&mut out, 4);
        let src = asset.frames(0, 4);
        for (i, frame) in out.chunks(2).enumerate() {
            assert_eq!(frame, &[src[i], src[i]]);
        }
    }

    #[test]
    fn test_stereo_to_mono_takes_first_channel() {
        let asset = ramp_asset(8, 2);
        let mut engine = engine_for(&asset, ChannelLayout::MONO, None);
        let mut out = vec![0.0; 4];
        engine.render(&mut out, 4);
        let src = asset.frames(0, 4);
        let left: Vec<f32> = src.chunks(2).map(|f| f[0]).collect();
        assert_eq!(out, left);
    }

    #[test]
    fn test_stereo_to_quad_leaves_extra_channels_silent() {
        let src = [0.1, 0.2, 0.3, 0.4];
        let mut dst = [9.0; 8];
        remap_channels(&src, ChannelLayout::STEREO, &mut dst, ChannelLayout::new(4).unwrap());
        assert_eq!(dst, [0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_master_gain_scales_output() {
        let asset = ramp_asset(16, 1);
        let shared = Arc::new(EngineShared::default());
        let mut engine = PlaybackEngine::new(ChannelLayout::MONO, shared.clone(), 16);
        engine.load(asset.clone());
        shared.set_master_gain(0.5);

        let mut out = vec![0.0; 4];
        engine.render(&mut out, 4);
        for (o, s) in out.iter().zip(asset.frames(0, 4)) {
            assert!((o - s * 0.5).abs() < 1e-7);
        }
        assert_eq!(shared.position(), 4);
    }

    #[test]
    fn test_render_shared_is_silent_while_engine_is_held() {
        let asset = ramp_asset(16, 1);
        let engine = engine_for(&asset, ChannelLayout::MONO, None).into_shared();

        let guard = engine.lock().unwrap();
        let mut out = vec![1.0; 4];
        render_shared(&engine, &mut out, 4);
        assert!(out.iter().all(|&s| s == 0.0));
        drop(guard);

        render_shared(&engine, &mut out, 4);
        assert_eq!(&out[..], asset.frames(0, 4));
    }
}
