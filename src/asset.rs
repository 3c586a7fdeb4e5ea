// src/asset.rs

//! Decoded, immutable audio assets and the decoders that produce them.
//!
//! An [`AudioAsset`] is never mutated once built. Track switches replace the
//! whole asset behind an `Arc` while no render call is in flight.

use crate::error::AssetError;
use rodio::source::Source;
use rodio::Decoder;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Interleaved channel layout of a block or asset. Always at least one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    channels: u16,
}

impl ChannelLayout {
    pub const MONO: ChannelLayout = ChannelLayout { channels: 1 };
    pub const STEREO: ChannelLayout = ChannelLayout { channels: 2 };

    pub fn new(channels: u16) -> Result<Self, AssetError> {
        if channels == 0 {
            return Err(AssetError::InvalidLayout(
                "channel count must be at least 1".to_string(),
            ));
        }
        Ok(Self { channels })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.channels as usize
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

#[derive(Debug)]
pub struct AudioAsset {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    layout: ChannelLayout,
}

impl AudioAsset {
    /// Builds an asset from interleaved samples.
    ///
    /// Fails when the sample rate is zero, there are no channels, the buffer is
    /// empty, or the sample count is not a whole number of frames.
    pub fn new(
        name: impl Into<String>,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AssetError> {
        let layout = ChannelLayout::new(channels)?;
        if sample_rate == 0 {
            return Err(AssetError::InvalidLayout(
                "sample rate must be positive".to_string(),
            ));
        }
        if samples.is_empty() {
            return Err(AssetError::InvalidLayout("asset has no frames".to_string()));
        }
        if samples.len() % layout.count() != 0 {
            return Err(AssetError::InvalidLayout(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            name: name.into(),
            samples,
            sample_rate,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.layout.count()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Interleaved samples for frames `[start, start + frames)`. The caller keeps
    /// the range inside the asset.
    #[inline]
    pub fn frames(&self, start: usize, frames: usize) -> &[f32] {
        let ch = self.layout.count();
        &self.samples[start * ch..(start + frames) * ch]
    }

    /// Smallest and largest sample value.
    pub fn peak_range(&self) -> (f32, f32) {
        self.samples
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)))
    }

    /// A mono window of `frames` frames centred on `center`, wrapping around the
    /// track ends. Multi-channel frames are averaged. Used for waveform overlays.
    pub fn window_around(&self, center: usize, frames: usize) -> Vec<f32> {
        let total = self.frame_count();
        let ch = self.layout.count();
        let start = center as i64 - (frames / 2) as i64;
        (0..frames)
            .map(|i| {
                let idx = (start + i as i64).rem_euclid(total as i64) as usize;
                let frame = &self.samples[idx * ch..(idx + 1) * ch];
                frame.iter().sum::<f32>() / ch as f32
            })
            .collect()
    }
}

/// Anything that can turn a path into a decoded asset.
pub trait AudioDecoder {
    fn load(&self, path: &Path) -> Result<AudioAsset, AssetError>;
}

/// Decodes WAV files with hound and everything else through rodio's symphonia
/// decoders. Optionally resamples to a fixed output rate.
#[derive(Debug, Clone, Default)]
pub struct FileDecoder {
    pub target_sample_rate: Option<u32>,
}

impl FileDecoder {
    pub fn new(target_sample_rate: Option<u32>) -> Self {
        Self { target_sample_rate }
    }
}

impl AudioDecoder for FileDecoder {
    fn load(&self, path: &Path) -> Result<AudioAsset, AssetError> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()));
        }

        let is_wav = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"));
        let (samples, sample_rate, channels) = if is_wav {
            decode_wav(path)?
        } else {
            decode_compressed(path)?
        };

        if samples.is_empty() {
            return Err(AssetError::Empty(path.to_path_buf()));
        }

        let (samples, sample_rate) = match self.target_sample_rate {
            Some(target) if target != sample_rate => {
                log::info!(
                    "Resampling {} from {} Hz to {} Hz",
                    path.display(),
                    sample_rate,
                    target
                );
                (
                    resample_interleaved(&samples, channels as usize, sample_rate, target)?,
                    target,
                )
            }
            _ => (samples, sample_rate),
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let asset = AudioAsset::new(name, samples, sample_rate, channels)?;

        let (lo, hi) = asset.peak_range();
        log::info!(
            "Loaded '{}': {} Hz, {} channel(s), {:.2} s, range ({:.4}, {:.4})",
            asset.name(),
            asset.sample_rate(),
            asset.layout().count(),
            asset.duration_seconds(),
            lo,
            hi
        );
        Ok(asset)
    }
}

fn decode_error(path: &Path, reason: impl ToString) -> AssetError {
    AssetError::Decode {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32, u16), AssetError> {
    let file = File::open(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = hound::WavReader::new(BufReader::new(file)).map_err(|e| decode_error(path, e))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error(path, e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| decode_error(path, e))?
        }
    };
    Ok((samples, spec.sample_rate, spec.channels))
}

fn decode_compressed(path: &Path) -> Result<(Vec<f32>, u32, u16), AssetError> {
    let file = File::open(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let source = Decoder::new(BufReader::new(file)).map_err(|e| decode_error(path, e))?;

    let sample_rate = source.sample_rate();
    let channels = source.channels();
    // Rodio decoders yield i16.
    let samples: Vec<f32> = source.map(|s| s as f32 / i16::MAX as f32).collect();
    Ok((samples, sample_rate, channels))
}

fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    from: u32,
    to: u32,
) -> Result<Vec<f32>, AssetError> {
    let resample_error = |reason: String| AssetError::Resample { from, to, reason };
    let channels = channels.max(1);
    let frames = samples.len() / channels;

    let waves_in: Vec<Vec<f32>> = (0..channels)
        .map(|c| samples.iter().skip(c).step_by(channels).copied().collect())
        .collect();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(to as f64 / from as f64, 2.0, params, frames, channels)
            .map_err(|e| resample_error(e.to_string()))?;
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| resample_error(e.to_string()))?;

    let out_frames = waves_out.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        for wave in &waves_out {
            interleaved.push(wave[i]);
        }
    }
    Ok(interleaved)
}
