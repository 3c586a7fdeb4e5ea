// src/audio_io.rs

//! Output streams. The coordinator talks to an [`OutputBackend`]; the cpal
//! implementation drives the shared engine from the device callback.

use crate::asset::ChannelLayout;
use crate::audio_device;
use crate::audio_engine::{render_shared, SharedEngine};
use crate::debounce::Debounce;
use crate::error::DeviceError;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, Stream, StreamConfig, SupportedBufferSize,
};
use log::{error, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback scratch when the host reports no buffer range.
const DEFAULT_SCRATCH_FRAMES: u32 = 4096;
const MAX_SCRATCH_FRAMES: u32 = 16384;
const XRUN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// What the engine needs from the device: the asset's rate and the channel
/// count the output will be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub block_size: Option<u32>,
}

pub trait OutputStream {
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    /// Releases the stream. No render call happens after this returns.
    fn close(self: Box<Self>);
}

pub trait OutputBackend {
    /// Channel count the device will actually run with for `preferred`.
    fn output_layout(&self, preferred: ChannelLayout) -> Result<ChannelLayout, DeviceError>;

    /// Opens a stopped stream that renders `engine` on every callback.
    fn open(
        &mut self,
        spec: StreamSpec,
        engine: SharedEngine,
    ) -> Result<Box<dyn OutputStream>, DeviceError>;
}

pub struct CpalBackend {
    device_name: Option<String>,
    xrun_count: Arc<AtomicUsize>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            xrun_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stream errors reported by the driver since startup.
    pub fn xrun_count(&self) -> usize {
        self.xrun_count.load(Ordering::Relaxed)
    }

    fn device(&self) -> Result<Device, DeviceError> {
        audio_device::find_output_device(self.device_name.as_deref())
    }
}

impl OutputBackend for CpalBackend {
    fn output_layout(&self, preferred: ChannelLayout) -> Result<ChannelLayout, DeviceError> {
        let device = self.device()?;
        let supported = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Config(e.to_string()))?
            .any(|c| c.channels() == preferred.channels());
        if supported {
            return Ok(preferred);
        }
        let default = device
            .default_output_config()
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        ChannelLayout::new(default.channels()).map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn open(
        &mut self,
        spec: StreamSpec,
        engine: SharedEngine,
    ) -> Result<Box<dyn OutputStream>, DeviceError> {
        let device = self.device()?;
        let default_config = device
            .default_output_config()
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        let sample_format = default_config.sample_format();
        let max_frames = match (spec.block_size, default_config.buffer_size()) {
            (Some(bs), _) => bs,
            (None, SupportedBufferSize::Range { max, .. }) => (*max).min(MAX_SCRATCH_FRAMES),
            (None, SupportedBufferSize::Unknown) => DEFAULT_SCRATCH_FRAMES,
        };

        let mut config: StreamConfig = default_config.into();
        config.channels = spec.layout.channels();
        config.sample_rate = cpal::SampleRate(spec.sample_rate);
        if let Some(bs) = spec.block_size {
            config.buffer_size = BufferSize::Fixed(bs);
        }

        let xruns = self.xrun_count.clone();
        let max_samples = max_frames.max(1) as usize * spec.layout.count();
        let stream = match sample_format {
            SampleFormat::F32 => build_output_stream::<f32>(&device, &config, engine, xruns, max_samples)?,
            SampleFormat::I16 => build_output_stream::<i16>(&device, &config, engine, xruns, max_samples)?,
            SampleFormat::U16 => build_output_stream::<u16>(&device, &config, engine, xruns, max_samples)?,
            format => return Err(DeviceError::UnsupportedFormat(format.to_string())),
        };

        info!(
            "Opened output stream on {}: {} Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "unknown device".to_string()),
            spec.sample_rate,
            spec.layout.count(),
            config.buffer_size
        );
        Ok(Box::new(CpalStream { stream }))
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    engine: SharedEngine,
    xrun_count: Arc<AtomicUsize>,
    max_samples: usize,
) -> Result<Stream, DeviceError>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut log_gate = Debounce::new(XRUN_LOG_INTERVAL);
    let err_fn = move |err: cpal::StreamError| {
        xrun_count.fetch_add(1, Ordering::Relaxed);
        if log_gate.trigger() {
            error!(
                "an error occurred on output stream: {} ({} so far)",
                err,
                xrun_count.load(Ordering::Relaxed)
            );
        }
    };
    let mut scratch = vec![0.0f32; max_samples.max(channels)];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                render_into(&engine, &mut scratch, data, channels);
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))
}

/// Renders `data` in pieces no larger than `scratch`, which is never resized.
fn render_into<T>(engine: &SharedEngine, scratch: &mut [f32], data: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    let piece = (scratch.len() / channels).max(1) * channels;
    for out in data.chunks_mut(piece) {
        let block = &mut scratch[..out.len()];
        render_shared(engine, block, out.len() / channels);
        for (o, sample) in out.iter_mut().zip(block.iter()) {
            *o = T::from_sample(*sample);
        }
    }
}

struct CpalStream {
    stream: Stream,
}

impl OutputStream for CpalStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.stream
            .play()
            .map_err(|e| DeviceError::StreamPlay(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stream
            .pause()
            .map_err(|e| DeviceError::StreamPause(e.to_string()))
    }

    fn close(self: Box<Self>) {
        // Dropping the cpal stream joins its callback thread.
        drop(self.stream);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AudioAsset;
    use crate::audio_engine::{EngineShared, PlaybackEngine};

    fn ramp_engine(frames: usize) -> (SharedEngine, Arc<AudioAsset>) {
        let samples = (0..frames * 2).map(|i| (i + 1) as f32 / 1000.0).collect();
        let asset = Arc::new(AudioAsset::new("ramp", samples, 48000, 2).unwrap());
        let mut engine = PlaybackEngine::new(ChannelLayout::STEREO, Arc::new(EngineShared::default()), 16);
        engine.load(asset.clone());
        (engine.into_shared(), asset)
    }

    #[test]
    fn test_callback_larger_than_scratch_renders_in_pieces() {
        let (engine, asset) = ramp_engine(100);
        // Three frames of scratch, ten frames requested by the host.
        let mut scratch = vec![0.0f32; 6];
        let mut data = vec![0.0f32; 20];
        render_into(&engine, &mut scratch, &mut data, 2);

        assert_eq!(scratch.len(), 6);
        assert_eq!(&data[..], asset.frames(0, 10));
        assert_eq!(engine.lock().unwrap().cursor().position, 10);
    }

    #[test]
    fn test_render_into_converts_sample_format() {
        let (engine, _) = ramp_engine(100);
        let mut scratch = vec![0.0f32; 8];
        let mut data = vec![0i16; 8];
        render_into(&engine, &mut scratch, &mut data, 2);
        assert_eq!(data[0], i16::from_sample(0.001f32));
        assert!(data.iter().all(|&s| s > 0));
    }
}
