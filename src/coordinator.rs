// src/coordinator.rs

//! Owns the output stream and sequences track switches.
//!
//! A switch decodes the new file first, while the old stream keeps playing.
//! Only once decoding has succeeded is the stream stopped and closed, the
//! asset and cursor swapped on the idle engine, and a new stream opened.

use crate::asset::{AudioAsset, AudioDecoder, ChannelLayout};
use crate::audio_engine::{EngineShared, PlaybackEngine, SharedEngine, DEFAULT_BLOCK_SIZE};
use crate::audio_io::{OutputBackend, OutputStream, StreamSpec};
use crate::debounce::Debounce;
use crate::error::SwitchError;
use crate::fx::{EffectsChain, EffectsControl};
use crate::library::TrackLibrary;
use log::{info, warn};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Loading,
    Playing,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched(usize),
    /// The requested track is the one already playing.
    AlreadyPlaying,
    /// Ignored because the previous switch was too recent.
    Debounced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub block_size: Option<u32>,
    /// Fixed output channel count; `None` follows each asset.
    pub output_channels: Option<u16>,
    pub switch_cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            block_size: Some(DEFAULT_BLOCK_SIZE as u32),
            output_channels: None,
            switch_cooldown: Duration::from_secs(1),
        }
    }
}

pub struct TrackSwitchCoordinator<B: OutputBackend, D: AudioDecoder> {
    backend: B,
    decoder: D,
    effects: EffectsControl,
    engine: SharedEngine,
    shared: Arc<EngineShared>,
    /// The asset installed in the engine, readable without locking it.
    asset: Option<Arc<AudioAsset>>,
    stream: Option<Box<dyn OutputStream>>,
    state: PlaybackState,
    current: Option<usize>,
    debounce: Debounce,
    config: CoordinatorConfig,
}

impl<B: OutputBackend, D: AudioDecoder> TrackSwitchCoordinator<B, D> {
    pub fn new(
        backend: B,
        decoder: D,
        effects: EffectsControl,
        shared: Arc<EngineShared>,
        config: CoordinatorConfig,
    ) -> Self {
        let output = config
            .output_channels
            .and_then(|c| ChannelLayout::new(c).ok())
            .unwrap_or(ChannelLayout::STEREO);
        let max_block = config.block_size.map_or(DEFAULT_BLOCK_SIZE, |b| b as usize);
        let engine =
            PlaybackEngine::new(output, shared.clone(), max_block.max(DEFAULT_BLOCK_SIZE)).into_shared();
        Self {
            backend,
            decoder,
            effects,
            engine,
            shared,
            asset: None,
            stream: None,
            state: PlaybackState::Stopped,
            current: None,
            debounce: Debounce::new(config.switch_cooldown),
            config,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Library index of the track currently loaded.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn engine_shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    /// Safe to call while a stream is playing; the engine is not locked.
    pub fn current_asset(&self) -> Option<Arc<AudioAsset>> {
        self.asset.clone()
    }

    #[cfg(test)]
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    #[cfg(test)]
    pub fn cursor(&self) -> crate::audio_engine::PlaybackCursor {
        self.lock_engine().cursor()
    }

    /// Loads and plays the first track. Not debounced.
    pub fn start(&mut self, library: &TrackLibrary, index: usize) -> Result<(), SwitchError> {
        self.switch_to(library, index).map(|_| ())
    }

    /// Switches to `index` unless it is already playing or a switch happened
    /// within the cooldown. On failure the previous track keeps playing.
    pub fn request_switch(
        &mut self,
        library: &TrackLibrary,
        index: usize,
        now: Instant,
    ) -> Result<SwitchOutcome, SwitchError> {
        if !self.debounce.trigger_at(now) {
            return Ok(SwitchOutcome::Debounced);
        }
        if self.current == Some(index) && self.state == PlaybackState::Playing {
            return Ok(SwitchOutcome::AlreadyPlaying);
        }
        self.switch_to(library, index)
    }

    fn switch_to(&mut self, library: &TrackLibrary, index: usize) -> Result<SwitchOutcome, SwitchError> {
        let path = library.get(index).ok_or(SwitchError::OutOfRange {
            index,
            len: library.len(),
        })?;

        let previous = self.state;
        self.state = PlaybackState::Loading;
        let asset = match self.decoder.load(path) {
            Ok(asset) => Arc::new(asset),
            Err(e) => {
                warn!("Could not load {}: {}", path.display(), e);
                self.state = previous;
                return Err(e.into());
            }
        };

        self.state = PlaybackState::Stopping;
        self.release_stream();

        self.state = PlaybackState::Loading;
        let output = match self.install(asset.clone()) {
            Ok(output) => output,
            Err(e) => {
                self.state = PlaybackState::Stopped;
                return Err(e);
            }
        };
        self.current = Some(index);
        self.asset = Some(asset.clone());

        let spec = StreamSpec {
            sample_rate: asset.sample_rate(),
            layout: output,
            block_size: self.config.block_size,
        };
        if let Err(e) = self.open_stream(spec) {
            self.lock_engine().set_active(false);
            self.state = PlaybackState::Stopped;
            return Err(e);
        }

        self.state = PlaybackState::Playing;
        info!(
            "Now playing [{}] {} ({} Hz, {} ch)",
            index,
            asset.name(),
            asset.sample_rate(),
            asset.layout().count()
        );
        Ok(SwitchOutcome::Switched(index))
    }

    /// Swaps the asset into the idle engine, rebuilding the effects chain when
    /// the rate or channel count changed. Returns the output layout to open.
    fn install(&self, asset: Arc<AudioAsset>) -> Result<ChannelLayout, SwitchError> {
        let preferred = match self.config.output_channels {
            Some(c) => ChannelLayout::new(c)?,
            None => asset.layout(),
        };
        let output = self.backend.output_layout(preferred)?;

        let effects = self.effects.clone();
        let mut engine = self.lock_engine();
        let stale = engine.effects().map_or(true, |chain| {
            chain.sample_rate() != asset.sample_rate() || chain.layout() != asset.layout()
        });
        if stale {
            engine.set_effects(EffectsChain::new(asset.sample_rate(), asset.layout(), effects)?);
        }
        engine.set_output_layout(output);
        engine.load(asset);
        Ok(output)
    }

    fn open_stream(&mut self, spec: StreamSpec) -> Result<(), SwitchError> {
        let mut stream = self.backend.open(spec, self.engine.clone())?;
        if let Err(e) = stream.start() {
            stream.close();
            return Err(e.into());
        }
        self.stream = Some(stream);
        Ok(())
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                warn!("{}", e);
            }
            stream.close();
        }
    }

    /// Stops and closes the output stream. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.stream.is_none() && self.state == PlaybackState::Stopped {
            return;
        }
        self.state = PlaybackState::Stopping;
        self.release_stream();
        self.lock_engine().set_active(false);
        self.state = PlaybackState::Stopped;
        info!("Output stream closed");
    }

    /// Only for paths where no stream is rendering.
    fn lock_engine(&self) -> MutexGuard<'_, PlaybackEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: OutputBackend, D: AudioDecoder> Drop for TrackSwitchCoordinator<B, D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_io::fake::{FakeBackend, StreamEvent};
    use crate::error::AssetError;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;

    /// Serves canned assets by file name; anything else fails to decode.
    struct MapDecoder {
        assets: HashMap<String, (u32, u16, usize)>,
    }

    impl AudioDecoder for MapDecoder {
        fn load(&self, path: &Path) -> Result<AudioAsset, AssetError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            match self.assets.get(&name) {
                Some(&(rate, channels, frames)) => {
                    let samples = (0..frames * channels as usize)
                        .map(|i| ((i % 97) as f32 / 97.0) - 0.5)
                        .collect();
                    AudioAsset::new(name, samples, rate, channels)
                }
                None => Err(AssetError::Decode {
                    path: path.to_path_buf(),
                    reason: "corrupt".to_string(),
                }),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        library: TrackLibrary,
        backend: FakeBackend,
        coordinator: TrackSwitchCoordinator<FakeBackend, MapDecoder>,
    }

    /// Library of a.wav (48k stereo), b.wav (48k stereo), c.wav (44.1k mono)
    /// and broken.wav, which the decoder rejects.
    fn fixture(config: CoordinatorConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.wav", "b.wav", "broken.wav", "c.wav"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let library = TrackLibrary::scan(dir.path()).unwrap();
        let assets = HashMap::from([
            ("a.wav".to_string(), (48000, 2, 4096)),
            ("b.wav".to_string(), (48000, 2, 2048)),
            ("c.wav".to_string(), (44100, 1, 1000)),
        ]);
        let backend = FakeBackend::default();
        let coordinator = TrackSwitchCoordinator::new(
            backend.clone(),
            MapDecoder { assets },
            EffectsControl::default(),
            Arc::new(EngineShared::default()),
            config,
        );
        Fixture {
            _dir: dir,
            library,
            backend,
            coordinator,
        }
    }

    fn index_of(library: &TrackLibrary, name: &str) -> usize {
        (0..library.len())
            .find(|&i| library.get(i).is_some_and(|p| p.ends_with(name)))
            .unwrap()
    }

    #[test]
    fn test_start_opens_and_plays() {
        let mut f = fixture(CoordinatorConfig::default());
        assert_eq!(f.coordinator.state(), PlaybackState::Stopped);
        let a = index_of(&f.library, "a.wav");
        f.coordinator.start(&f.library, a).unwrap();

        assert_eq!(f.coordinator.state(), PlaybackState::Playing);
        assert_eq!(f.coordinator.current_index(), Some(a));
        let events = f.backend.events();
        assert!(matches!(events[0], StreamEvent::Open(spec) if spec.sample_rate == 48000 && spec.layout.count() == 2));
        assert_eq!(events[1], StreamEvent::Start);
    }

    #[test]
    fn test_failed_load_keeps_previous_track_and_cursor() {
        let mut f = fixture(CoordinatorConfig::default());
        let a = index_of(&f.library, "a.wav");
        f.coordinator.start(&f.library, a).unwrap();
        f.backend.pull(256, 2);
        f.backend.pull(256, 2);
        let cursor = f.coordinator.cursor();
        assert_eq!(cursor.position, 512);
        let events_before = f.backend.events();

        let broken = index_of(&f.library, "broken.wav");
        let result = f.coordinator.request_switch(&f.library, broken, Instant::now());
        assert!(matches!(result, Err(SwitchError::Asset(AssetError::Decode { .. }))));

        assert_eq!(f.coordinator.state(), PlaybackState::Playing);
        assert_eq!(f.coordinator.current_index(), Some(a));
        assert_eq!(f.coordinator.cursor(), cursor);
        assert_eq!(f.coordinator.current_asset().unwrap().name(), "a.wav");
        // The running stream was never touched.
        assert_eq!(f.backend.events(), events_before);
    }

    #[test]
    fn test_switch_stops_closes_then_reopens() {
        let mut f = fixture(CoordinatorConfig::default());
        f.coordinator.start(&f.library, index_of(&f.library, "a.wav")).unwrap();
        f.backend.pull(300, 2);

        let b = index_of(&f.library, "b.wav");
        let outcome = f.coordinator.request_switch(&f.library, b, Instant::now()).unwrap();
        assert_eq!(outcome, SwitchOutcome::Switched(b));
        assert_eq!(f.coordinator.cursor().position, 0);
        assert_eq!(f.coordinator.current_asset().unwrap().name(), "b.wav");

        let events = f.backend.events();
        assert_eq!(events.len(), 6);
        assert_eq!(events[2], StreamEvent::Stop);
        assert_eq!(events[3], StreamEvent::Close);
        assert!(matches!(events[4], StreamEvent::Open(_)));
        assert_eq!(events[5], StreamEvent::Start);
    }

    #[test]
    fn test_switch_is_debounced() {
        let mut f = fixture(CoordinatorConfig::default());
        let a = index_of(&f.library, "a.wav");
        let b = index_of(&f.library, "b.wav");
        f.coordinator.start(&f.library, a).unwrap();

        let t0 = Instant::now();
        assert_eq!(
            f.coordinator.request_switch(&f.library, b, t0).unwrap(),
            SwitchOutcome::Switched(b)
        );
        assert_eq!(
            f.coordinator
                .request_switch(&f.library, a, t0 + Duration::from_millis(300))
                .unwrap(),
            SwitchOutcome::Debounced
        );
        assert_eq!(
            f.coordinator
                .request_switch(&f.library, a, t0 + Duration::from_secs(1))
                .unwrap(),
            SwitchOutcome::Switched(a)
        );
    }

    #[test]
    fn test_selecting_current_track_does_not_restart() {
        let mut f = fixture(CoordinatorConfig::default());
        let a = index_of(&f.library, "a.wav");
        f.coordinator.start(&f.library, a).unwrap();
        let before = f.backend.events().len();
        assert_eq!(
            f.coordinator.request_switch(&f.library, a, Instant::now()).unwrap(),
            SwitchOutcome::AlreadyPlaying
        );
        assert_eq!(f.backend.events().len(), before);
    }

    #[test]
    fn test_rate_change_rebuilds_effects_chain() {
        let mut f = fixture(CoordinatorConfig::default());
        f.coordinator.start(&f.library, index_of(&f.library, "a.wav")).unwrap();
        let c = index_of(&f.library, "c.wav");
        f.coordinator.request_switch(&f.library, c, Instant::now()).unwrap();

        let engine = f.coordinator.engine().lock().unwrap();
        let chain = engine.effects().unwrap();
        assert_eq!(chain.sample_rate(), 44100);
        assert_eq!(chain.layout(), ChannelLayout::MONO);
        assert_eq!(engine.output_layout(), ChannelLayout::MONO);
    }

    #[test]
    fn test_fixed_output_channels_and_device_fallback() {
        let mut f = fixture(CoordinatorConfig {
            output_channels: Some(2),
            ..CoordinatorConfig::default()
        });
        f.coordinator.start(&f.library, index_of(&f.library, "c.wav")).unwrap();
        // Mono asset rendered as stereo.
        let out = f.backend.pull(8, 2);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }

        let mut g = fixture(CoordinatorConfig::default());
        g.backend.device_channels = Some(1);
        g.coordinator = TrackSwitchCoordinator::new(
            g.backend.clone(),
            MapDecoder {
                assets: HashMap::from([("a.wav".to_string(), (48000, 2, 512))]),
            },
            EffectsControl::default(),
            Arc::new(EngineShared::default()),
            CoordinatorConfig::default(),
        );
        g.coordinator.start(&g.library, index_of(&g.library, "a.wav")).unwrap();
        assert_eq!(g.coordinator.engine().lock().unwrap().output_layout(), ChannelLayout::MONO);
    }

    #[test]
    fn test_status_queries_leave_engine_lock_alone() {
        let mut f = fixture(CoordinatorConfig::default());
        f.coordinator.start(&f.library, index_of(&f.library, "a.wav")).unwrap();

        for _ in 0..100 {
            assert_eq!(f.coordinator.current_asset().unwrap().name(), "a.wav");
            let block = f.backend.pull(64, 2);
            assert!(block.iter().any(|&s| s != 0.0));
        }

        // Stand in for a render holding the engine on the device thread.
        let engine = f.coordinator.engine().clone();
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let holder = thread::spawn(move || {
            let _guard = engine.lock().unwrap();
            held_tx.send(()).unwrap();
            let _ = done_rx.recv_timeout(Duration::from_secs(2));
        });
        held_rx.recv().unwrap();

        let started = Instant::now();
        let asset = f.coordinator.current_asset();
        let shared = f.coordinator.engine_shared();
        let elapsed = started.elapsed();
        let _ = done_tx.send(());
        holder.join().unwrap();

        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(asset.unwrap().name(), "a.wav");
        assert_eq!(shared.position(), 6400 % 4096);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut f = fixture(CoordinatorConfig::default());
        assert!(matches!(
            f.coordinator.start(&f.library, 99),
            Err(SwitchError::OutOfRange { index: 99, len: 4 })
        ));
        assert_eq!(f.coordinator.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_open_failure_leaves_coordinator_stopped() {
        let mut f = fixture(CoordinatorConfig::default());
        f.coordinator.backend.fail_open = true;
        let result = f.coordinator.start(&f.library, index_of(&f.library, "a.wav"));
        assert!(matches!(result, Err(SwitchError::Device(_))));
        assert_eq!(f.coordinator.state(), PlaybackState::Stopped);
        assert!(!f.coordinator.cursor().active);
    }

    #[test]
    fn test_shutdown_closes_stream_once() {
        let mut f = fixture(CoordinatorConfig::default());
        f.coordinator.start(&f.library, index_of(&f.library, "a.wav")).unwrap();
        f.coordinator.shutdown();
        f.coordinator.shutdown();
        assert_eq!(f.coordinator.state(), PlaybackState::Stopped);

        let events = f.backend.events();
        assert_eq!(&events[events.len() - 2..], &[StreamEvent::Stop, StreamEvent::Close]);
        assert_eq!(events.iter().filter(|e| **e == StreamEvent::Close).count(), 1);

        // Nothing renders after teardown.
        assert!(f.backend.pull(16, 2).iter().all(|&s| s == 0.0));
    }
}
