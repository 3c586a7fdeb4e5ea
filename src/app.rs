// src/app.rs

//! The control loop: tracker frames in, parameter writes and track switches out.

use crate::asset::{AudioDecoder, FileDecoder};
use crate::audio_engine::EngineShared;
use crate::audio_io::{CpalBackend, OutputBackend};
use crate::coordinator::{SwitchOutcome, TrackSwitchCoordinator};
use crate::error::TrackerError;
use crate::fx::EffectsControl;
use crate::library::TrackLibrary;
use crate::mapper::{ControlEvent, ControlMode, ControlSurface, GestureMapper};
use crate::settings::AppSettings;
use crate::tracker::{HandTracker, TrackerFrame, TrackerSource};
use crate::volume::{SoftwareVolume, VolumeController};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const STATUS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Continue,
    Quit,
}

pub struct ControlLoop<B: OutputBackend, D: AudioDecoder> {
    library: TrackLibrary,
    mapper: GestureMapper,
    surface: ControlSurface,
    coordinator: TrackSwitchCoordinator<B, D>,
    tracker: Box<dyn HandTracker>,
    shared: Arc<EngineShared>,
    last_status: Option<Instant>,
}

impl<B: OutputBackend, D: AudioDecoder> ControlLoop<B, D> {
    pub fn new(
        library: TrackLibrary,
        mapper: GestureMapper,
        surface: ControlSurface,
        coordinator: TrackSwitchCoordinator<B, D>,
        tracker: Box<dyn HandTracker>,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            library,
            mapper,
            surface,
            coordinator,
            tracker,
            shared,
            last_status: None,
        }
    }

    pub fn coordinator(&self) -> &TrackSwitchCoordinator<B, D> {
        &self.coordinator
    }

    pub fn mapper(&self) -> &GestureMapper {
        &self.mapper
    }

    pub fn library(&self) -> &TrackLibrary {
        &self.library
    }

    /// Pulls one tracker frame and acts on it.
    pub fn tick(&mut self, now: Instant) -> Result<LoopStatus> {
        let hands = match self.tracker.next_frame() {
            Ok(Some(TrackerFrame::Hands(hands))) => hands,
            Ok(Some(TrackerFrame::Quit)) | Ok(None) => return Ok(LoopStatus::Quit),
            Err(TrackerError::Parse { line, reason }) => {
                warn!("Skipping tracker frame {}: {}", line, reason);
                return Ok(LoopStatus::Continue);
            }
            Err(e) => return Err(e).context("hand tracker failed"),
        };

        for event in self.mapper.tick(&hands, now) {
            if !self.surface.apply(&event) {
                self.handle_navigation(event, now);
            }
        }

        if self.last_status.map_or(true, |t| now.saturating_duration_since(t) >= STATUS_INTERVAL) {
            self.last_status = Some(now);
            self.log_status();
        }
        Ok(LoopStatus::Continue)
    }

    fn handle_navigation(&mut self, event: ControlEvent, now: Instant) {
        match event {
            ControlEvent::ModeChanged(ControlMode::Selection) => {
                info!(
                    "Selection mode: [{}] {}",
                    self.library.selected(),
                    self.library.display_name(self.library.selected())
                );
            }
            ControlEvent::Navigate(delta) => {
                if self.library.step(delta) {
                    let index = self.library.selected();
                    info!("Selected [{}] {}", index, self.library.display_name(index));
                }
            }
            ControlEvent::Select => {
                let index = self.library.selected();
                match self.coordinator.request_switch(&self.library, index, now) {
                    Ok(SwitchOutcome::Switched(_)) | Ok(SwitchOutcome::AlreadyPlaying) => {
                        self.mapper.set_mode(ControlMode::Playback);
                    }
                    Ok(SwitchOutcome::Debounced) => {}
                    Err(e) => warn!("Track switch failed, staying on current track: {}", e),
                }
            }
            _ => {}
        }
    }

    fn log_status(&self) {
        let Some(asset) = self.coordinator.current_asset() else {
            return;
        };
        let position = self.shared.position();
        let window = asset.window_around(position, asset.sample_rate() as usize / 20);
        let level = window.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        let params = self.surface.effects().snapshot();
        debug!(
            "{} {:.1}/{:.1}s level {:.2} | volume {:.0}% reverb {:.2} delay {:.2} | {:?}",
            asset.name(),
            position as f64 / asset.sample_rate() as f64,
            asset.duration_seconds(),
            level,
            self.surface.volume().percentage(),
            params.wet_level,
            params.delay_mix,
            self.mapper.mode()
        );
    }

    /// Closes the output stream first, then releases the tracker.
    pub fn shutdown(mut self) -> TrackSwitchCoordinator<B, D> {
        self.coordinator.shutdown();
        drop(self.tracker);
        info!("Hand tracker released");
        self.coordinator
    }
}

/// Sets `quit` when a line reading `q` arrives on stdin.
fn spawn_quit_listener(quit: Arc<AtomicBool>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    quit.store(true, Ordering::Relaxed);
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
}

pub fn run(settings: AppSettings) -> Result<()> {
    let library = TrackLibrary::scan(&settings.music_path)
        .with_context(|| format!("no music to play at {}", settings.music_path.display()))?;

    let source = settings.tracker_source();
    let tracker = source.open().context("failed to open hand tracker")?;

    let shared = Arc::new(EngineShared::default());
    let effects = EffectsControl::new(settings.effects);
    let volume = VolumeController::new(
        Box::new(SoftwareVolume::new(settings.volume_range_db, shared.clone())),
        settings.max_db_override,
    );
    let mut coordinator = TrackSwitchCoordinator::new(
        CpalBackend::new(settings.output_device.clone()),
        FileDecoder::new(settings.target_sample_rate),
        effects.clone(),
        shared.clone(),
        settings.coordinator_config(),
    );
    coordinator
        .start(&library, library.selected())
        .context("failed to start playback")?;

    let quit = Arc::new(AtomicBool::new(false));
    // Stdin carries landmark frames when no recording or camera is given.
    let paced = source != TrackerSource::Stdin;
    if paced {
        spawn_quit_listener(quit.clone());
        info!("Type q and press Enter to quit");
    }

    let mut control = ControlLoop::new(
        library,
        GestureMapper::new(settings.gestures),
        ControlSurface::new(effects, volume),
        coordinator,
        tracker,
        shared,
    );

    let interval = settings.frame_interval();
    let result = loop {
        if quit.load(Ordering::Relaxed) {
            info!("Quit requested");
            break Ok(());
        }
        let started = Instant::now();
        match control.tick(started) {
            Ok(LoopStatus::Continue) => {}
            Ok(LoopStatus::Quit) => break Ok(()),
            Err(e) => break Err(e),
        }
        if paced {
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    };

    let coordinator = control.shutdown();
    let xruns = coordinator.backend().xrun_count();
    if xruns > 0 {
        warn!("{} output stream error(s) during the session", xruns);
    }
    let dry = coordinator.engine_shared().dry_fallbacks();
    if dry > 0 {
        warn!("Effects failed on {} block(s); those were played dry", dry);
    }
    result
}
