use crate::audio_engine::DEFAULT_BLOCK_SIZE;
use crate::coordinator::CoordinatorConfig;
use crate::fx::EffectParameters;
use crate::mapper::GestureConfig;
use crate::tracker::TrackerSource;
use crate::volume::DEFAULT_RANGE_DB;
use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// A track or a directory of tracks.
    pub music_path: PathBuf,
    pub camera_index: Option<u32>,
    /// Recorded landmark frames to replay. Without this or a camera, frames
    /// are read from stdin.
    pub landmarks_path: Option<PathBuf>,
    pub block_size: u32,
    pub output_device: Option<String>,
    pub output_channels: Option<u16>,
    pub target_sample_rate: Option<u32>,
    /// Control loop ticks per second.
    pub frame_rate: f32,
    pub max_db_override: Option<f32>,
    pub volume_range_db: (f32, f32),
    pub switch_cooldown_ms: u64,
    pub gestures: GestureConfig,
    pub effects: EffectParameters,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            music_path: PathBuf::from("music"),
            camera_index: None,
            landmarks_path: None,
            block_size: DEFAULT_BLOCK_SIZE as u32,
            output_device: None,
            output_channels: None,
            target_sample_rate: None,
            frame_rate: 30.0,
            max_db_override: None,
            volume_range_db: DEFAULT_RANGE_DB,
            switch_cooldown_ms: 1000,
            gestures: GestureConfig::default(),
            effects: EffectParameters::default(),
        }
    }
}

impl AppSettings {
    pub fn tracker_source(&self) -> TrackerSource {
        match (&self.landmarks_path, self.camera_index) {
            (Some(path), _) => TrackerSource::Recording(path.clone()),
            (None, Some(index)) => TrackerSource::Camera(index),
            (None, None) => TrackerSource::Stdin,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            block_size: Some(self.block_size),
            output_channels: self.output_channels,
            switch_cooldown: Duration::from_millis(self.switch_cooldown_ms),
        }
    }

    /// Time between control loop ticks.
    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            Duration::from_secs_f32(1.0 / self.frame_rate)
        } else {
            Duration::from_millis(33)
        }
    }

    /// Command line values take precedence over the file.
    pub fn apply_cli(&mut self, cli: &CliOptions) {
        if let Some(path) = &cli.music_path {
            self.music_path = path.clone();
        }
        if let Some(index) = cli.camera_index {
            self.camera_index = Some(index);
        }
        if let Some(path) = &cli.landmarks_path {
            self.landmarks_path = Some(path.clone());
        }
        if let Some(size) = cli.block_size {
            self.block_size = size;
        }
        // Effect values from a hand-edited file may be out of range.
        self.effects = self.effects.clamped();
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CliOptions {
    pub music_path: Option<PathBuf>,
    pub camera_index: Option<u32>,
    pub landmarks_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub block_size: Option<u32>,
    pub save_config: bool,
    pub list_devices: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
usage: handfx [PATH] [options]

  PATH                 audio file or directory of .wav/.mp3/.flac/.ogg files
  --landmarks FILE     replay hand landmarks from a JSON-lines recording
  --camera N           camera index for an attached landmark detector
  --config FILE        settings file (default: AppSettings/settings.json)
  --block-size N       output block size in frames
  --save-config        write the effective settings back to the settings file
  --list-devices       print output devices and exit
  -h, --help           show this message";

/// Parses arguments, excluding the program name.
pub fn parse_args<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliOptions::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow!("{} expects a value", flag))
        };
        match arg.as_str() {
            "--camera" => {
                let v = value("--camera")?;
                cli.camera_index = Some(v.parse().with_context(|| format!("invalid camera index '{}'", v))?);
            }
            "--landmarks" => cli.landmarks_path = Some(PathBuf::from(value("--landmarks")?)),
            "--config" => cli.config_path = Some(PathBuf::from(value("--config")?)),
            "--block-size" => {
                let v = value("--block-size")?;
                let size: u32 = v.parse().with_context(|| format!("invalid block size '{}'", v))?;
                if size == 0 {
                    bail!("block size must be positive");
                }
                cli.block_size = Some(size);
            }
            "--save-config" => cli.save_config = true,
            "--list-devices" => cli.list_devices = true,
            "-h" | "--help" => cli.help = true,
            flag if flag.starts_with("--") => bail!("unknown option '{}'\n\n{}", flag, USAGE),
            path => {
                if cli.music_path.is_some() {
                    bail!("more than one PATH given\n\n{}", USAGE);
                }
                cli.music_path = Some(PathBuf::from(path));
            }
        }
    }
    Ok(cli)
}

pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let app_settings_dir = exe_dir.join("AppSettings");
            if !app_settings_dir.exists() {
                if let Err(e) = fs::create_dir_all(&app_settings_dir) {
                    warn!(
                        "Failed to create directory at {}: {}",
                        app_settings_dir.display(),
                        e
                    );
                    return None;
                }
            }
            return Some(app_settings_dir);
        }
    }
    warn!("Could not determine application directory.");
    None
}

/// `override_path`, or `settings.json` in the config directory.
pub fn settings_path(override_path: Option<&Path>) -> Option<PathBuf> {
    match override_path {
        Some(path) => Some(path.to_path_buf()),
        None => get_config_dir().map(|dir| dir.join(SETTINGS_FILE)),
    }
}

pub fn save_settings(settings: &AppSettings, path: &Path) {
    match serde_json::to_string_pretty(settings) {
        Ok(json_string) => match fs::write(path, json_string) {
            Ok(()) => info!("Saved settings to {}", path.display()),
            Err(e) => warn!("Failed to write settings to {}: {}", path.display(), e),
        },
        Err(e) => warn!("Failed to serialize settings: {}", e),
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: Option<&Path>) -> AppSettings {
    let Some(path) = path else {
        return AppSettings::default();
    };
    if !path.exists() {
        return AppSettings::default();
    }
    match fs::read_to_string(path) {
        Ok(json_string) => match serde_json::from_str(&json_string) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("Failed to parse settings file, using defaults. Error: {}", e);
                AppSettings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read settings file, using defaults. Error: {}", e);
            AppSettings::default()
        }
    }
}
