// src/volume.rs

//! Master volume. Gestures produce a percentage; the controller maps it onto
//! the sink's decibel range and hands it over.

use crate::audio_engine::EngineShared;
use anyhow::Result;
use log::warn;
use std::sync::Arc;

/// Floor and ceiling of a typical hardware master control.
pub const DEFAULT_RANGE_DB: (f32, f32) = (-65.25, 0.0);

/// Something that accepts a level in decibels.
pub trait VolumeSink {
    /// `(min_db, max_db)` the sink accepts.
    fn range(&self) -> (f32, f32);
    fn set_level(&mut self, db: f32) -> Result<()>;
}

/// Applies the level as a linear gain on the engine output.
pub struct SoftwareVolume {
    range: (f32, f32),
    shared: Arc<EngineShared>,
}

impl SoftwareVolume {
    pub fn new(range: (f32, f32), shared: Arc<EngineShared>) -> Self {
        let (lo, hi) = range;
        let range = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Self { range, shared }
    }
}

impl VolumeSink for SoftwareVolume {
    fn range(&self) -> (f32, f32) {
        self.range
    }

    fn set_level(&mut self, db: f32) -> Result<()> {
        if !db.is_finite() {
            anyhow::bail!("volume level must be finite, got {}", db);
        }
        let db = db.clamp(self.range.0, self.range.1);
        // The floor of the range means mute.
        let gain = if db <= self.range.0 {
            0.0
        } else {
            10f32.powf(db / 20.0)
        };
        self.shared.set_master_gain(gain);
        Ok(())
    }
}

pub struct VolumeController {
    sink: Box<dyn VolumeSink>,
    max_db_override: Option<f32>,
    percentage: f32,
}

impl VolumeController {
    pub fn new(sink: Box<dyn VolumeSink>, max_db_override: Option<f32>) -> Self {
        Self {
            sink,
            max_db_override,
            percentage: 100.0,
        }
    }

    /// Effective `(min_db, max_db)` after applying the override.
    pub fn range_db(&self) -> (f32, f32) {
        let (min_db, max_db) = self.sink.range();
        let max_db = self
            .max_db_override
            .map_or(max_db, |m| m.clamp(min_db, max_db));
        (min_db, max_db)
    }

    /// Percentage (0..100, clamped) to decibels, linear across the range.
    pub fn percentage_to_db(&self, percentage: f32) -> f32 {
        let (min_db, max_db) = self.range_db();
        let p = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        min_db + (max_db - min_db) * p / 100.0
    }

    /// Sets the volume. Sink failures are logged and otherwise ignored.
    pub fn set_percentage(&mut self, percentage: f32) {
        let db = self.percentage_to_db(percentage);
        match self.sink.set_level(db) {
            Ok(()) => self.percentage = (db - self.range_db().0) / self.span() * 100.0,
            Err(e) => warn!("Failed to set volume to {:.1} dB: {}", db, e),
        }
    }

    pub fn percentage(&self) -> f32 {
        self.percentage
    }

    fn span(&self) -> f32 {
        let (min_db, max_db) = self.range_db();
        (max_db - min_db).max(f32::EPSILON)
    }
}
