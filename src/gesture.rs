// src/gesture.rs

//! Hand landmark types and the bits of geometry gestures are built from.

use serde::{Deserialize, Serialize};

pub const THUMB_TIP: u8 = 4;
pub const INDEX_TIP: u8 = 8;
pub const PINKY_TIP: u8 = 20;

/// A landmark in pixel coordinates. Deserializes from either
/// `{"id": 4, "x": 120.0, "y": 300.0}` or `[4, 120.0, 300.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: u8,
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn point(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandObservation {
    #[serde(default)]
    pub hand_index: usize,
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub handedness: Handedness,
}

impl HandObservation {
    pub fn landmark(&self, id: u8) -> Option<(f32, f32)> {
        self.landmarks.iter().find(|l| l.id == id).map(Landmark::point)
    }

    /// Distance between two of this hand's landmarks, if both are present.
    pub fn span(&self, a: u8, b: u8) -> Option<f32> {
        Some(distance(self.landmark(a)?, self.landmark(b)?))
    }

    /// Thumb tip to index tip.
    pub fn pinch(&self) -> Option<f32> {
        self.span(THUMB_TIP, INDEX_TIP)
    }

    /// Midpoint between thumb and index tips.
    pub fn pinch_center(&self) -> Option<(f32, f32)> {
        Some(midpoint(self.landmark(THUMB_TIP)?, self.landmark(INDEX_TIP)?))
    }
}

pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

pub fn midpoint(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    ((a.0 + b.0) * 0.5, (a.1 + b.1) * 0.5)
}

/// Maps an input interval linearly onto an output interval, clamping outside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearMapping {
    pub input: (f32, f32),
    pub output: (f32, f32),
}

impl LinearMapping {
    pub const fn new(input: (f32, f32), output: (f32, f32)) -> Self {
        Self { input, output }
    }

    pub fn map(&self, x: f32) -> f32 {
        let (in_min, in_max) = self.input;
        let (out_min, out_max) = self.output;
        if x.is_nan() {
            return out_min;
        }
        // A collapsed input interval acts as a step at its single point.
        if in_max == in_min {
            return if x >= in_min { out_max } else { out_min };
        }
        let t = ((x - in_min) / (in_max - in_min)).clamp(0.0, 1.0);
        out_min + t * (out_max - out_min)
    }
}
