// src/mapper.rs

//! Turns per-frame hand observations into control events.
//!
//! The mapper only produces [`ControlEvent`]s; [`ControlSurface`] writes the
//! parameter ones into the effects and volume handles. Track navigation and
//! selection are left to the control loop, which owns the library and the
//! coordinator.

use crate::debounce::Debounce;
use crate::fx::EffectsControl;
use crate::gesture::{distance, HandObservation, LinearMapping, INDEX_TIP, PINKY_TIP, THUMB_TIP};
use crate::volume::VolumeController;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlMode {
    #[default]
    Playback,
    Selection,
}

impl ControlMode {
    fn toggled(self) -> Self {
        match self {
            ControlMode::Playback => ControlMode::Selection,
            ControlMode::Selection => ControlMode::Playback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// Master volume, 0 to 100.
    Volume(f32),
    WetLevel(f32),
    DelayMix(f32),
    ModeChanged(ControlMode),
    /// Move the library selection by this many entries (positive is down).
    Navigate(i32),
    /// Play the currently highlighted track.
    Select,
}

/// Distance domains and thresholds, all in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub one_hand_volume: LinearMapping,
    pub two_hand_volume: LinearMapping,
    pub reverb_pinch: LinearMapping,
    pub delay_pinch: LinearMapping,
    pub mode_toggle_px: f32,
    pub select_pinch_px: f32,
    pub navigate_px: f32,
    pub mode_toggle_cooldown_ms: u64,
    pub navigate_cooldown_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            one_hand_volume: LinearMapping::new((20.0, 200.0), (0.0, 100.0)),
            two_hand_volume: LinearMapping::new((30.0, 500.0), (0.0, 100.0)),
            reverb_pinch: LinearMapping::new((20.0, 200.0), (0.0, 1.0)),
            delay_pinch: LinearMapping::new((20.0, 200.0), (0.0, 1.0)),
            mode_toggle_px: 35.0,
            select_pinch_px: 25.0,
            navigate_px: 30.0,
            mode_toggle_cooldown_ms: 1000,
            navigate_cooldown_ms: 500,
        }
    }
}

pub struct GestureMapper {
    config: GestureConfig,
    mode: ControlMode,
    mode_debounce: Debounce,
    navigate_debounce: Debounce,
    /// Reference height of the scrolling finger in Selection mode.
    anchor_y: Option<f32>,
}

impl GestureMapper {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            mode_debounce: Debounce::new(Duration::from_millis(config.mode_toggle_cooldown_ms)),
            navigate_debounce: Debounce::new(Duration::from_millis(config.navigate_cooldown_ms)),
            config,
            mode: ControlMode::Playback,
            anchor_y: None,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode != self.mode {
            info!("Control mode: {:?}", mode);
        }
        self.mode = mode;
        self.anchor_y = None;
    }

    /// Interprets one frame of observations. No hands means no events.
    pub fn tick(&mut self, hands: &[HandObservation], now: Instant) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        if hands.is_empty() {
            self.anchor_y = None;
            return events;
        }

        let toggle = hands.iter().any(|h| {
            h.span(THUMB_TIP, PINKY_TIP)
                .is_some_and(|d| d < self.config.mode_toggle_px)
        });
        if toggle && self.mode_debounce.trigger_at(now) {
            self.set_mode(self.mode.toggled());
            events.push(ControlEvent::ModeChanged(self.mode));
            return events;
        }

        match self.mode {
            ControlMode::Playback => self.playback_gestures(hands, &mut events),
            ControlMode::Selection => self.selection_gestures(hands, now, &mut events),
        }
        events
    }

    fn playback_gestures(&self, hands: &[HandObservation], events: &mut Vec<ControlEvent>) {
        match hands {
            [hand] => {
                if let Some(pinch) = hand.pinch() {
                    events.push(ControlEvent::Volume(self.config.one_hand_volume.map(pinch)));
                }
            }
            [first, second, ..] => {
                if let (Some(a), Some(b)) = (first.pinch_center(), second.pinch_center()) {
                    events.push(ControlEvent::Volume(self.config.two_hand_volume.map(distance(a, b))));
                }
                if let Some(pinch) = first.pinch() {
                    events.push(ControlEvent::WetLevel(self.config.reverb_pinch.map(pinch)));
                }
                if let Some(pinch) = second.pinch() {
                    events.push(ControlEvent::DelayMix(self.config.delay_pinch.map(pinch)));
                }
            }
            [] => {}
        }
    }

    fn selection_gestures(
        &mut self,
        hands: &[HandObservation],
        now: Instant,
        events: &mut Vec<ControlEvent>,
    ) {
        if let Some((_, y)) = hands[0].landmark(INDEX_TIP) {
            let anchor = *self.anchor_y.get_or_insert(y);
            let delta = y - anchor;
            let threshold = self.config.navigate_px;

            if delta.abs() > threshold && self.navigate_debounce.trigger_at(now) {
                events.push(ControlEvent::Navigate(if delta > 0.0 { 1 } else { -1 }));
                self.anchor_y = Some(y);
            } else if delta.abs() < threshold * 0.5 {
                // Small drift follows the finger so the next move is measured
                // from where it rests.
                self.anchor_y = Some(y);
            }
        }

        if let Some(pinch) = hands.get(1).and_then(HandObservation::pinch) {
            if pinch < self.config.select_pinch_px {
                events.push(ControlEvent::Select);
            }
        }
    }
}

/// Applies parameter events to the live effect and volume handles.
pub struct ControlSurface {
    effects: EffectsControl,
    volume: VolumeController,
}

impl ControlSurface {
    pub fn new(effects: EffectsControl, volume: VolumeController) -> Self {
        Self { effects, volume }
    }

    pub fn effects(&self) -> &EffectsControl {
        &self.effects
    }

    pub fn volume(&self) -> &VolumeController {
        &self.volume
    }

    /// Returns false for events that are not parameter changes.
    pub fn apply(&mut self, event: &ControlEvent) -> bool {
        match *event {
            ControlEvent::Volume(percentage) => self.volume.set_percentage(percentage),
            ControlEvent::WetLevel(wet) => self.effects.set_wet_level(wet),
            ControlEvent::DelayMix(mix) => self.effects.set_delay_mix(mix),
            _ => return false,
        }
        true
    }
}
