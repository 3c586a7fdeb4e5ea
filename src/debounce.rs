// src/debounce.rs

use std::time::{Duration, Instant};

/// Lets an action through at most once per `cooldown`.
#[derive(Debug, Clone)]
pub struct Debounce {
    cooldown: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    pub fn is_ready_at(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Returns true and starts a new cooldown if the previous one has elapsed.
    pub fn trigger_at(&mut self, now: Instant) -> bool {
        if self.is_ready_at(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn trigger(&mut self) -> bool {
        self.trigger_at(Instant::now())
    }
}
