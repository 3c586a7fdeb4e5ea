// src/tracker.rs

//! Sources of hand observations.
//!
//! Landmark detection runs outside this process. Its output is consumed as
//! JSON lines: one line per camera frame, each a list of hands. A blank line
//! is a frame with no hands and a line reading `quit` ends the session.

use crate::error::TrackerError;
use crate::gesture::HandObservation;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerFrame {
    Hands(Vec<HandObservation>),
    Quit,
}

pub trait HandTracker {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<TrackerFrame>, TrackerError>;
}

/// Where landmark frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerSource {
    Camera(u32),
    Recording(PathBuf),
    Stdin,
}

impl TrackerSource {
    pub fn open(&self) -> Result<Box<dyn HandTracker>, TrackerError> {
        match self {
            TrackerSource::Recording(path) => Ok(Box::new(ReplayTracker::open(path)?)),
            TrackerSource::Stdin => Ok(Box::new(ReplayTracker::new(BufReader::new(
                std::io::stdin(),
            )))),
            TrackerSource::Camera(index) => Err(TrackerError::Open(
                format!("camera {}", index),
                std::io::Error::new(
                    ErrorKind::Unsupported,
                    "no built-in landmark detector; pipe tracker output to stdin or pass --landmarks",
                ),
            )),
        }
    }
}

pub struct ReplayTracker<R> {
    reader: R,
    line: String,
    line_no: usize,
}

impl ReplayTracker<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        let file = File::open(path).map_err(|e| TrackerError::Open(path.display().to_string(), e))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayTracker<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> HandTracker for ReplayTracker<R> {
    fn next_frame(&mut self) -> Result<Option<TrackerFrame>, TrackerError> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;

        let text = self.line.trim();
        if text.is_empty() {
            return Ok(Some(TrackerFrame::Hands(Vec::new())));
        }
        if text == "quit" || text == "\"quit\"" {
            return Ok(Some(TrackerFrame::Quit));
        }
        let mut hands: Vec<HandObservation> =
            serde_json::from_str(text).map_err(|e| TrackerError::Parse {
                line: self.line_no,
                reason: e.to_string(),
            })?;
        for (i, hand) in hands.iter_mut().enumerate() {
            hand.hand_index = i;
        }
        Ok(Some(TrackerFrame::Hands(hands)))
    }
}
