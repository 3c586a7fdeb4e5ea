// src/library.rs

//! The list of playable tracks and the selection cursor over it.

use crate::error::AssetError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["wav", "mp3", "flac", "ogg"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

#[derive(Debug, Clone)]
pub struct TrackLibrary {
    tracks: Vec<PathBuf>,
    selected: usize,
}

impl TrackLibrary {
    /// A single file, or every supported file directly inside a directory,
    /// sorted by path.
    pub fn scan(path: &Path) -> Result<Self, AssetError> {
        if path.is_file() {
            return Self::from_tracks(vec![path.to_path_buf()], path);
        }
        if !path.is_dir() {
            return Err(AssetError::NotFound(path.to_path_buf()));
        }

        let mut tracks: Vec<PathBuf> = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        tracks.sort();
        log::info!("Found {} track(s) in {}", tracks.len(), path.display());
        Self::from_tracks(tracks, path)
    }

    fn from_tracks(tracks: Vec<PathBuf>, origin: &Path) -> Result<Self, AssetError> {
        let library = Self {
            tracks,
            selected: 0,
        };
        if library.is_empty() {
            return Err(AssetError::NoTracks(origin.to_path_buf()));
        }
        Ok(library)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.tracks.get(index).map(PathBuf::as_path)
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Moves the selection by `delta`, clamped to the list. Returns whether it moved.
    pub fn step(&mut self, delta: i32) -> bool {
        let last = self.tracks.len().saturating_sub(1) as i64;
        let next = (self.selected as i64 + delta as i64).clamp(0, last) as usize;
        let moved = next != self.selected;
        self.selected = next;
        moved
    }

    pub fn display_name(&self, index: usize) -> String {
        self.get(index)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported(Path::new("a.wav")));
        assert!(is_supported(Path::new("b.FLAC")));
        assert!(is_supported(Path::new("c.Mp3")));
        assert!(!is_supported(Path::new("d.txt")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn test_scan_directory_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.wav", "notes.txt", "c.ogg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("d.wav"), b"x").unwrap();

        let lib = TrackLibrary::scan(dir.path()).unwrap();
        let names: Vec<String> = (0..lib.len()).map(|i| lib.display_name(i)).collect();
        assert_eq!(names, vec!["a.wav", "b.mp3", "c.ogg"]);
    }

    #[test]
    fn test_scan_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TrackLibrary::scan(dir.path()),
            Err(AssetError::NoTracks(_))
        ));
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.flac");
        std::fs::write(&file, b"x").unwrap();
        let lib = TrackLibrary::scan(&file).unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get(0), Some(file.as_path()));
    }

    #[test]
    fn test_step_clamps() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.wav", "b.wav", "c.wav"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let mut lib = TrackLibrary::scan(dir.path()).unwrap();
        assert!(!lib.step(-1));
        assert!(lib.step(1));
        assert!(lib.step(5));
        assert_eq!(lib.selected(), 2);
        assert!(!lib.step(1));
    }
}
