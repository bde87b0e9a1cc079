//! Playlist construction from a dispatched source
//!
//! Paths are storage paths (`/music/a.mp3`) resolved beneath the storage
//! root. URLs pass through untouched.

use super::engine::is_stream_url;
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tagdeck_common::PlayMode;
use tracing::debug;

/// File extensions treated as audio
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "flac", "ogg", "oga", "opus"];

/// Order of tracks within a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Plain case-insensitive comparison
    Alphabetical,
    /// Digit runs compared by value ("2" before "10")
    Natural,
    /// Directory order as reported by the filesystem
    Unsorted,
}

impl SortMode {
    pub const DEFAULT: SortMode = SortMode::Natural;

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SortMode::Alphabetical),
            1 => Some(SortMode::Natural),
            2 => Some(SortMode::Unsorted),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SortMode::Alphabetical => 0,
            SortMode::Natural => 1,
            SortMode::Unsorted => 2,
        }
    }
}

/// Compare names, treating runs of digits as numbers
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut left = String::new();
                while let Some(c) = a.peek().copied().filter(char::is_ascii_digit) {
                    left.push(c);
                    a.next();
                }
                let mut right = String::new();
                while let Some(c) = b.peek().copied().filter(char::is_ascii_digit) {
                    right.push(c);
                    b.next();
                }
                let left = left.trim_start_matches('0');
                let right = right.trim_start_matches('0');
                let ord = left.len().cmp(&right.len()).then_with(|| left.cmp(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                a.next();
                b.next();
            }
        }
    }
}

pub fn is_audio_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Builds playlists relative to one storage root
#[derive(Debug, Clone)]
pub struct PlaylistBuilder {
    storage_root: PathBuf,
    sort_mode: SortMode,
}

impl PlaylistBuilder {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            sort_mode: SortMode::DEFAULT,
        }
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    fn resolve(&self, source: &str) -> PathBuf {
        self.storage_root.join(source.trim_start_matches('/'))
    }

    /// Storage path of `name` inside storage folder `folder`
    fn child_path(folder: &str, name: &str) -> String {
        format!("{}/{}", folder.trim_end_matches('/'), name)
    }

    /// Audio files directly inside `folder`, ordered by the sort mode
    fn folder_tracks(&self, folder: &str) -> Result<Vec<String>> {
        let dir = self.resolve(folder);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !is_audio_file(&name) {
                continue;
            }
            names.push(name);
        }
        match self.sort_mode {
            SortMode::Alphabetical => names.sort_by_key(|n| n.to_lowercase()),
            SortMode::Natural => names.sort_by(|a, b| natural_cmp(a, b)),
            SortMode::Unsorted => {}
        }
        Ok(names.into_iter().map(|n| Self::child_path(folder, &n)).collect())
    }

    fn subfolders(&self, folder: &str) -> Result<Vec<String>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(self.resolve(folder))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                dirs.push(Self::child_path(folder, &name));
            }
        }
        Ok(dirs)
    }

    fn m3u_tracks(&self, source: &str) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(self.resolve(source))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect())
    }

    /// Tracks to play for `source` in `mode`
    pub fn build(&self, source: &str, mode: PlayMode) -> Result<Vec<String>> {
        let tracks = match mode {
            PlayMode::NoPlaylist => {
                return Err(Error::Validation("no playlist for play mode 0".into()))
            }
            PlayMode::Webstream => {
                if !is_stream_url(source) {
                    return Err(Error::Validation(format!("'{}' is not a stream URL", source)));
                }
                vec![source.to_string()]
            }
            PlayMode::SingleTrack | PlayMode::SingleTrackLoop => {
                if !self.resolve(source).is_file() {
                    return Err(Error::NotFound(source.to_string()));
                }
                vec![source.to_string()]
            }
            PlayMode::LocalM3u => self.m3u_tracks(source)?,
            PlayMode::Audiobook
            | PlayMode::AudiobookLoop
            | PlayMode::AllTracksSorted
            | PlayMode::AllTracksSortedLoop => self.folder_tracks(source)?,
            PlayMode::AllTracksRandom | PlayMode::AllTracksRandomLoop => {
                let mut tracks = self.folder_tracks(source)?;
                tracks.shuffle(&mut rand::thread_rng());
                tracks
            }
            PlayMode::SingleTrackOfDirRandom => self
                .folder_tracks(source)?
                .choose(&mut rand::thread_rng())
                .cloned()
                .into_iter()
                .collect(),
            PlayMode::RandomSubdirectory => {
                let folders = self.subfolders(source)?;
                let chosen = folders
                    .choose(&mut rand::thread_rng())
                    .ok_or_else(|| Error::NotFound(format!("no subdirectory in {}", source)))?;
                debug!("Random subdirectory {}", chosen);
                self.folder_tracks(chosen)?
            }
        };

        if tracks.is_empty() {
            return Err(Error::NotFound(format!("no playable files in {}", source)));
        }
        debug!("Playlist for {} (mode {}): {} tracks", source, mode, tracks.len());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library() -> (TempDir, PlaylistBuilder) {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("book");
        std::fs::create_dir_all(book.join("extra")).unwrap();
        for name in ["10.mp3", "2.mp3", "1.mp3", "cover.jpg", ".hidden.mp3"] {
            std::fs::write(book.join(name), b"x").unwrap();
        }
        std::fs::write(
            dir.path().join("list.m3u"),
            "#EXTM3U\n/book/1.mp3\n\nhttp://radio.example/live\n",
        )
        .unwrap();
        let builder = PlaylistBuilder::new(dir.path());
        (dir, builder)
    }

    #[test]
    fn test_natural_ordering() {
        assert_eq!(natural_cmp("2.mp3", "10.mp3"), Ordering::Less);
        assert_eq!(natural_cmp("Track 02", "track 2"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "ab"), Ordering::Less);
    }

    #[test]
    fn test_folder_sorted() {
        let (_dir, builder) = library();
        let tracks = builder.build("/book", PlayMode::Audiobook).unwrap();
        assert_eq!(tracks, vec!["/book/1.mp3", "/book/2.mp3", "/book/10.mp3"]);
    }

    #[test]
    fn test_alphabetical_sort_mode() {
        let (_dir, mut builder) = library();
        builder.set_sort_mode(SortMode::Alphabetical);
        let tracks = builder.build("/book/", PlayMode::AllTracksSorted).unwrap();
        assert_eq!(tracks, vec!["/book/1.mp3", "/book/10.mp3", "/book/2.mp3"]);
    }

    #[test]
    fn test_random_modes_keep_members() {
        let (_dir, builder) = library();
        let mut tracks = builder.build("/book", PlayMode::AllTracksRandom).unwrap();
        tracks.sort();
        assert_eq!(tracks.len(), 3);

        let one = builder.build("/book", PlayMode::SingleTrackOfDirRandom).unwrap();
        assert_eq!(one.len(), 1);
        assert!(is_audio_file(&one[0]));
    }

    #[test]
    fn test_m3u_and_stream() {
        let (_dir, builder) = library();
        let tracks = builder.build("/list.m3u", PlayMode::LocalM3u).unwrap();
        assert_eq!(tracks, vec!["/book/1.mp3", "http://radio.example/live"]);

        assert!(builder.build("/book", PlayMode::Webstream).is_err());
        assert_eq!(
            builder.build("https://radio.example/x", PlayMode::Webstream).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_missing_sources() {
        let (_dir, builder) = library();
        assert!(builder.build("/nope.mp3", PlayMode::SingleTrack).is_err());
        assert!(builder.build("/book/extra", PlayMode::AllTracksSorted).is_err());
        assert!(builder.build("/book", PlayMode::NoPlaylist).is_err());
    }
}
