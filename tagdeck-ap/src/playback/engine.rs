//! Audio engine seam
//!
//! Decoding and output are outside the control core. The player drives an
//! [`AudioEngine`] through this narrow interface: open a source, stop it,
//! toggle pause, and query position. [`SimulatedEngine`] stands in for a real
//! decoder: it "plays" local files at a fixed bitrate and streams forever.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes per second assumed for local files (128 kbit/s)
pub const SIMULATED_BYTE_RATE: u64 = 16_000;

pub trait AudioEngine: Send {
    /// Open `source` (storage path or URL) starting at byte `offset`
    ///
    /// Returns false when the source cannot be opened.
    fn open(&mut self, source: &str, offset: u64) -> bool;

    /// Stop decoding the current source
    fn stop(&mut self);

    /// Toggle between paused and running
    fn pause_resume(&mut self);

    /// True while a source is open and not yet exhausted
    fn is_running(&self) -> bool;

    /// Bytes read from the current source
    fn file_position(&self) -> u64;

    /// Bytes read but not yet played
    fn buffered(&self) -> u64;

    /// Seconds played of the current source
    fn elapsed_secs(&self) -> u32;

    /// Total length of the current source in seconds, 0 when unknown
    fn duration_secs(&self) -> u32;

    /// Jump to `secs` into the current source
    fn seek_secs(&mut self, secs: u32) -> bool;

    fn set_volume(&mut self, volume: u8);

    /// Three-band tone control in dB
    fn set_tone(&mut self, low: i8, band: i8, high: i8);

    /// Let `elapsed` of wall time pass
    fn advance(&mut self, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    File { length: u64 },
    Stream,
}

#[derive(Debug)]
struct OpenSource {
    kind: SourceKind,
    position: u64,
}

/// Engine that plays nothing but keeps accurate bookkeeping
#[derive(Debug)]
pub struct SimulatedEngine {
    storage_root: PathBuf,
    current: Option<OpenSource>,
    paused: bool,
    volume: u8,
    tone: (i8, i8, i8),
    /// Bytes decoded ahead of playback
    read_ahead: u64,
}

impl SimulatedEngine {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            current: None,
            paused: false,
            volume: 0,
            tone: (0, 0, 0),
            read_ahead: 0,
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn tone(&self) -> (i8, i8, i8) {
        self.tone
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn resolve(&self, source: &str) -> PathBuf {
        self.storage_root.join(source.trim_start_matches('/'))
    }
}

pub fn is_stream_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

impl AudioEngine for SimulatedEngine {
    fn open(&mut self, source: &str, offset: u64) -> bool {
        self.paused = false;
        if is_stream_url(source) {
            debug!("Connecting to stream {}", source);
            self.current = Some(OpenSource {
                kind: SourceKind::Stream,
                position: 0,
            });
            self.read_ahead = 0;
            return true;
        }

        let path = self.resolve(source);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let length = meta.len();
                self.current = Some(OpenSource {
                    kind: SourceKind::File { length },
                    position: offset.min(length),
                });
                self.read_ahead = 0;
                debug!("Opened {} ({} bytes) at {}", path.display(), length, offset);
                true
            }
            _ => {
                warn!("Cannot open {}", path.display());
                self.current = None;
                false
            }
        }
    }

    fn stop(&mut self) {
        self.current = None;
        self.read_ahead = 0;
    }

    fn pause_resume(&mut self) {
        if self.current.is_some() {
            self.paused = !self.paused;
        }
    }

    fn is_running(&self) -> bool {
        match &self.current {
            Some(OpenSource {
                kind: SourceKind::File { length },
                position,
            }) => position < length,
            Some(_) => true,
            None => false,
        }
    }

    fn file_position(&self) -> u64 {
        self.current.as_ref().map(|s| s.position + self.read_ahead).unwrap_or(0)
    }

    fn buffered(&self) -> u64 {
        self.read_ahead
    }

    fn elapsed_secs(&self) -> u32 {
        self.current
            .as_ref()
            .map(|s| (s.position / SIMULATED_BYTE_RATE) as u32)
            .unwrap_or(0)
    }

    fn duration_secs(&self) -> u32 {
        match &self.current {
            Some(OpenSource {
                kind: SourceKind::File { length },
                ..
            }) => (length / SIMULATED_BYTE_RATE) as u32,
            _ => 0,
        }
    }

    fn seek_secs(&mut self, secs: u32) -> bool {
        match &mut self.current {
            Some(OpenSource {
                kind: SourceKind::File { length },
                position,
            }) => {
                *position = (secs as u64 * SIMULATED_BYTE_RATE).min(*length);
                self.read_ahead = 0;
                true
            }
            _ => false,
        }
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
    }

    fn set_tone(&mut self, low: i8, band: i8, high: i8) {
        self.tone = (low, band, high);
    }

    fn advance(&mut self, elapsed: Duration) {
        if self.paused {
            return;
        }
        let Some(source) = self.current.as_mut() else {
            return;
        };
        let played = (elapsed.as_millis() as u64 * SIMULATED_BYTE_RATE) / 1000;
        source.position = match source.kind {
            SourceKind::File { length } => (source.position + played).min(length),
            SourceKind::Stream => source.position + played,
        };
        // Roughly one second decoded ahead while data remains
        self.read_ahead = match source.kind {
            SourceKind::File { length } => SIMULATED_BYTE_RATE.min(length - source.position),
            SourceKind::Stream => SIMULATED_BYTE_RATE,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_plays_to_end() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![0u8; 32_000]).unwrap();
        let mut engine = SimulatedEngine::new(dir.path());

        assert!(engine.open("/a.mp3", 0));
        assert_eq!(engine.duration_secs(), 2);
        engine.advance(Duration::from_secs(1));
        assert!(engine.is_running());
        assert_eq!(engine.elapsed_secs(), 1);
        assert_eq!(engine.file_position() - engine.buffered(), 16_000);

        engine.advance(Duration::from_secs(5));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_pause_freezes_position() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![0u8; 64_000]).unwrap();
        let mut engine = SimulatedEngine::new(dir.path());
        engine.open("a.mp3", 0);

        engine.pause_resume();
        engine.advance(Duration::from_secs(2));
        assert_eq!(engine.elapsed_secs(), 0);
        engine.pause_resume();
        engine.advance(Duration::from_secs(2));
        assert_eq!(engine.elapsed_secs(), 2);
    }

    #[test]
    fn test_missing_file_and_stream() {
        let dir = TempDir::new().unwrap();
        let mut engine = SimulatedEngine::new(dir.path());
        assert!(!engine.open("/missing.mp3", 0));
        assert!(!engine.is_running());

        assert!(engine.open("http://radio.example/stream", 0));
        engine.advance(Duration::from_secs(3600));
        assert!(engine.is_running());
        assert_eq!(engine.duration_secs(), 0);
        assert!(!engine.seek_secs(10));
    }
}
