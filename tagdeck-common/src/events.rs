//! Domain enums shared by every ingress and egress path
//!
//! Wire codes are fixed: they appear in persisted tag records, message-bus
//! payloads and websocket documents, so every enum converts to and from its
//! numeric code explicitly.

use serde::{Deserialize, Serialize};

/// Nature of the active audio source
///
/// Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PlayMode {
    /// Nothing queued
    NoPlaylist,
    /// One local file
    SingleTrack,
    /// One local file, repeated
    SingleTrackLoop,
    /// All files of a folder, sorted, with resume-position persistence
    Audiobook,
    /// Audiobook with playlist repeat
    AudiobookLoop,
    /// All files of a folder, sorted
    AllTracksSorted,
    /// All files of a folder, shuffled
    AllTracksRandom,
    /// All files of a folder, sorted, repeated
    AllTracksSortedLoop,
    /// Network stream
    Webstream,
    /// All files of a folder, shuffled, repeated
    AllTracksRandomLoop,
    /// One random file of a folder
    SingleTrackOfDirRandom,
    /// Local m3u playlist
    LocalM3u,
    /// All files of one randomly chosen subdirectory
    RandomSubdirectory,
}

impl PlayMode {
    pub const fn code(self) -> u8 {
        match self {
            PlayMode::NoPlaylist => 0,
            PlayMode::SingleTrack => 1,
            PlayMode::SingleTrackLoop => 2,
            PlayMode::Audiobook => 3,
            PlayMode::AudiobookLoop => 4,
            PlayMode::AllTracksSorted => 5,
            PlayMode::AllTracksRandom => 6,
            PlayMode::AllTracksSortedLoop => 7,
            PlayMode::Webstream => 8,
            PlayMode::AllTracksRandomLoop => 9,
            PlayMode::SingleTrackOfDirRandom => 10,
            PlayMode::LocalM3u => 11,
            PlayMode::RandomSubdirectory => 12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let mode = match code {
            0 => PlayMode::NoPlaylist,
            1 => PlayMode::SingleTrack,
            2 => PlayMode::SingleTrackLoop,
            3 => PlayMode::Audiobook,
            4 => PlayMode::AudiobookLoop,
            5 => PlayMode::AllTracksSorted,
            6 => PlayMode::AllTracksRandom,
            7 => PlayMode::AllTracksSortedLoop,
            8 => PlayMode::Webstream,
            9 => PlayMode::AllTracksRandomLoop,
            10 => PlayMode::SingleTrackOfDirRandom,
            11 => PlayMode::LocalM3u,
            12 => PlayMode::RandomSubdirectory,
            _ => return None,
        };
        Some(mode)
    }

    /// Resume position is persisted per tag in these modes
    pub fn persists_position(self) -> bool {
        matches!(self, PlayMode::Audiobook | PlayMode::AudiobookLoop)
    }

    /// Modes that start with playlist-repeat enabled
    pub fn repeats_playlist(self) -> bool {
        matches!(
            self,
            PlayMode::AudiobookLoop | PlayMode::AllTracksSortedLoop | PlayMode::AllTracksRandomLoop
        )
    }

    /// Modes that start with track-repeat enabled
    pub fn repeats_track(self) -> bool {
        matches!(self, PlayMode::SingleTrackLoop)
    }

    /// Modes whose source is a folder of tracks
    pub fn is_folder(self) -> bool {
        matches!(
            self,
            PlayMode::Audiobook
                | PlayMode::AudiobookLoop
                | PlayMode::AllTracksSorted
                | PlayMode::AllTracksRandom
                | PlayMode::AllTracksSortedLoop
                | PlayMode::AllTracksRandomLoop
                | PlayMode::SingleTrackOfDirRandom
                | PlayMode::RandomSubdirectory
        )
    }
}

impl From<PlayMode> for u8 {
    fn from(mode: PlayMode) -> Self {
        mode.code()
    }
}

impl TryFrom<u8> for PlayMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        PlayMode::from_code(code).ok_or_else(|| format!("unknown play mode {}", code))
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Transport commands applied by the track-control state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCommand {
    Nop,
    Stop,
    PausePlay,
    PreviousTrack,
    NextTrack,
    FirstTrack,
    LastTrack,
    /// Anything else received on the wire
    Unknown(u8),
}

impl TrackCommand {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TrackCommand::Nop,
            1 => TrackCommand::Stop,
            2 => TrackCommand::PausePlay,
            3 => TrackCommand::PreviousTrack,
            4 => TrackCommand::NextTrack,
            5 => TrackCommand::FirstTrack,
            6 => TrackCommand::LastTrack,
            other => TrackCommand::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TrackCommand::Nop => 0,
            TrackCommand::Stop => 1,
            TrackCommand::PausePlay => 2,
            TrackCommand::PreviousTrack => 3,
            TrackCommand::NextTrack => 4,
            TrackCommand::FirstTrack => 5,
            TrackCommand::LastTrack => 6,
            TrackCommand::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for TrackCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackCommand::Nop => write!(f, "NOP"),
            TrackCommand::Stop => write!(f, "STOP"),
            TrackCommand::PausePlay => write!(f, "PAUSEPLAY"),
            TrackCommand::PreviousTrack => write!(f, "PREVIOUSTRACK"),
            TrackCommand::NextTrack => write!(f, "NEXTTRACK"),
            TrackCommand::FirstTrack => write!(f, "FIRSTTRACK"),
            TrackCommand::LastTrack => write!(f, "LASTTRACK"),
            TrackCommand::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// Repeat mode as published on the message bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    None,
    Track,
    Playlist,
    TrackAndPlaylist,
}

impl RepeatMode {
    pub fn from_flags(repeat_track: bool, repeat_playlist: bool) -> Self {
        match (repeat_track, repeat_playlist) {
            (false, false) => RepeatMode::None,
            (true, false) => RepeatMode::Track,
            (false, true) => RepeatMode::Playlist,
            (true, true) => RepeatMode::TrackAndPlaylist,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RepeatMode::None),
            1 => Some(RepeatMode::Track),
            2 => Some(RepeatMode::Playlist),
            3 => Some(RepeatMode::TrackAndPlaylist),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RepeatMode::None => 0,
            RepeatMode::Track => 1,
            RepeatMode::Playlist => 2,
            RepeatMode::TrackAndPlaylist => 3,
        }
    }

    /// (repeat_track, repeat_playlist)
    pub fn flags(self) -> (bool, bool) {
        match self {
            RepeatMode::None => (false, false),
            RepeatMode::Track => (true, false),
            RepeatMode::Playlist => (false, true),
            RepeatMode::TrackAndPlaylist => (true, true),
        }
    }
}

/// Category of state pushed to real-time clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCategory {
    Ok,
    Error,
    Dropout,
    CurrentTag,
    Pong,
    TrackInfo,
    CoverImage,
    Volume,
    Settings,
    Ssids,
    TrackProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_mode_codes_round_trip() {
        for code in 0..=12u8 {
            let mode = PlayMode::from_code(code).unwrap();
            assert_eq!(mode.code(), code);
        }
        assert!(PlayMode::from_code(13).is_none());
        assert!(PlayMode::from_code(100).is_none());
    }

    #[test]
    fn test_play_mode_serializes_as_number() {
        let json = serde_json::to_string(&PlayMode::Webstream).unwrap();
        assert_eq!(json, "8");

        let mode: PlayMode = serde_json::from_str("11").unwrap();
        assert_eq!(mode, PlayMode::LocalM3u);

        assert!(serde_json::from_str::<PlayMode>("42").is_err());
    }

    #[test]
    fn test_play_mode_flags() {
        assert!(PlayMode::Audiobook.persists_position());
        assert!(!PlayMode::AllTracksSorted.persists_position());
        assert!(PlayMode::AudiobookLoop.repeats_playlist());
        assert!(PlayMode::SingleTrackLoop.repeats_track());
        assert!(!PlayMode::Webstream.is_folder());
    }

    #[test]
    fn test_track_command_unknown_preserves_code() {
        assert_eq!(TrackCommand::from_code(4), TrackCommand::NextTrack);
        assert_eq!(TrackCommand::from_code(200), TrackCommand::Unknown(200));
        assert_eq!(TrackCommand::Unknown(200).code(), 200);
    }

    #[test]
    fn test_repeat_mode_flags() {
        assert_eq!(RepeatMode::from_flags(true, true), RepeatMode::TrackAndPlaylist);
        assert_eq!(RepeatMode::Playlist.flags(), (false, true));
        assert_eq!(RepeatMode::from_code(4), None);
    }
}
