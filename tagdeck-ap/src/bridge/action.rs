//! The internal action surface
//!
//! Every ingress (websocket, message bus, HTTP, tag reader) decodes its wire
//! format into an [`Action`] and hands it to the player. Only the decoders are
//! protocol specific.

use crate::playback::playlist::SortMode;
use tagdeck_common::{PlayMode, TrackCommand};

/// Sleep-timer requests understood by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerRequest {
    /// Sleep when the playlist ends ("EOP")
    AfterPlaylist,
    /// Sleep when the current track ends ("EOT")
    AfterTrack,
    /// Sleep after five more tracks, or at playlist end if sooner ("EO5T")
    AfterFiveTracks,
    /// Cancel whatever sleep timer is active ("0")
    Disable,
    /// Sleep after this many minutes
    Minutes(u8),
}

/// Limits and defaults the player reads from device settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSettings {
    pub init_volume: u8,
    pub max_volume: u8,
    pub sort_mode: SortMode,
    pub gains: (i8, i8, i8),
    pub night_brightness: u8,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            init_volume: 3,
            max_volume: 21,
            sort_mode: SortMode::DEFAULT,
            gains: (0, 0, 0),
            night_brightness: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transport command for the track-control state machine
    Track(TrackCommand),
    /// A tag was scanned (or injected remotely)
    PlayTag(String),
    /// Play a storage path or URL directly
    PlayPath { path: String, mode: PlayMode },
    /// Execute a module command by id
    Module(u8),
    /// Set volume; clamped to the configured maximum
    SetVolume(i32),
    /// Seek to a percentage of the current track
    SeekPercent(u8),
    /// Repeat mode by wire code; invalid codes are rejected
    SetRepeatMode(u8),
    SleepTimer(SleepTimerRequest),
    LockControls(bool),
    SetLedBrightness(u8),
    Equalizer { low: i8, band: i8, high: i8 },
    /// Replace limits and defaults after a settings change
    Configure(PlayerSettings),
    /// Go to sleep now
    Sleep,
}

/// Module commands a tag can be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleCommand {
    ToggleLockControls,
    SleepTimer(u8),
    SleepAfterTrack,
    SleepAfterPlaylist,
    SleepAfterFiveTracks,
    ToggleRepeatPlaylist,
    ToggleRepeatTrack,
    ToggleNightMode,
    Track(TrackCommand),
    VolumeInit,
    VolumeUp,
    VolumeDown,
    Sleep,
    SeekForwards,
    SeekBackwards,
    /// Known id whose subsystem this core does not drive
    Unavailable(u8),
}

/// Seconds jumped by the seek modules
pub const SEEK_STEP_SECS: u32 = 30;

impl ModuleCommand {
    pub fn from_id(id: u8) -> Option<Self> {
        let cmd = match id {
            100 => ModuleCommand::ToggleLockControls,
            101 => ModuleCommand::SleepTimer(15),
            102 => ModuleCommand::SleepTimer(30),
            103 => ModuleCommand::SleepTimer(60),
            104 => ModuleCommand::SleepTimer(120),
            105 => ModuleCommand::SleepAfterTrack,
            106 => ModuleCommand::SleepAfterPlaylist,
            107 => ModuleCommand::SleepAfterFiveTracks,
            110 => ModuleCommand::ToggleRepeatPlaylist,
            111 => ModuleCommand::ToggleRepeatTrack,
            120 => ModuleCommand::ToggleNightMode,
            // Wi-Fi, Bluetooth, FTP, IP announcement, battery, restart
            130 | 140 | 141 | 142 | 150 | 151 | 178 | 183 => ModuleCommand::Unavailable(id),
            170 => ModuleCommand::Track(TrackCommand::PausePlay),
            171 => ModuleCommand::Track(TrackCommand::PreviousTrack),
            172 => ModuleCommand::Track(TrackCommand::NextTrack),
            173 => ModuleCommand::Track(TrackCommand::FirstTrack),
            174 => ModuleCommand::Track(TrackCommand::LastTrack),
            175 => ModuleCommand::VolumeInit,
            176 => ModuleCommand::VolumeUp,
            177 => ModuleCommand::VolumeDown,
            179 => ModuleCommand::Sleep,
            180 => ModuleCommand::SeekForwards,
            181 => ModuleCommand::SeekBackwards,
            182 => ModuleCommand::Track(TrackCommand::Stop),
            _ => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_ids() {
        assert_eq!(ModuleCommand::from_id(100), Some(ModuleCommand::ToggleLockControls));
        assert_eq!(ModuleCommand::from_id(103), Some(ModuleCommand::SleepTimer(60)));
        assert_eq!(
            ModuleCommand::from_id(172),
            Some(ModuleCommand::Track(TrackCommand::NextTrack))
        );
        assert_eq!(ModuleCommand::from_id(130), Some(ModuleCommand::Unavailable(130)));
        assert_eq!(ModuleCommand::from_id(99), None);
        assert_eq!(ModuleCommand::from_id(255), None);
    }
}
