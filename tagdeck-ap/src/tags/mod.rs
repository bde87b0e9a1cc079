//! Tag assignments
//!
//! A scanned tag id maps to either a music source (file, folder, m3u or URL
//! plus play mode and resume position) or a module id that triggers a device
//! action. Records are persisted as `#<file>#<pos>#<mode>#<track>`; a mode of
//! 100 or more marks a module record. The string form never leaves this
//! module: callers only see [`TagRecord`].

pub mod backup;
pub mod store;

pub use backup::RestoreSummary;
pub use store::TagStore;

use crate::error::{Error, Result};
use serde_json::{json, Value};
use tagdeck_common::PlayMode;

/// Separator between the fields of a stored record
pub const INNER_DELIMITER: char = '#';

/// Stored modes at or above this value are module ids
pub const MODULE_THRESHOLD: u32 = 100;

/// Decoded assignment of one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagRecord {
    Music {
        file_or_url: String,
        play_mode: PlayMode,
        last_play_pos: u64,
        track_last_played: usize,
    },
    Module {
        mod_id: u8,
    },
}

/// Parse like `strtoul`: leading digits only, anything else yields 0
fn leading_number(token: &str) -> u64 {
    let end = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let digits = &token[..end];
    if digits.is_empty() {
        return 0;
    }
    // Only overflow can fail here; saturate
    digits.parse().unwrap_or(u64::MAX)
}

impl TagRecord {
    /// A fresh music assignment with no resume position
    pub fn music(file_or_url: impl Into<String>, play_mode: PlayMode) -> Self {
        TagRecord::Music {
            file_or_url: file_or_url.into(),
            play_mode,
            last_play_pos: 0,
            track_last_played: 0,
        }
    }

    pub fn encode(&self) -> String {
        let d = INNER_DELIMITER;
        match self {
            TagRecord::Music {
                file_or_url,
                play_mode,
                last_play_pos,
                track_last_played,
            } => format!(
                "{d}{file_or_url}{d}{last_play_pos}{d}{}{d}{track_last_played}",
                play_mode.code()
            ),
            TagRecord::Module { mod_id } => format!("{d}0{d}0{d}{mod_id}{d}0"),
        }
    }

    /// Decode a stored record
    ///
    /// Empty fields are skipped and missing trailing fields default to
    /// position 0, mode 1 and track 0.
    pub fn decode(raw: &str) -> Result<Self> {
        let mut fields = raw.split(INNER_DELIMITER).filter(|f| !f.is_empty());

        let file = fields
            .next()
            .ok_or_else(|| Error::Validation(format!("empty tag record '{}'", raw)))?;
        let last_play_pos = fields.next().map(leading_number).unwrap_or(0);
        let mode = fields.next().map(leading_number).unwrap_or(1);
        let track_last_played = fields.next().map(leading_number).unwrap_or(0);

        if mode >= MODULE_THRESHOLD as u64 {
            let mod_id = u8::try_from(mode)
                .map_err(|_| Error::Validation(format!("module id {} out of range", mode)))?;
            return Ok(TagRecord::Module { mod_id });
        }

        let play_mode = u8::try_from(mode)
            .ok()
            .and_then(PlayMode::from_code)
            .ok_or_else(|| Error::Validation(format!("unknown play mode {} in '{}'", mode, raw)))?;

        Ok(TagRecord::Music {
            file_or_url: file.to_string(),
            play_mode,
            last_play_pos,
            track_last_played: track_last_played as usize,
        })
    }

    /// JSON document served by the tag endpoints
    pub fn to_json(&self, id: &str) -> Value {
        match self {
            TagRecord::Music {
                file_or_url,
                play_mode,
                last_play_pos,
                track_last_played,
            } => json!({
                "id": id,
                "fileOrUrl": file_or_url,
                "playMode": play_mode.code(),
                "lastPlayPos": last_play_pos,
                "trackLastPlayed": track_last_played,
            }),
            TagRecord::Module { mod_id } => json!({
                "id": id,
                "modId": mod_id,
            }),
        }
    }
}

/// Tag ids are purely numeric
pub fn is_valid_tag_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Where playback stood when it was paused or moved to another track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub tag: String,
    /// Source the tag was assigned to (file, folder, m3u or URL)
    pub source: String,
    /// Track being played
    pub track: String,
    /// Byte offset into `track`
    pub position: u64,
    pub play_mode: PlayMode,
    pub track_index: usize,
    pub playlist_len: usize,
}

impl ResumePoint {
    /// Record persisted for this point
    ///
    /// Single-track playlists remember the track itself; longer playlists
    /// keep the assigned source and rely on the track index.
    pub fn to_record(&self) -> TagRecord {
        let file_or_url = if self.playlist_len > 1 {
            self.source.clone()
        } else {
            self.track.clone()
        };
        TagRecord::Music {
            file_or_url,
            play_mode: self.play_mode,
            last_play_pos: self.position,
            track_last_played: self.track_index,
        }
    }
}
