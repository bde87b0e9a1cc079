//! State documents pushed to real-time clients

use crate::playback::player::PlayerSnapshot;
use serde_json::{json, Value};
use tagdeck_common::StateCategory;
use thiserror::Error;

/// Largest rendering sent to a client, in bytes
pub const RENDER_BUDGET: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Rendered document of {len} bytes exceeds the {budget} byte budget")]
    Overflow { len: usize, budget: usize },

    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Inputs a rendering may draw from
pub struct RenderInput<'a> {
    pub snapshot: &'a PlayerSnapshot,
    pub rssi: i32,
    /// Settings document, only needed for `Settings` and `Ssids`
    pub settings: Option<Value>,
}

/// Build the document for `category`
pub fn render(category: StateCategory, input: &RenderInput<'_>) -> Value {
    let snap = input.snapshot;
    match category {
        StateCategory::Ok => json!({ "status": "ok" }),
        StateCategory::Error => json!({ "status": "error" }),
        StateCategory::Dropout => json!({ "status": "dropout" }),
        StateCategory::CurrentTag => {
            json!({ "rfidId": snap.current_tag.clone().unwrap_or_default() })
        }
        StateCategory::Pong => json!({ "pong": "pong", "rssi": input.rssi }),
        StateCategory::TrackInfo => json!({
            "trackinfo": {
                "pausePlay": snap.paused,
                "currentTrackNumber": snap.current_track + 1,
                "numberOfTracks": snap.track_count,
                "volume": snap.volume,
                "name": snap.title,
                "posPercent": snap.pos_percent,
                "playMode": snap.play_mode,
            }
        }),
        StateCategory::CoverImage => json!({ "coverimg": "coverimg" }),
        StateCategory::Volume => json!({ "volume": snap.volume }),
        StateCategory::Settings | StateCategory::Ssids => {
            json!({ "settings": input.settings.clone().unwrap_or_else(|| json!({})) })
        }
        StateCategory::TrackProgress => json!({
            "trackProgress": {
                "posPercent": snap.pos_percent,
                "time": snap.elapsed_secs,
                "duration": snap.duration_secs,
            }
        }),
    }
}

/// Serialize `doc`, refusing anything over [`RENDER_BUDGET`]
pub fn encode(doc: &Value) -> Result<String, RenderError> {
    let text = serde_json::to_string(doc).map_err(|e| RenderError::Serialize(e.to_string()))?;
    if text.len() > RENDER_BUDGET {
        return Err(RenderError::Overflow {
            len: text.len(),
            budget: RENDER_BUDGET,
        });
    }
    Ok(text)
}
