//! Websocket command interpreter
//!
//! Each text frame is one JSON document. Settings sections are written
//! through [`SettingsStore`]; the remaining top-level keys are checked in a
//! fixed order and the first match wins:
//!
//! | key | effect |
//! |---|---|
//! | `rfidMod` | assign a module to a tag (`modId` 0 removes it) |
//! | `rfidAssign` | assign a file or URL to a tag |
//! | `ping` | reply with a pong, at most once per second, never acked |
//! | `controls` | `set_volume` and/or module `action` |
//! | `trackinfo` `coverimg` `volume` `settings` `ssids` | broadcast that state |
//! | `trackProgress` | optional seek to `posPercent`, then broadcast progress |

use super::action::Action;
use crate::peripherals::{Indication, Indicator};
use crate::playback::player::PlayerHandle;
use crate::settings::SettingsStore;
use crate::state::{SharedState, ALL_CLIENTS};
use crate::tags::TagStore;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagdeck_common::StateCategory;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Minimum spacing between two pongs
pub const PONG_INTERVAL: Duration = Duration::from_secs(1);

/// Keys that belong to the settings interpreter
const SETTINGS_KEYS: &[&str] = &[
    "general",
    "equalizer",
    "wifi",
    "led",
    "battery",
    "playlist",
    "ftp",
    "ftpStatus",
    "mqtt",
    "bluetooth",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RfidMod {
    rfid_id_mod: String,
    #[serde(default)]
    mod_id: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RfidAssign {
    rfid_id_music: String,
    #[serde(default)]
    file_or_url: String,
    #[serde(default)]
    play_mode: u8,
}

pub struct RemoteInterpreter {
    settings: SettingsStore,
    tags: TagStore,
    player: PlayerHandle,
    shared: Arc<SharedState>,
    indicator: Arc<dyn Indicator>,
    last_pong: Mutex<Option<Instant>>,
}

impl RemoteInterpreter {
    pub fn new(
        settings: SettingsStore,
        tags: TagStore,
        player: PlayerHandle,
        shared: Arc<SharedState>,
        indicator: Arc<dyn Indicator>,
    ) -> Self {
        Self {
            settings,
            tags,
            player,
            shared,
            indicator,
            last_pong: Mutex::new(None),
        }
    }

    /// Handle one frame; `true` means the sender gets an "ok"
    pub async fn process(&self, text: &str) -> bool {
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc @ Value::Object(_)) => doc,
            Ok(_) => {
                error!("Websocket message is not a JSON object");
                return false;
            }
            Err(e) => {
                error!("Websocket message is not valid JSON: {}", e);
                return false;
            }
        };

        let has_settings = SETTINGS_KEYS.iter().any(|k| doc.get(*k).is_some());
        if has_settings {
            match self.settings.apply(&doc).await {
                Ok(actions) => {
                    for action in actions {
                        self.forward(action);
                    }
                }
                Err(e) => {
                    error!("Error saving settings: {}", e);
                    return false;
                }
            }
            // Bluetooth closes the settings chain ahead of the command keys
            if doc.get("bluetooth").is_some() {
                return true;
            }
        }

        match self.command(&doc).await {
            Some(ack) => ack,
            None if has_settings => true,
            None => {
                error!("Websocket message without a known key: {}", text);
                self.indicator.indicate(Indication::Error);
                false
            }
        }
    }

    fn forward(&self, action: Action) {
        if let Err(e) = self.player.send(action) {
            warn!("Websocket action not delivered: {}", e);
        }
    }

    /// Small unsigned field of a command object, read on its own
    ///
    /// A malformed value is logged and skipped without affecting its siblings.
    fn byte_field(section: &Value, section_name: &str, key: &str) -> Option<u8> {
        let value = section.get(key)?;
        match value.as_u64().and_then(|n| u8::try_from(n).ok()) {
            Some(n) => Some(n),
            None => {
                warn!("{}.{}: ignoring invalid value {}", section_name, key, value);
                None
            }
        }
    }

    /// First matching command key, or `None` when there is none
    async fn command(&self, doc: &Value) -> Option<bool> {
        if let Some(value) = doc.get("rfidMod") {
            return Some(self.rfid_mod(value).await);
        }
        if let Some(value) = doc.get("rfidAssign") {
            return Some(self.rfid_assign(value).await);
        }
        if doc.get("ping").is_some() {
            self.ping();
            return Some(false);
        }
        if let Some(controls) = doc.get("controls") {
            if let Some(volume) = Self::byte_field(controls, "controls", "set_volume") {
                self.forward(Action::SetVolume(volume.into()));
            }
            if let Some(id) = Self::byte_field(controls, "controls", "action") {
                self.forward(Action::Module(id));
            }
            return Some(true);
        }

        // Background polls of the track info are not acknowledged
        if doc.get("trackinfo").is_some() {
            self.shared.notify_clients(ALL_CLIENTS, StateCategory::TrackInfo);
            return Some(false);
        }
        for (key, category) in [
            ("coverimg", StateCategory::CoverImage),
            ("volume", StateCategory::Volume),
            ("settings", StateCategory::Settings),
            ("ssids", StateCategory::Ssids),
        ] {
            if doc.get(key).is_some() {
                self.shared.notify_clients(ALL_CLIENTS, category);
                return Some(true);
            }
        }

        if let Some(progress) = doc.get("trackProgress") {
            if let Some(percent) = Self::byte_field(progress, "trackProgress", "posPercent") {
                if let Err(e) = self.player.execute(Action::SeekPercent(percent)).await {
                    warn!("Seek not applied: {}", e);
                }
            }
            self.shared.notify_clients(ALL_CLIENTS, StateCategory::TrackProgress);
            return Some(true);
        }
        None
    }

    async fn rfid_mod(&self, value: &Value) -> bool {
        let request: RfidMod = match serde_json::from_value(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                error!("rfidMod: {}", e);
                return false;
            }
        };
        let result = if request.mod_id == 0 {
            self.tags.remove(&request.rfid_id_mod).await.map(|_| ())
        } else {
            self.tags
                .assign_module(&request.rfid_id_mod, request.mod_id)
                .await
                .map(|_| ())
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("rfidMod {}: {}", request.rfid_id_mod, e);
                false
            }
        }
    }

    async fn rfid_assign(&self, value: &Value) -> bool {
        let request: RfidAssign = match serde_json::from_value(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                error!("rfidAssign: {}", e);
                return false;
            }
        };
        if request.play_mode == 0 {
            error!("rfidAssign: Invalid playmode");
            return false;
        }
        match self
            .tags
            .assign(&request.rfid_id_music, &request.file_or_url, request.play_mode)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("rfidAssign {}: {}", request.rfid_id_music, e);
                false
            }
        }
    }

    fn ping(&self) {
        let mut last = self.last_pong.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if matches!(*last, Some(at) if now.duration_since(at) <= PONG_INTERVAL) {
            debug!("Ping dropped, last pong too recent");
            return;
        }
        *last = Some(now);
        self.shared.notify_clients(ALL_CLIENTS, StateCategory::Pong);
    }
}
