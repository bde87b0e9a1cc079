//! Runtime device settings
//!
//! Settings are grouped in sections (`general`, `equalizer`, `led`, ...) and
//! persisted in the `settings` namespace as one key per field
//! (`general.initVolume`), each value stored as a JSON scalar. A section is
//! validated as a whole before anything is written, and every write is read
//! back to verify it landed.

use crate::bridge::action::{Action, PlayerSettings};
use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::peripherals::{validate_hostname, NetworkInfo};
use crate::playback::player::PlayerSnapshot;
use crate::playback::playlist::SortMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tagdeck_common::db::{KvStore, SETTINGS_NAMESPACE};
use tracing::{debug, info, warn};

/// Loudest volume step the amplifier accepts
pub const MAX_VOLUME_LIMIT: u8 = 21;

/// Tone control range in dB
pub const GAIN_RANGE: std::ops::RangeInclusive<i8> = -40..=6;

pub const FTP_USER_MAX_LEN: usize = 10;
pub const FTP_PASSWORD_MAX_LEN: usize = 15;
pub const MQTT_CLIENT_ID_MAX_LEN: usize = 16;
pub const MQTT_SERVER_MAX_LEN: usize = 32;
pub const MQTT_USER_MAX_LEN: usize = 16;
pub const MQTT_PASSWORD_MAX_LEN: usize = 16;

/// Section names understood by GET, in rendering order
pub const SECTIONS: &[&str] = &[
    "current",
    "general",
    "equalizer",
    "wifi",
    "ssids",
    "led",
    "playlist",
    "battery",
    "defaults",
    "ftp",
    "mqtt",
    "bluetooth",
];

/// A persisted group of settings
trait Section: Serialize + DeserializeOwned + Default {
    const NAME: &'static str;

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn invalid(section: &str, reason: impl std::fmt::Display) -> Error {
    Error::Validation(format!("{} settings: {}", section, reason))
}

fn check_len(section: &str, field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(invalid(
            section,
            format!("{} longer than {} characters", field, max),
        ));
    }
    Ok(())
}

/// Accept `true`/`false` as well as 0/1
fn bool_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(u64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    pub init_volume: u8,
    pub max_volume_sp: u8,
    pub max_volume_hp: u8,
    /// Minutes of inactivity before sleeping
    pub sleep_inactivity: u8,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            init_volume: 3,
            max_volume_sp: MAX_VOLUME_LIMIT,
            max_volume_hp: 18,
            sleep_inactivity: 10,
        }
    }
}

impl Section for GeneralSettings {
    const NAME: &'static str = "general";

    fn validate(&self) -> Result<()> {
        if self.max_volume_sp > MAX_VOLUME_LIMIT || self.max_volume_hp > MAX_VOLUME_LIMIT {
            return Err(invalid(
                Self::NAME,
                format!("maximum volume above {}", MAX_VOLUME_LIMIT),
            ));
        }
        if self.init_volume > self.max_volume_sp {
            return Err(invalid(Self::NAME, "initial volume above maximum"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqualizerSettings {
    pub gain_low_pass: i8,
    pub gain_band_pass: i8,
    pub gain_high_pass: i8,
}

impl Section for EqualizerSettings {
    const NAME: &'static str = "equalizer";

    fn validate(&self) -> Result<()> {
        for gain in [self.gain_low_pass, self.gain_band_pass, self.gain_high_pass] {
            if !GAIN_RANGE.contains(&gain) {
                return Err(invalid(Self::NAME, format!("gain {} out of range", gain)));
            }
        }
        Ok(())
    }
}

/// Persisted part of the wifi section; the hostname lives in the network stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WifiFlags {
    scan_on_start: bool,
}

impl Section for WifiFlags {
    const NAME: &'static str = "wifi";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WifiSettings {
    hostname: String,
    scan_on_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedSettings {
    pub init_brightness: u8,
    pub night_brightness: u8,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            init_brightness: 16,
            night_brightness: 2,
        }
    }
}

impl Section for LedSettings {
    const NAME: &'static str = "led";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatterySettings {
    pub warn_low_voltage: f64,
    pub indicator_low: f64,
    pub indicator_hi: f64,
    pub critical_voltage: f64,
    /// Minutes between measurements
    pub voltage_check_interval: u8,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            warn_low_voltage: 3.4,
            indicator_low: 3.0,
            indicator_hi: 4.2,
            critical_voltage: 3.1,
            voltage_check_interval: 10,
        }
    }
}

impl Section for BatterySettings {
    const NAME: &'static str = "battery";

    fn validate(&self) -> Result<()> {
        if self.indicator_low >= self.indicator_hi {
            return Err(invalid(Self::NAME, "low indicator not below high indicator"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSettings {
    pub sort_mode: u8,
}

impl Default for PlaylistSettings {
    fn default() -> Self {
        Self {
            sort_mode: SortMode::DEFAULT.code(),
        }
    }
}

impl Section for PlaylistSettings {
    const NAME: &'static str = "playlist";

    fn validate(&self) -> Result<()> {
        SortMode::from_code(self.sort_mode)
            .map(|_| ())
            .ok_or_else(|| invalid(Self::NAME, format!("unknown sort mode {}", self.sort_mode)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FtpSettings {
    pub username: String,
    pub password: String,
}

impl Section for FtpSettings {
    const NAME: &'static str = "ftp";

    fn validate(&self) -> Result<()> {
        check_len(Self::NAME, "username", &self.username, FTP_USER_MAX_LEN)?;
        check_len(Self::NAME, "password", &self.password, FTP_PASSWORD_MAX_LEN)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(deserialize_with = "bool_or_number")]
    pub enable: bool,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Section for MqttSettings {
    const NAME: &'static str = "mqtt";

    fn validate(&self) -> Result<()> {
        check_len(Self::NAME, "clientID", &self.client_id, MQTT_CLIENT_ID_MAX_LEN)?;
        check_len(Self::NAME, "server", &self.server, MQTT_SERVER_MAX_LEN)?;
        check_len(Self::NAME, "username", &self.username, MQTT_USER_MAX_LEN)?;
        check_len(Self::NAME, "password", &self.password, MQTT_PASSWORD_MAX_LEN)
    }
}

impl From<&BusConfig> for MqttSettings {
    fn from(config: &BusConfig) -> Self {
        Self {
            enable: config.enabled,
            client_id: config.client_id.clone(),
            server: config.server.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothSettings {
    pub device_name: String,
    pub pin_code: String,
}

impl Section for BluetoothSettings {
    const NAME: &'static str = "bluetooth";
}

/// Settings persistence plus the network stack for hostname and SSIDs
#[derive(Clone)]
pub struct SettingsStore {
    kv: KvStore,
    network: Arc<dyn NetworkInfo>,
}

impl SettingsStore {
    pub fn new(db: Pool<Sqlite>, network: Arc<dyn NetworkInfo>) -> Self {
        Self {
            kv: KvStore::new(db, SETTINGS_NAMESPACE),
            network,
        }
    }

    fn key(section: &str, field: &str) -> String {
        format!("{}.{}", section, field)
    }

    /// Stored values over defaults; unreadable entries fall back to the default
    async fn load<T: Section>(&self) -> Result<T> {
        let mut fields = match serde_json::to_value(T::default()) {
            Ok(Value::Object(map)) => map,
            _ => return Err(Error::Internal(format!("{} defaults are not an object", T::NAME))),
        };
        for (field, value) in fields.iter_mut() {
            if let Some(raw) = self.kv.get(&Self::key(T::NAME, field)).await? {
                match serde_json::from_str(&raw) {
                    Ok(stored) => *value = stored,
                    Err(e) => warn!("Ignoring stored {}.{} '{}': {}", T::NAME, field, raw, e),
                }
            }
        }
        match serde_json::from_value(Value::Object(fields)) {
            Ok(section) => Ok(section),
            Err(e) => {
                warn!("Stored {} settings unusable ({}), using defaults", T::NAME, e);
                Ok(T::default())
            }
        }
    }

    /// Validate, then write the whole section in one verified transaction
    async fn save<T: Section>(&self, section: &T) -> Result<()> {
        section.validate()?;
        let fields = match serde_json::to_value(section) {
            Ok(Value::Object(map)) => map,
            _ => return Err(Error::Internal(format!("{} is not an object", T::NAME))),
        };
        let pairs: Vec<(String, String)> = fields
            .iter()
            .map(|(field, value)| (Self::key(T::NAME, field), value.to_string()))
            .collect();
        self.kv
            .put_many_verified(&pairs)
            .await
            .map_err(|e| Error::Validation(format!("error saving {} settings: {}", T::NAME, e)))?;
        debug!("Saved {} settings", T::NAME);
        Ok(())
    }

    /// Parse `value` as section `T` and persist it
    async fn save_json<T: Section>(&self, value: &Value) -> Result<T> {
        let section: T =
            serde_json::from_value(value.clone()).map_err(|e| invalid(T::NAME, e))?;
        self.save(&section).await?;
        Ok(section)
    }

    pub async fn general(&self) -> Result<GeneralSettings> {
        self.load().await
    }

    pub async fn equalizer(&self) -> Result<EqualizerSettings> {
        self.load().await
    }

    pub async fn led(&self) -> Result<LedSettings> {
        self.load().await
    }

    pub async fn playlist(&self) -> Result<PlaylistSettings> {
        self.load().await
    }

    pub async fn mqtt(&self) -> Result<MqttSettings> {
        self.load().await
    }

    /// Write the bootstrap bus settings unless the section already exists
    pub async fn seed_bus(&self, config: &BusConfig) -> Result<()> {
        if self.kv.contains(&Self::key(MqttSettings::NAME, "server")).await? {
            return Ok(());
        }
        info!("Seeding mqtt settings from the configuration file");
        self.save(&MqttSettings::from(config)).await
    }

    /// Bootstrap bus config with stored mqtt settings applied
    pub async fn bus_config(&self, base: &BusConfig) -> Result<BusConfig> {
        let mqtt = self.mqtt().await?;
        Ok(BusConfig {
            enabled: mqtt.enable,
            client_id: mqtt.client_id,
            server: mqtt.server,
            port: mqtt.port,
            username: mqtt.username,
            password: mqtt.password,
            ..base.clone()
        })
    }

    /// Limits and defaults the player works with
    pub async fn player_settings(&self) -> Result<PlayerSettings> {
        let general = self.general().await?;
        let equalizer = self.equalizer().await?;
        let led = self.led().await?;
        let playlist = self.playlist().await?;
        Ok(PlayerSettings {
            init_volume: general.init_volume,
            max_volume: general.max_volume_sp,
            sort_mode: SortMode::from_code(playlist.sort_mode).unwrap_or(SortMode::DEFAULT),
            gains: (
                equalizer.gain_low_pass,
                equalizer.gain_band_pass,
                equalizer.gain_high_pass,
            ),
            night_brightness: led.night_brightness,
        })
    }

    /// Persist every recognised section of `doc`
    ///
    /// Returns the actions the player needs to pick up the change. Sections
    /// are handled in a fixed order; the first failing section stops
    /// processing and earlier sections stay written.
    pub async fn apply(&self, doc: &Value) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        let mut reconfigure = false;

        if let Some(value) = doc.get("general") {
            self.save_json::<GeneralSettings>(value).await?;
            reconfigure = true;
        }
        if let Some(value) = doc.get("equalizer") {
            let eq = self.save_json::<EqualizerSettings>(value).await?;
            actions.push(Action::Equalizer {
                low: eq.gain_low_pass,
                band: eq.gain_band_pass,
                high: eq.gain_high_pass,
            });
        }
        if let Some(value) = doc.get("wifi") {
            let wifi: WifiSettings =
                serde_json::from_value(value.clone()).map_err(|e| invalid("wifi", e))?;
            if !validate_hostname(&wifi.hostname) {
                return Err(invalid("wifi", format!("invalid hostname '{}'", wifi.hostname)));
            }
            if !self.network.set_hostname(&wifi.hostname) {
                return Err(invalid("wifi", "hostname rejected by the network stack"));
            }
            self.save(&WifiFlags {
                scan_on_start: wifi.scan_on_start,
            })
            .await?;
        }
        if let Some(value) = doc.get("led") {
            self.save_json::<LedSettings>(value).await?;
            reconfigure = true;
        }
        if let Some(value) = doc.get("battery") {
            self.save_json::<BatterySettings>(value).await?;
        }
        if let Some(value) = doc.get("playlist") {
            self.save_json::<PlaylistSettings>(value).await?;
            reconfigure = true;
        }
        if let Some(value) = doc.get("ftp") {
            self.save_json::<FtpSettings>(value).await?;
        } else if doc.get("ftpStatus").is_some() {
            info!("FTP server is not part of this device, ftpStatus ignored");
        }
        if let Some(value) = doc.get("mqtt") {
            self.save_json::<MqttSettings>(value).await?;
        }
        if let Some(value) = doc.get("bluetooth") {
            self.save_json::<BluetoothSettings>(value).await?;
        }

        if reconfigure {
            actions.push(Action::Configure(self.player_settings().await?));
        }
        Ok(actions)
    }

    fn ssids_json(&self) -> Value {
        let mut ssids = Map::new();
        ssids.insert("savedSSIDs".into(), json!(self.network.saved_ssids()));
        if let Some(active) = self.network.active_ssid() {
            ssids.insert("active".into(), json!(active));
        }
        Value::Object(ssids)
    }

    fn defaults_json() -> Value {
        let general = GeneralSettings::default();
        let led = LedSettings::default();
        let battery = BatterySettings::default();
        json!({
            "initVolume": general.init_volume,
            "maxVolumeSp": general.max_volume_sp,
            "maxVolumeHp": general.max_volume_hp,
            "sleepInactivity": general.sleep_inactivity,
            "gainHighPass": 0,
            "gainBandPass": 0,
            "gainLowPass": 0,
            "initBrightness": led.init_brightness,
            "nightBrightness": led.night_brightness,
            "sortMode": SortMode::DEFAULT.code(),
            "warnLowVoltage": battery.warn_low_voltage,
            "indicatorLow": battery.indicator_low,
            "indicatorHi": battery.indicator_hi,
            "criticalVoltage": battery.critical_voltage,
            "voltageCheckInterval": battery.voltage_check_interval,
        })
    }

    async fn section_json(&self, name: &str, snapshot: &PlayerSnapshot) -> Result<Value> {
        fn to_json<T: Serialize>(section: T) -> Result<Value> {
            serde_json::to_value(section).map_err(|e| Error::Internal(e.to_string()))
        }

        let value = match name {
            "current" => json!({
                "volume": snapshot.volume,
                "rfidTagId": snapshot.current_tag.clone().unwrap_or_default(),
            }),
            "general" => to_json(self.general().await?)?,
            "equalizer" => to_json(self.equalizer().await?)?,
            "wifi" => {
                let flags: WifiFlags = self.load().await?;
                json!({
                    "hostname": self.network.hostname(),
                    "scanOnStart": flags.scan_on_start,
                })
            }
            "ssids" => self.ssids_json(),
            "led" => to_json(self.led().await?)?,
            "playlist" => to_json(self.playlist().await?)?,
            "battery" => to_json(self.load::<BatterySettings>().await?)?,
            "defaults" => Self::defaults_json(),
            "ftp" => {
                let mut ftp = to_json(self.load::<FtpSettings>().await?)?;
                ftp["maxUserLength"] = json!(FTP_USER_MAX_LEN);
                ftp["maxPwdLength"] = json!(FTP_PASSWORD_MAX_LEN);
                ftp
            }
            "mqtt" => {
                let mut mqtt = to_json(self.mqtt().await?)?;
                mqtt["maxUserLength"] = json!(MQTT_USER_MAX_LEN);
                mqtt["maxPwdLength"] = json!(MQTT_PASSWORD_MAX_LEN);
                mqtt["maxClientIdLength"] = json!(MQTT_CLIENT_ID_MAX_LEN);
                mqtt["maxServerLength"] = json!(MQTT_SERVER_MAX_LEN);
                mqtt
            }
            "bluetooth" => to_json(self.load::<BluetoothSettings>().await?)?,
            other => return Err(Error::BadRequest(format!("unknown settings section '{}'", other))),
        };
        Ok(value)
    }

    /// One section, or every regular section when `section` is `None`
    ///
    /// `ssids` and `defaults` are only rendered on request.
    pub async fn to_json(&self, section: Option<&str>, snapshot: &PlayerSnapshot) -> Result<Value> {
        let mut doc = Map::new();
        match section.filter(|s| !s.is_empty()) {
            Some(name) => {
                doc.insert(name.to_string(), self.section_json(name, snapshot).await?);
            }
            None => {
                for name in SECTIONS
                    .iter()
                    .filter(|n| !matches!(**n, "ssids" | "defaults"))
                {
                    doc.insert(name.to_string(), self.section_json(name, snapshot).await?);
                }
            }
        }
        Ok(Value::Object(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::HostPeripherals;
    use tagdeck_common::db::init_memory_database;

    async fn store() -> (SettingsStore, Arc<HostPeripherals>) {
        let pool = init_memory_database().await.unwrap();
        let host = Arc::new(HostPeripherals::default());
        (SettingsStore::new(pool, host.clone()), host)
    }

    #[tokio::test]
    async fn test_defaults_without_stored_values() {
        let (store, _) = store().await;
        let settings = store.player_settings().await.unwrap();
        assert_eq!(settings, PlayerSettings::default());
    }

    #[tokio::test]
    async fn test_apply_general_reconfigures_player() {
        let (store, _) = store().await;
        let actions = store
            .apply(&json!({
                "general": {"initVolume": 5, "maxVolumeSp": 15, "maxVolumeHp": 10, "sleepInactivity": 20}
            }))
            .await
            .unwrap();

        match actions.as_slice() {
            [Action::Configure(settings)] => {
                assert_eq!(settings.init_volume, 5);
                assert_eq!(settings.max_volume, 15);
            }
            other => panic!("unexpected actions {:?}", other),
        }
        assert_eq!(store.general().await.unwrap().sleep_inactivity, 20);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_section_untouched() {
        let (store, _) = store().await;
        sqlx::query(
            "CREATE TRIGGER reject_sleep BEFORE INSERT ON kv \
             WHEN NEW.key = 'general.sleepInactivity' \
             BEGIN SELECT RAISE(ABORT, 'storage full'); END",
        )
        .execute(store.kv.pool())
        .await
        .unwrap();

        let result = store
            .apply(&json!({
                "general": {"initVolume": 5, "maxVolumeSp": 15, "maxVolumeHp": 10, "sleepInactivity": 20}
            }))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(store.kv.keys().await.unwrap().is_empty());
        assert_eq!(store.general().await.unwrap(), GeneralSettings::default());
    }

    #[tokio::test]
    async fn test_battery_voltages_render_exactly() {
        let (store, _) = store().await;
        let doc = store
            .to_json(Some("battery"), &PlayerSnapshot::default())
            .await
            .unwrap();
        assert_eq!(doc["battery"]["warnLowVoltage"].to_string(), "3.4");
        assert_eq!(doc["battery"]["criticalVoltage"].to_string(), "3.1");
        assert_eq!(doc["battery"]["indicatorHi"].to_string(), "4.2");
    }

    #[tokio::test]
    async fn test_invalid_section_writes_nothing() {
        let (store, _) = store().await;
        let result = store
            .apply(&json!({"equalizer": {"gainLowPass": -50, "gainBandPass": 0, "gainHighPass": 0}}))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(store.equalizer().await.unwrap(), EqualizerSettings::default());

        // Missing fields are a validation failure too
        let result = store.apply(&json!({"led": {"initBrightness": 10}})).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(store.led().await.unwrap(), LedSettings::default());
    }

    #[tokio::test]
    async fn test_wifi_hostname() {
        let (store, host) = store().await;
        store
            .apply(&json!({"wifi": {"hostname": "kids-room", "scanOnStart": true}}))
            .await
            .unwrap();
        assert_eq!(host.hostname(), "kids-room");

        let doc = store.to_json(Some("wifi"), &PlayerSnapshot::default()).await.unwrap();
        assert_eq!(doc["wifi"]["hostname"], "kids-room");
        assert_eq!(doc["wifi"]["scanOnStart"], true);

        assert!(store
            .apply(&json!({"wifi": {"hostname": "bad_name", "scanOnStart": false}}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mqtt_enable_accepts_numbers() {
        let (store, _) = store().await;
        store
            .apply(&json!({"mqtt": {
                "enable": 1, "clientID": "deck", "server": "10.0.0.2",
                "port": 1884, "username": "u", "password": "p"
            }}))
            .await
            .unwrap();
        let bus = store.bus_config(&BusConfig::default()).await.unwrap();
        assert!(bus.enabled);
        assert_eq!(bus.server, "10.0.0.2");
        assert_eq!(bus.port, 1884);
        assert_eq!(bus.topic_prefix, "tagdeck");
    }

    #[tokio::test]
    async fn test_seed_bus_only_once() {
        let (store, _) = store().await;
        let mut config = BusConfig::default();
        config.server = "first".into();
        store.seed_bus(&config).await.unwrap();
        config.server = "second".into();
        store.seed_bus(&config).await.unwrap();
        assert_eq!(store.mqtt().await.unwrap().server, "first");
    }

    #[tokio::test]
    async fn test_to_json_sections() {
        let (store, _) = store().await;
        let snapshot = PlayerSnapshot {
            volume: 7,
            current_tag: Some("1234".into()),
            ..PlayerSnapshot::default()
        };
        let all = store.to_json(None, &snapshot).await.unwrap();
        assert_eq!(all["current"]["volume"], 7);
        assert_eq!(all["current"]["rfidTagId"], "1234");
        assert_eq!(all["general"]["maxVolumeSp"], 21);
        assert_eq!(all["mqtt"]["maxServerLength"], MQTT_SERVER_MAX_LEN);
        assert!(all.get("ssids").is_none());
        assert!(all.get("defaults").is_none());

        let defaults = store.to_json(Some("defaults"), &snapshot).await.unwrap();
        assert_eq!(defaults["defaults"]["nightBrightness"], 2);

        assert!(matches!(
            store.to_json(Some("nope"), &snapshot).await,
            Err(Error::BadRequest(_))
        ));
    }
}
