//! Narrow interfaces to the hardware-facing collaborators
//!
//! LEDs, tag reader, power management and the Wi-Fi stack live outside this
//! crate. The core only talks to them through the traits below;
//! [`HostPeripherals`] is the in-process implementation used when running on a
//! regular host and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Background subsystems paused while an upload owns the storage bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Playback,
    Led,
    TagReader,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] = [Subsystem::Playback, Subsystem::Led, Subsystem::TagReader];
}

/// User-visible feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indication {
    Ok,
    Error,
    Rewind,
}

pub trait SubsystemControl: Send + Sync {
    fn pause(&self, subsystem: Subsystem);
    fn resume(&self, subsystem: Subsystem);
}

pub trait Indicator: Send + Sync {
    fn indicate(&self, indication: Indication);
    fn set_night_mode(&self, enabled: bool);
    fn set_brightness(&self, brightness: u8);
    fn brightness(&self) -> u8;
}

pub trait NetworkInfo: Send + Sync {
    /// Signal strength in dBm
    fn rssi(&self) -> i32;
    fn ip_address(&self) -> String;
    fn hostname(&self) -> String;
    fn set_hostname(&self, hostname: &str) -> bool;
    fn saved_ssids(&self) -> Vec<String>;
    fn active_ssid(&self) -> Option<String>;
}

pub trait PowerControl: Send + Sync {
    fn request_sleep(&self);
}

/// Pause every subsystem in order
pub fn pause_all(control: &dyn SubsystemControl) {
    for subsystem in Subsystem::ALL {
        control.pause(subsystem);
    }
}

/// Resume every subsystem in order
pub fn resume_all(control: &dyn SubsystemControl) {
    for subsystem in Subsystem::ALL {
        control.resume(subsystem);
    }
}

/// Handles to every collaborator, cheap to clone
#[derive(Clone)]
pub struct Peripherals {
    pub subsystems: Arc<dyn SubsystemControl>,
    pub indicator: Arc<dyn Indicator>,
    pub network: Arc<dyn NetworkInfo>,
    pub power: Arc<dyn PowerControl>,
}

impl Peripherals {
    /// All four roles served by one shared host implementation
    pub fn host(host: Arc<HostPeripherals>) -> Self {
        Self {
            subsystems: host.clone(),
            indicator: host.clone(),
            network: host.clone(),
            power: host,
        }
    }
}

/// Hostname rules used by the Wi-Fi stack: 1-32 characters, ASCII letters,
/// digits and '-', not starting or ending with '-'
pub fn validate_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 32 {
        return false;
    }
    if hostname.starts_with('-') || hostname.ends_with('-') {
        return false;
    }
    hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Peripherals backed by plain memory
#[derive(Debug)]
pub struct HostPeripherals {
    paused: Mutex<HashMap<Subsystem, u32>>,
    indications: Mutex<Vec<Indication>>,
    night_mode: AtomicBool,
    brightness: AtomicU8,
    hostname: Mutex<String>,
    sleep_requested: AtomicBool,
}

impl HostPeripherals {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            paused: Mutex::new(HashMap::new()),
            indications: Mutex::new(Vec::new()),
            night_mode: AtomicBool::new(false),
            brightness: AtomicU8::new(16),
            hostname: Mutex::new(hostname.into()),
            sleep_requested: AtomicBool::new(false),
        }
    }

    /// Whether `subsystem` is currently paused
    pub fn is_paused(&self, subsystem: Subsystem) -> bool {
        self.paused
            .lock()
            .map(|p| p.get(&subsystem).copied().unwrap_or(0) > 0)
            .unwrap_or(false)
    }

    /// Indications emitted so far
    pub fn indications(&self) -> Vec<Indication> {
        self.indications
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode.load(Ordering::Relaxed)
    }

    pub fn sleep_requested(&self) -> bool {
        self.sleep_requested.load(Ordering::Relaxed)
    }
}

impl Default for HostPeripherals {
    fn default() -> Self {
        Self::new("tagdeck")
    }
}

impl SubsystemControl for HostPeripherals {
    fn pause(&self, subsystem: Subsystem) {
        if let Ok(mut paused) = self.paused.lock() {
            *paused.entry(subsystem).or_insert(0) += 1;
        }
        debug!("{:?} paused", subsystem);
    }

    fn resume(&self, subsystem: Subsystem) {
        if let Ok(mut paused) = self.paused.lock() {
            let count = paused.entry(subsystem).or_insert(0);
            *count = count.saturating_sub(1);
        }
        debug!("{:?} resumed", subsystem);
    }
}

impl Indicator for HostPeripherals {
    fn indicate(&self, indication: Indication) {
        if let Ok(mut indications) = self.indications.lock() {
            indications.push(indication);
        }
    }

    fn set_night_mode(&self, enabled: bool) {
        self.night_mode.store(enabled, Ordering::Relaxed);
    }

    fn set_brightness(&self, brightness: u8) {
        self.brightness.store(brightness, Ordering::Relaxed);
    }

    fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }
}

impl NetworkInfo for HostPeripherals {
    fn rssi(&self) -> i32 {
        -50
    }

    fn ip_address(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn hostname(&self) -> String {
        self.hostname
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn set_hostname(&self, hostname: &str) -> bool {
        match self.hostname.lock() {
            Ok(mut current) => {
                *current = hostname.to_string();
                true
            }
            Err(_) => false,
        }
    }

    fn saved_ssids(&self) -> Vec<String> {
        Vec::new()
    }

    fn active_ssid(&self) -> Option<String> {
        None
    }
}

impl PowerControl for HostPeripherals {
    fn request_sleep(&self) {
        info!("Sleep requested");
        self.sleep_requested.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_validation() {
        assert!(validate_hostname("tagdeck"));
        assert!(validate_hostname("kids-room-2"));
        assert!(!validate_hostname(""));
        assert!(!validate_hostname("-leading"));
        assert!(!validate_hostname("trailing-"));
        assert!(!validate_hostname("under_score"));
        assert!(!validate_hostname(&"a".repeat(33)));
    }

    #[test]
    fn test_pause_resume_nesting() {
        let host = HostPeripherals::default();
        pause_all(&host);
        assert!(host.is_paused(Subsystem::Led));

        resume_all(&host);
        assert!(!host.is_paused(Subsystem::Led));

        // Unbalanced resume never underflows
        host.resume(Subsystem::Playback);
        assert!(!host.is_paused(Subsystem::Playback));
    }
}
