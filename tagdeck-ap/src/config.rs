//! Configuration management for tagdeck-ap
//!
//! Two tiers:
//! 1. **Bootstrap**: port, storage root, database path, transfer ring sizing and
//!    message-bus connection, resolved CLI > environment > TOML > defaults
//! 2. **Runtime**: device settings kept in the `settings` namespace of the
//!    key-value store (see [`crate::settings`])

use crate::error::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tagdeck_common::config::{load_toml, locate_config_file, resolve_data_dir};

/// Command-line arguments for tagdeck-ap
#[derive(Parser, Debug, Default)]
#[command(name = "tagdeck-ap")]
#[command(about = "Control core for an RFID-triggered audio player")]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "TAGDECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TAGDECK_PORT")]
    pub port: Option<u16>,

    /// Root of the removable media all explorer paths resolve under
    #[arg(short, long, env = "TAGDECK_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Directory holding the database
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, env = "TAGDECK_LOG")]
    pub log_level: Option<String>,
}

/// Bootstrap configuration as read from the TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    pub port: Option<u16>,
    pub storage_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub backup_file: Option<String>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transfer ring sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// First chunk size tried when allocating the ring
    pub start_chunk_size: usize,
    /// Number of slots in the ring (at least 2)
    pub buffer_count: usize,
    /// Allocation attempts, halving the chunk size after each failure
    pub retry_count: usize,
    /// Chunk sizes below this fail the upload outright
    pub min_chunk_size: usize,
    /// Seconds without progress before the writer gives up
    pub stall_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            start_chunk_size: 16384,
            buffer_count: 2,
            retry_count: 2,
            min_chunk_size: 256,
            stall_timeout_secs: 20,
        }
    }
}

impl UploadConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

/// Message-bus connection
///
/// Credentials here seed the `mqtt` settings section on first start; once the
/// section exists the stored values win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub enabled: bool,
    pub client_id: String,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Minimum spacing between connection attempts
    pub retry_interval_secs: u64,
    /// Prepended to every topic name
    pub topic_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: "tagdeck".to_string(),
            server: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            retry_interval_secs: 15,
            topic_prefix: "tagdeck".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "tagdeck_ap=debug,tower_http=info".to_string()
}

fn default_port() -> u16 {
    80
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    /// Backup file, relative to `storage_root`
    pub backup_file: String,
    pub upload: UploadConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configuration from CLI arguments, environment and TOML
    pub fn load(args: &Args) -> Result<Self> {
        let toml_config: TomlConfig = match locate_config_file(args.config.as_deref())? {
            Some(path) => load_toml(&path)?,
            None => TomlConfig::default(),
        };
        Self::from_parts(args, toml_config)
    }

    /// Merge already-parsed sources, CLI first
    pub fn from_parts(args: &Args, toml_config: TomlConfig) -> Result<Self> {
        let data_dir = resolve_data_dir(
            args.data_dir.as_deref(),
            "TAGDECK_DATA_DIR",
            toml_config.data_dir.as_deref(),
        );

        let storage_root = args
            .storage_root
            .clone()
            .or(toml_config.storage_root)
            .unwrap_or_else(|| data_dir.join("sd"));

        let mut logging = toml_config.logging;
        if let Some(level) = &args.log_level {
            logging.level = level.clone();
        }

        let config = Self {
            port: args.port.or(toml_config.port).unwrap_or_else(default_port),
            storage_root,
            database_path: data_dir.join("tagdeck.db"),
            backup_file: toml_config
                .backup_file
                .unwrap_or_else(|| "/backup.txt".to_string()),
            upload: toml_config.upload,
            bus: toml_config.bus,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.buffer_count < 2 {
            return Err(Error::Config(format!(
                "upload.buffer_count must be at least 2, got {}",
                self.upload.buffer_count
            )));
        }
        if self.upload.retry_count == 0 {
            return Err(Error::Config("upload.retry_count must be at least 1".into()));
        }
        if !self.upload.start_chunk_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "upload.start_chunk_size must be a power of two, got {}",
                self.upload.start_chunk_size
            )));
        }
        if self.upload.min_chunk_size == 0 {
            return Err(Error::Config("upload.min_chunk_size must be positive".into()));
        }
        Ok(())
    }

    /// Absolute path of the backup file
    pub fn backup_path(&self) -> PathBuf {
        self.storage_root
            .join(self.backup_file.trim_start_matches('/'))
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_overrides_toml() {
        std::env::remove_var("TAGDECK_DATA_DIR");
        let toml_config: TomlConfig = toml::from_str(
            r#"
            port = 8080
            storage_root = "/from/toml"

            [upload]
            start_chunk_size = 4096
            "#,
        )
        .unwrap();

        let args = Args {
            port: Some(9000),
            ..Default::default()
        };
        let config = Config::from_parts(&args, toml_config).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.storage_root, PathBuf::from("/from/toml"));
        assert_eq!(config.upload.start_chunk_size, 4096);
        // Unspecified upload keys keep their defaults
        assert_eq!(config.upload.buffer_count, 2);
        assert_eq!(config.upload.stall_timeout(), Duration::from_secs(20));
    }

    #[test]
    #[serial]
    fn test_defaults() {
        std::env::remove_var("TAGDECK_DATA_DIR");
        let config = Config::from_parts(&Args::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.backup_file, "/backup.txt");
        assert!(config.backup_path().ends_with("backup.txt"));
        assert!(!config.bus.enabled);
        assert_eq!(config.logging.level, "tagdeck_ap=debug,tower_http=info");
    }

    #[test]
    fn test_rejects_single_buffer_ring() {
        let toml_config: TomlConfig = toml::from_str("[upload]\nbuffer_count = 1\n").unwrap();
        let result = Config::from_parts(&Args::default(), toml_config);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
