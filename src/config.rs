//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::display::{DisplaySettings, DisplayZone};
use crate::error::{ArchiverError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local store layout
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    #[serde(default = "default_pending_dir")]
    pub pending_dir: String,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

/// Record window configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecordConfig {
    #[serde(default = "default_lifespan_s")]
    pub lifespan_s: u64,

    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

/// Remote archive endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    #[serde(default = "default_archive_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_upload_chunk_files")]
    pub upload_chunk_files: usize,

    #[serde(default = "default_legacy_scp")]
    pub legacy_scp: bool,
}

/// Display formatting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_time_format")]
    pub time_format: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_base_dir() -> String { ".".to_string() }
fn default_pending_dir() -> String { "outRecords".to_string() }
fn default_staging_dir() -> String { "inRecords".to_string() }

fn default_lifespan_s() -> u64 { 10 }
fn default_receive_timeout_ms() -> u64 { 1000 }

fn default_archive_enabled() -> bool { true }
fn default_host() -> String { "archive.local".to_string() }
fn default_user() -> String { "pi".to_string() }
fn default_port() -> u16 { 22 }
fn default_remote_dir() -> String { "/home/pi/records".to_string() }
fn default_archive_timeout_ms() -> u64 { 10000 }
fn default_upload_chunk_files() -> usize { 16 }
fn default_legacy_scp() -> bool { true }

fn default_timezone() -> String { "local".to_string() }
fn default_time_format() -> String { "%Y-%m-%d %H:%M:%S".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            pending_dir: default_pending_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            lifespan_s: default_lifespan_s(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_archive_enabled(),
            host: default_host(),
            user: default_user(),
            port: default_port(),
            remote_dir: default_remote_dir(),
            timeout_ms: default_archive_timeout_ms(),
            upload_chunk_files: default_upload_chunk_files(),
            legacy_scp: default_legacy_scp(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            time_format: default_time_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> ArchiverError {
    ArchiverError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_archiver::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.store.base_dir.is_empty() {
            return Err(invalid("store base_dir cannot be empty"));
        }

        if self.store.pending_dir.is_empty() || self.store.staging_dir.is_empty() {
            return Err(invalid("store pending_dir and staging_dir cannot be empty"));
        }

        if self.store.pending_dir == self.store.staging_dir {
            return Err(invalid("store pending_dir and staging_dir must differ"));
        }

        if self.record.lifespan_s == 0 || self.record.lifespan_s > 86_400 {
            return Err(invalid("lifespan_s must be between 1 and 86400"));
        }

        if self.record.receive_timeout_ms == 0 || self.record.receive_timeout_ms > 60_000 {
            return Err(invalid("receive_timeout_ms must be between 1 and 60000"));
        }

        // Endpoint fields only matter when shipping is on
        if self.archive.enabled {
            if self.archive.host.is_empty() || self.archive.user.is_empty() {
                return Err(invalid("archive host and user cannot be empty when enabled"));
            }

            if self.archive.remote_dir.is_empty() {
                return Err(invalid("archive remote_dir cannot be empty when enabled"));
            }

            if self.archive.port == 0 {
                return Err(invalid("archive port must be greater than 0"));
            }

            if self.archive.timeout_ms == 0 || self.archive.timeout_ms > 120_000 {
                return Err(invalid("archive timeout_ms must be between 1 and 120000"));
            }

            if self.archive.upload_chunk_files == 0 || self.archive.upload_chunk_files > 1000 {
                return Err(invalid("archive upload_chunk_files must be between 1 and 1000"));
            }
        }

        self.display_settings()?;

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }

    /// Resolve the display section into parsed settings
    ///
    /// # Errors
    ///
    /// Returns error if the timezone or time format cannot be parsed
    pub fn display_settings(&self) -> Result<DisplaySettings> {
        let zone = DisplayZone::parse(&self.display.timezone).ok_or_else(|| {
            invalid(format!(
                "display timezone '{}' must be 'local', 'utc' or an offset like +02:00",
                self.display.timezone
            ))
        })?;

        DisplaySettings::new(zone, &self.display.time_format)
            .ok_or_else(|| invalid(format!("invalid display time_format '{}'", self.display.time_format)))
    }

    /// Window length of one record
    pub fn lifespan(&self) -> Duration {
        Duration::from_secs(self.record.lifespan_s)
    }

    /// How long the driver waits for a sample before re-checking the record
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.record.receive_timeout_ms)
    }
}

impl ArchiveConfig {
    /// Upper bound for any single remote operation
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
