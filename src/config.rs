//! Scanner configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/nirscan.toml` (base configuration)
//! 2. Environment variables prefixed with `NIRSCAN_`, nesting separated by `__`
//!
//! ```text
//! NIRSCAN_APPLICATION__LOG_LEVEL=debug
//! NIRSCAN_SENSOR__PORT=/dev/ttyACM1
//! NIRSCAN_CHANNEL__SIGN_KEY=...
//! ```
//!
//! Shared secrets are expected to come from the environment rather than the
//! checked-in TOML file.
//!
//! # Example
//!
//! ```no_run
//! use nirscan::config::ScannerConfig;
//!
//! let config = ScannerConfig::load()?;
//! println!("Sensor port: {}", config.sensor.port);
//! # Ok::<(), nirscan::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::sensor::{ByteOrder, LinefeedPatch, SPECTRUM_LEN};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(error))
    }
}

/// Top-level scanner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub application: ApplicationConfig,
    pub sensor: SensorConfig,
    pub api: ApiConfig,
    pub channel: ChannelConfig,
    pub inference: InferenceConfig,
    pub buttons: ButtonConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty or json)
    pub log_format: String,
    /// Device identifier reported to the classification service
    pub device_id: u64,
}

/// Spectrometer serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial port (e.g., "/dev/ttyACM0")
    pub port: String,
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of wavelength slots negotiated at startup
    pub wavelength_count: usize,
    pub min_wavelength_nm: f64,
    pub max_wavelength_nm: f64,
    /// Byte order of the spectral float samples
    pub byte_order: ByteOrder,
    pub linefeed_patch: LinefeedPatch,
    /// How many times the ready status is polled before giving up
    pub ready_poll_attempts: u32,
    pub ready_poll_interval_ms: u64,
}

/// Remote classification service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; the startup handshake goes to `{base_url}/notify`
    pub base_url: String,
    /// Key for the `X-Hmac-Sig` request signature
    pub shared_key: String,
    /// Upload timeout in milliseconds
    pub timeout_ms: u64,
    pub notify_timeout_ms: u64,
}

/// Companion-app command channel keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub sign_key: String,
    /// AES key; 16, 24 or 32 bytes
    pub encrypt_key: String,
}

/// Local inference IPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub socket_path: PathBuf,
    pub timeout_ms: u64,
}

/// Physical button inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// GPIO character device the button lines live on
    pub chip: PathBuf,
    /// Line offsets on `chip`. Missing entries disable the button.
    pub measure: Option<u32>,
    pub white_reference: Option<u32>,
    pub background: Option<u32>,
    /// Lines are pulled up and read low while pressed
    pub active_low: bool,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            device_id: 0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 2000,
            wavelength_count: 512,
            min_wavelength_nm: 1550.0,
            max_wavelength_nm: 1950.0,
            byte_order: ByteOrder::default(),
            linefeed_patch: LinefeedPatch::default(),
            ready_poll_attempts: 10,
            ready_poll_interval_ms: 100,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/v1".to_string(),
            shared_key: String::new(),
            timeout_ms: 10_000,
            notify_timeout_ms: 5_000,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/model-ipc-post.socket"),
            timeout_ms: 5_000,
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            chip: PathBuf::from("/dev/gpiochip0"),
            measure: None,
            white_reference: None,
            background: None,
            active_low: true,
            poll_interval_ms: 500,
            debounce_ms: 200,
        }
    }
}

impl SensorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ScannerConfig {
    /// Load configuration from `config/nirscan.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/nirscan.toml")
    }

    /// Load configuration from a specific file path, then validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NIRSCAN_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate configuration after loading.
    ///
    /// Checks log level and format, the wavelength range, serial timing, the
    /// service URL, and key lengths for the command channel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        self.validate_sensor()?;

        if reqwest::Url::parse(&self.api.base_url).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid api.base_url '{}'",
                self.api.base_url
            )));
        }
        if self.api.shared_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "api.shared_key cannot be empty".to_string(),
            ));
        }

        if self.channel.sign_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "channel.sign_key cannot be empty".to_string(),
            ));
        }
        if ![16, 24, 32].contains(&self.channel.encrypt_key.len()) {
            return Err(ConfigError::ValidationError(format!(
                "channel.encrypt_key must be 16, 24 or 32 bytes, got {}",
                self.channel.encrypt_key.len()
            )));
        }

        Ok(())
    }

    fn validate_sensor(&self) -> Result<(), ConfigError> {
        let sensor = &self.sensor;
        if sensor.port.is_empty() {
            return Err(ConfigError::ValidationError(
                "sensor.port cannot be empty".to_string(),
            ));
        }
        if sensor.wavelength_count != SPECTRUM_LEN {
            return Err(ConfigError::ValidationError(format!(
                "sensor.wavelength_count must be {SPECTRUM_LEN} to match the spectral payload, got {}",
                sensor.wavelength_count
            )));
        }
        if sensor.min_wavelength_nm >= sensor.max_wavelength_nm {
            return Err(ConfigError::ValidationError(format!(
                "sensor.min_wavelength_nm ({}) must be below max_wavelength_nm ({})",
                sensor.min_wavelength_nm, sensor.max_wavelength_nm
            )));
        }
        if sensor.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sensor.timeout_ms must be positive".to_string(),
            ));
        }
        if sensor.ready_poll_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "sensor.ready_poll_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
