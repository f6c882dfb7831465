//! Custom error types for the scanner.
//!
//! `ScanError` is the single error type of the library. Its variants follow the
//! failure taxonomy of the controller:
//!
//! - **`Transport`**: open/read/write failures on the sensor serial link,
//!   including read timeouts.
//! - **`Protocol`**: the sensor answered, but not in a shape we accept
//!   (malformed frame, short spectral payload, wrong sample count).
//! - **`Crypto`**: envelope signature mismatch or decode failure. These never
//!   leave the secure channel; `secure::open` turns them into an empty command.
//! - **`Network`**: the remote classification service timed out, refused the
//!   connection, or answered with a non-200 status.
//! - **`StateViolation`**: a measurement was requested before calibration.
//! - **`Processing`**: reflectance math on degenerate reference spectra.
//! - **`Gpio`**: a button line could not be requested from the GPIO chip.
//! - **`Config`** / **`Io`**: ambient failures outside a measurement session.
//!
//! Session code catches `Transport`/`Protocol` at the session boundary; nothing
//! in the core retries automatically.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the scanner error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Sensor transport failure: {0}")]
    Transport(String),

    #[error("Sensor protocol failure: {0}")]
    Protocol(String),

    #[error("Command channel crypto failure: {0}")]
    Crypto(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("State violation: {0}")]
    StateViolation(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// True for failures raised by the sensor link itself.
    pub fn is_sensor_failure(&self) -> bool {
        matches!(self, ScanError::Transport(_) | ScanError::Protocol(_))
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(error: reqwest::Error) -> Self {
        ScanError::Network(error.to_string())
    }
}
