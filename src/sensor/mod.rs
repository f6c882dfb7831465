//! Spectrometer driver.
//!
//! The NIR module talks a CR-terminated ASCII protocol over a serial line with
//! one binary exchange for the spectral payload. [`SensorLink`] owns the port
//! and runs command sequences; [`sim::SimulatedSensor`] speaks the same
//! protocol over an in-memory stream.

pub mod command;
pub mod link;
pub mod port;
pub mod sim;
pub mod spectrum;

use serde::Serialize;
use std::fmt;

pub use command::SensorCommand;
pub use link::{parse_temperature, SensorLink};
pub use port::SensorPort;
pub use spectrum::{ByteOrder, LinefeedPatch, Spectrum, WavelengthTable, PAYLOAD_LEN, SPECTRUM_LEN};

/// What a measurement session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MeasurementKind {
    /// A fabric sample, lamp on
    Normal,
    /// White calibration tile, lamp on
    WhiteReference,
    /// Dark background, lamp off
    Background,
}

impl MeasurementKind {
    pub fn uses_lamp(self) -> bool {
        !matches!(self, MeasurementKind::Background)
    }

    /// Single-letter code used in upload packets.
    pub fn code(self) -> &'static str {
        match self {
            MeasurementKind::Normal => "m",
            MeasurementKind::WhiteReference => "w",
            MeasurementKind::Background => "b",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeasurementKind::Normal => "normal",
            MeasurementKind::WhiteReference => "white_reference",
            MeasurementKind::Background => "background",
        })
    }
}

/// Identification block read at startup. Values are kept as the sensor
/// reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    pub sensor_type: String,
    pub hardware_version: String,
    pub serial_number: String,
    pub min_wavelength: String,
    pub max_wavelength: String,
    pub firmware_version: String,
    pub wavelength_count: String,
}

/// Last known die temperature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorTemperature {
    /// No query has been made yet
    #[default]
    NotRead,
    Celsius(i32),
    /// The last query failed or returned garbage
    Unavailable,
}

impl fmt::Display for SensorTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorTemperature::NotRead => f.write_str("0"),
            SensorTemperature::Celsius(c) => write!(f, "{c}"),
            SensorTemperature::Unavailable => f.write_str("err"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_text() {
        assert_eq!(SensorTemperature::default().to_string(), "0");
        assert_eq!(SensorTemperature::Celsius(31).to_string(), "31");
        assert_eq!(SensorTemperature::Unavailable.to_string(), "err");
    }

    #[test]
    fn test_lamp_usage_per_kind() {
        assert!(MeasurementKind::Normal.uses_lamp());
        assert!(MeasurementKind::WhiteReference.uses_lamp());
        assert!(!MeasurementKind::Background.uses_lamp());
        assert_eq!(MeasurementKind::WhiteReference.code(), "w");
    }
}
