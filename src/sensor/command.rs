//! Typed spectrometer command set.
//!
//! Every command the controller can send is a variant here; `Display` renders
//! the ASCII wire text and [`SensorCommand::to_wire`] appends the CR
//! terminator. `FromStr` is the inverse and is what the simulator uses to
//! interpret incoming frames.

use std::fmt;
use std::str::FromStr;

/// Carriage return terminating both commands and responses.
pub const CR: u8 = b'\r';
/// Linefeed; noise inside a response frame.
pub const LF: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorCommand {
    SensorType,
    HardwareVersion,
    SerialNumber,
    MinWavelength,
    MaxWavelength,
    FirmwareVersion,
    WavelengthCount,
    /// Illumination power in percent
    LampPower(u8),
    MeasurementReady,
    FetchSpectrum { count: usize },
    Temperature,
    SetWavelength { slot: usize, nm: f64 },
}

impl SensorCommand {
    pub const LAMP_ON: SensorCommand = SensorCommand::LampPower(100);
    pub const LAMP_OFF: SensorCommand = SensorCommand::LampPower(0);

    /// Wire bytes including the CR terminator.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(CR);
        bytes
    }
}

impl fmt::Display for SensorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorCommand::SensorType => f.write_str("h0"),
            SensorCommand::HardwareVersion => f.write_str("h1"),
            SensorCommand::SerialNumber => f.write_str("h2"),
            SensorCommand::MinWavelength => f.write_str("h3"),
            SensorCommand::MaxWavelength => f.write_str("h4"),
            SensorCommand::FirmwareVersion => f.write_str("i"),
            SensorCommand::WavelengthCount => f.write_str("m"),
            SensorCommand::LampPower(level) => write!(f, "LI{level}"),
            SensorCommand::MeasurementReady => f.write_str("XM"),
            SensorCommand::FetchSpectrum { count } => write!(f, "Xm0,{count}"),
            SensorCommand::Temperature => f.write_str("St"),
            SensorCommand::SetWavelength { slot, nm } => write!(f, "W{slot},{nm:.1}"),
        }
    }
}

/// Error for text that is not a known sensor command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for SensorCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCommand(s.to_string());
        let cmd = match s {
            "h0" => SensorCommand::SensorType,
            "h1" => SensorCommand::HardwareVersion,
            "h2" => SensorCommand::SerialNumber,
            "h3" => SensorCommand::MinWavelength,
            "h4" => SensorCommand::MaxWavelength,
            "i" => SensorCommand::FirmwareVersion,
            "m" => SensorCommand::WavelengthCount,
            "XM" => SensorCommand::MeasurementReady,
            "St" => SensorCommand::Temperature,
            _ => {
                if let Some(level) = s.strip_prefix("LI") {
                    SensorCommand::LampPower(level.parse().map_err(|_| unknown())?)
                } else if let Some(count) = s.strip_prefix("Xm0,") {
                    SensorCommand::FetchSpectrum {
                        count: count.parse().map_err(|_| unknown())?,
                    }
                } else if let Some(rest) = s.strip_prefix('W') {
                    let (slot, nm) = rest.split_once(',').ok_or_else(unknown)?;
                    SensorCommand::SetWavelength {
                        slot: slot.parse().map_err(|_| unknown())?,
                        nm: nm.parse().map_err(|_| unknown())?,
                    }
                } else {
                    return Err(unknown());
                }
            }
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(SensorCommand::LAMP_ON.to_wire(), b"LI100\r");
        assert_eq!(SensorCommand::LAMP_OFF.to_wire(), b"LI0\r");
        assert_eq!(SensorCommand::MeasurementReady.to_wire(), b"XM\r");
        assert_eq!(
            SensorCommand::FetchSpectrum { count: 512 }.to_wire(),
            b"Xm0,512\r"
        );
        assert_eq!(SensorCommand::Temperature.to_wire(), b"St\r");
    }

    #[test]
    fn test_wavelength_has_one_decimal() {
        let cmd = SensorCommand::SetWavelength {
            slot: 3,
            nm: 1552.348,
        };
        assert_eq!(cmd.to_string(), "W3,1552.3");
        let cmd = SensorCommand::SetWavelength { slot: 0, nm: 1550.0 };
        assert_eq!(cmd.to_string(), "W0,1550.0");
    }

    #[test]
    fn test_parse_accepts_rendered_commands() {
        assert_eq!(
            "W12,1601.5".parse::<SensorCommand>().unwrap(),
            SensorCommand::SetWavelength { slot: 12, nm: 1601.5 }
        );
        assert_eq!(
            "Xm0,512".parse::<SensorCommand>().unwrap(),
            SensorCommand::FetchSpectrum { count: 512 }
        );
        assert_eq!(
            "LI100".parse::<SensorCommand>().unwrap(),
            SensorCommand::LAMP_ON
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("LIxx".parse::<SensorCommand>().is_err());
        assert!("W12".parse::<SensorCommand>().is_err());
        assert!("hello".parse::<SensorCommand>().is_err());
    }
}
