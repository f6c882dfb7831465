//! Spectral data types and payload decoding.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Samples in one spectrum.
pub const SPECTRUM_LEN: usize = 512;
/// Bytes in one spectral payload.
pub const PAYLOAD_LEN: usize = SPECTRUM_LEN * 4;

/// Exactly [`SPECTRUM_LEN`] samples, one per calibrated wavelength slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Spectrum(Vec<f32>);

impl Spectrum {
    pub fn samples(&self) -> &[f32] {
        &self.0
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.0
    }
}

impl TryFrom<Vec<f32>> for Spectrum {
    type Error = ScanError;

    fn try_from(samples: Vec<f32>) -> ScanResult<Self> {
        if samples.len() != SPECTRUM_LEN {
            return Err(ScanError::Protocol(format!(
                "spectrum must have {SPECTRUM_LEN} samples, got {}",
                samples.len()
            )));
        }
        Ok(Spectrum(samples))
    }
}

/// Byte order of the 32-bit float samples in a spectral payload.
///
/// Two firmware code paths disagree on this, so it is configured per device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn decode(self, bytes: [u8; 4]) -> f32 {
        match self {
            ByteOrder::Little => f32::from_le_bytes(bytes),
            ByteOrder::Big => f32::from_be_bytes(bytes),
        }
    }

    pub fn encode(self, value: f32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Firmware workaround: some revisions emit a stray 0x0A near the start of the
/// payload where another byte belongs. The first 0x0A inside `window` bytes is
/// replaced with `replacement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinefeedPatch {
    pub enabled: bool,
    pub window: usize,
    pub replacement: u8,
}

impl Default for LinefeedPatch {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 128,
            replacement: 0x43,
        }
    }
}

impl LinefeedPatch {
    /// Patch `payload` in place, returning the index that was replaced.
    pub fn apply(&self, payload: &mut [u8]) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        let end = self.window.min(payload.len());
        let index = payload[..end].iter().position(|&b| b == b'\n')?;
        payload[index] = self.replacement;
        Some(index)
    }
}

/// Decode a full spectral payload.
pub fn decode_spectrum(payload: &[u8], order: ByteOrder) -> ScanResult<Spectrum> {
    if payload.len() != PAYLOAD_LEN {
        return Err(ScanError::Protocol(format!(
            "spectral payload must be {PAYLOAD_LEN} bytes, got {}",
            payload.len()
        )));
    }
    let samples = payload
        .chunks_exact(4)
        .map(|chunk| order.decode([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<_>>();
    Spectrum::try_from(samples)
}

/// Encode samples the way the sensor sends them.
pub fn encode_samples(samples: &[f32], order: ByteOrder) -> Vec<u8> {
    samples.iter().flat_map(|&s| order.encode(s)).collect()
}

/// Calibrated wavelengths, one per measurement slot. Built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthTable(Vec<f64>);

impl WavelengthTable {
    /// Evenly spaced slots from `min_nm` to `max_nm`; the last slot is exactly
    /// `max_nm`.
    pub fn plan(count: usize, min_nm: f64, max_nm: f64) -> ScanResult<Self> {
        if count < 2 {
            return Err(ScanError::Protocol(format!(
                "need at least 2 wavelength slots, got {count}"
            )));
        }
        if !min_nm.is_finite() || !max_nm.is_finite() || min_nm >= max_nm {
            return Err(ScanError::Protocol(format!(
                "minimum wavelength {min_nm} must be below maximum {max_nm}"
            )));
        }
        let gap = (max_nm - min_nm) / (count - 1) as f64;
        let mut slots: Vec<f64> = (0..count - 1).map(|i| min_nm + gap * i as f64).collect();
        slots.push(max_nm);
        Ok(WavelengthTable(slots))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
