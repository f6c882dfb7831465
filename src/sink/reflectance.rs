//! Reflectance features for local inference.

use crate::error::{ScanError, ScanResult};
use crate::sensor::Spectrum;

/// Per-slot `(measured - background) / (white - background)`.
pub fn reflectance(
    measured: &Spectrum,
    white: &Spectrum,
    background: &Spectrum,
) -> ScanResult<Vec<f32>> {
    measured
        .samples()
        .iter()
        .zip(white.samples())
        .zip(background.samples())
        .enumerate()
        .map(|(slot, ((&m, &w), &d))| {
            let span = w - d;
            if span == 0.0 || !span.is_finite() {
                return Err(ScanError::Processing(format!(
                    "white and background references coincide at slot {slot}"
                )));
            }
            Ok((m - d) / span)
        })
        .collect()
}

/// Scale `values` linearly onto `[0, 1]`.
pub fn min_max_normalize(values: &[f32]) -> ScanResult<Vec<f32>> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return Err(ScanError::Processing(format!(
            "cannot normalize flat or empty reflectance (min {min}, max {max})"
        )));
    }
    Ok(values.iter().map(|v| (v - min) / range).collect())
}

/// Normalized reflectance, ready for the classifier.
pub fn features(
    measured: &Spectrum,
    white: &Spectrum,
    background: &Spectrum,
) -> ScanResult<Vec<f32>> {
    min_max_normalize(&reflectance(measured, white, background)?)
}
