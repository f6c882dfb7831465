//! Controller state types.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::fmt;

use crate::sensor::{MeasurementKind, SensorTemperature, Spectrum};

/// Label reported before any measurement has been published.
pub const NO_MEASUREMENTS: &str = "No measurements";

/// Entries kept in [`History`].
pub const HISTORY_CAPACITY: usize = 6;

/// Upper bound on the `list_History` reply plaintext, in bytes.
pub const HISTORY_TEXT_LIMIT: usize = 384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    Measuring(MeasurementKind),
    Publishing,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => f.write_str("idle"),
            ControllerState::Measuring(kind) => write!(f, "measuring({kind})"),
            ControllerState::Publishing => f.write_str("publishing"),
        }
    }
}

/// Calibration references. Only successful calibration sessions write here,
/// and nothing resets it.
#[derive(Debug, Clone, Default)]
pub struct CalibrationState {
    pub white_reference: Option<Spectrum>,
    pub background: Option<Spectrum>,
}

impl CalibrationState {
    pub fn white_calibrated(&self) -> bool {
        self.white_reference.is_some()
    }

    pub fn background_calibrated(&self) -> bool {
        self.background.is_some()
    }

    /// Both references, when both have been captured.
    pub fn references(&self) -> Option<(&Spectrum, &Spectrum)> {
        Some((self.white_reference.as_ref()?, self.background.as_ref()?))
    }

    pub fn record(&mut self, kind: MeasurementKind, spectrum: Spectrum) {
        match kind {
            MeasurementKind::WhiteReference => self.white_reference = Some(spectrum),
            MeasurementKind::Background => self.background = Some(spectrum),
            MeasurementKind::Normal => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub label: String,
}

impl HistoryEntry {
    /// Timestamp line followed by the label lines.
    pub fn to_text(&self) -> String {
        let mut text = self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        text.push('\n');
        text.push_str(&self.label);
        if !self.label.ends_with('\n') {
            text.push('\n');
        }
        text
    }
}

/// Most recent labels, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    /// Insert at the front, evicting the oldest entry first when full.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= HISTORY_CAPACITY {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Newest-first text, cut at whole entries to fit `limit` bytes.
    pub fn to_text(&self, limit: usize) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let block = entry.to_text();
            if text.len() + block.len() > limit {
                break;
            }
            text.push_str(&block);
        }
        text
    }
}

/// Read-only view of the controller, republished on every transition.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub white_calibrated: bool,
    pub background_calibrated: bool,
    pub label: String,
    pub temperature: SensorTemperature,
    pub history: History,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            state: ControllerState::Idle,
            white_calibrated: false,
            background_calibrated: false,
            label: NO_MEASUREMENTS.to_string(),
            temperature: SensorTemperature::NotRead,
            history: History::default(),
        }
    }
}

impl ControllerStatus {
    pub fn calibrated(&self) -> bool {
        self.white_calibrated && self.background_calibrated
    }
}
