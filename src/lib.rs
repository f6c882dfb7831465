//! Onboard controller for a handheld near-infrared fabric classifier.
//!
//! The controller drives a serial NIR spectrometer through calibrate-then-measure
//! sessions, turns each sample spectrum into a fabric classification (remotely
//! or through a local model) and answers sealed queries from a companion app.
//! It is used by the `nirscan` daemon and by the integration tests.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod secure;
pub mod sensor;
pub mod sink;

pub use error::{ScanError, ScanResult};
