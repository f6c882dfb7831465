//! Measurement orchestration.
//!
//! The orchestrator is the only owner of the sensor link, the calibration
//! references and the history. Everything else sees it through the
//! [`ControllerHandle`]: trigger flags going in, a status snapshot coming out.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::indicator::StatusIndicator;
use super::state::{CalibrationState, ControllerState, ControllerStatus, HistoryEntry};
use super::triggers::Triggers;
use super::ControllerHandle;
use crate::error::ScanError;
use crate::sensor::{MeasurementKind, SensorLink, SensorPort, Spectrum};
use crate::sink::{Delivery, ResultSink};

/// What one wake-up of the orchestrator amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No measure request was pending
    NothingPending,
    /// Another session held the sensor; the request was dropped
    Busy,
    /// A normal measurement was requested before calibration
    Rejected,
    Calibrated(MeasurementKind),
    Published(Delivery),
    Failed(String),
}

pub struct Orchestrator<P> {
    link: SensorLink<P>,
    sink: ResultSink,
    indicator: Arc<dyn StatusIndicator>,
    triggers: Arc<Triggers>,
    status: watch::Sender<ControllerStatus>,
    calibration: CalibrationState,
}

impl<P: SensorPort> Orchestrator<P> {
    pub fn new(link: SensorLink<P>, sink: ResultSink, indicator: Arc<dyn StatusIndicator>) -> Self {
        let (status, _) = watch::channel(ControllerStatus::default());
        Self {
            link,
            sink,
            indicator,
            triggers: Arc::new(Triggers::new()),
            status,
            calibration: CalibrationState::default(),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(self.triggers.clone(), self.status.subscribe())
    }

    /// Serve triggers until `shutdown` fires or its sender is dropped.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(remote = self.sink.remote_active(), "orchestrator started");
        self.indicator.ready();
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("orchestrator received shutdown signal");
                    break;
                }
                _ = self.triggers.notified() => {
                    let outcome = self.step().await;
                    debug!(?outcome, "trigger handled");
                }
            }
        }
    }

    /// Act on the pending trigger flags once.
    pub async fn step(&mut self) -> SessionOutcome {
        let pending = self.triggers.pending();
        if !pending.measure {
            return SessionOutcome::NothingPending;
        }

        let kind = if pending.white_reference {
            MeasurementKind::WhiteReference
        } else if pending.background {
            MeasurementKind::Background
        } else if self.calibration.references().is_some() {
            MeasurementKind::Normal
        } else {
            let violation = ScanError::StateViolation(format!(
                "measurement refused: white reference {}, background {}",
                self.calibration.white_calibrated(),
                self.calibration.background_calibrated()
            ));
            warn!(error = %violation, "calibrate before measuring");
            self.indicator.alarm();
            self.triggers.clear_all();
            return SessionOutcome::Rejected;
        };

        let triggers = self.triggers.clone();
        let Some(_session) = triggers.try_begin_session() else {
            debug!(%kind, "session already running; trigger dropped");
            return SessionOutcome::Busy;
        };

        self.indicator.busy(true);
        self.status
            .send_modify(|s| s.state = ControllerState::Measuring(kind));

        let outcome = self.run_session(kind).await;
        let temperature = self.link.query_temperature().await;

        self.triggers.clear_all();
        self.status.send_modify(|s| {
            s.state = ControllerState::Idle;
            s.temperature = temperature;
        });
        self.indicator.busy(false);
        if let SessionOutcome::Failed(_) = outcome {
            self.indicator.alarm();
        }
        outcome
    }

    async fn run_session(&mut self, kind: MeasurementKind) -> SessionOutcome {
        let spectrum = match self.link.run_measurement(kind).await {
            Ok(spectrum) => spectrum,
            Err(e) => {
                error!(%kind, error = %e, "measurement session failed");
                return SessionOutcome::Failed(e.to_string());
            }
        };

        match kind {
            MeasurementKind::Normal => self.publish(spectrum).await,
            MeasurementKind::WhiteReference | MeasurementKind::Background => {
                self.sink.upload_reference(&spectrum, kind).await;
                self.calibration.record(kind, spectrum);
                let white = self.calibration.white_calibrated();
                let background = self.calibration.background_calibrated();
                self.status.send_modify(|s| {
                    s.white_calibrated = white;
                    s.background_calibrated = background;
                });
                info!(%kind, "calibration reference captured");
                SessionOutcome::Calibrated(kind)
            }
        }
    }

    async fn publish(&mut self, spectrum: Spectrum) -> SessionOutcome {
        self.status
            .send_modify(|s| s.state = ControllerState::Publishing);

        let Some((white, background)) = self.calibration.references() else {
            return SessionOutcome::Failed("calibration references missing".to_string());
        };

        match self.sink.deliver(&spectrum, white, background).await {
            Ok(delivery) => {
                info!(route = ?delivery.route, remote_error = ?delivery.remote_error, "measurement published");
                let entry = HistoryEntry {
                    timestamp: Utc::now(),
                    label: delivery.label.clone(),
                };
                self.status.send_modify(|s| {
                    s.label = entry.label.clone();
                    s.history.push(entry);
                });
                SessionOutcome::Published(delivery)
            }
            Err(e) => {
                error!(error = %e, "could not classify measurement");
                SessionOutcome::Failed(e.to_string())
            }
        }
    }
}
