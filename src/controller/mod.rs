//! Calibrate-then-measure controller.
//!
//! - [`Orchestrator`]: the state machine, sole owner of the sensor link
//! - [`CommandDispatcher`]: sealed companion-app commands
//! - [`ButtonMonitor`]: physical buttons, on its own thread
//! - [`StatusIndicator`]: busy/alarm/ready signalling
//!
//! Shared state is limited to the trigger flags and the published
//! [`ControllerStatus`], both reached through a [`ControllerHandle`].

pub mod buttons;
pub mod commands;
pub mod indicator;
pub mod orchestrator;
pub mod state;
pub mod triggers;

use std::sync::Arc;
use tokio::sync::watch;

pub use buttons::{Button, ButtonInput, ButtonMonitor, GpioButtons};
pub use commands::{CommandDispatcher, RemoteCommand};
pub use indicator::{LogIndicator, StatusIndicator};
pub use orchestrator::{Orchestrator, SessionOutcome};
pub use state::{ControllerState, ControllerStatus, History, HistoryEntry};
pub use triggers::{Trigger, Triggers};

/// Cloneable access to a running orchestrator.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    triggers: Arc<Triggers>,
    status: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    pub fn new(triggers: Arc<Triggers>, status: watch::Receiver<ControllerStatus>) -> Self {
        Self { triggers, status }
    }

    pub fn triggers(&self) -> &Arc<Triggers> {
        &self.triggers
    }

    /// Current status snapshot.
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }
}
