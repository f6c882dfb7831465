//! Operator-visible status signals.

use tracing::{info, warn};

/// Busy light, alarm blink and ready cue. The LED driver lives outside this
/// crate; it implements this trait.
pub trait StatusIndicator: Send + Sync {
    fn busy(&self, on: bool);
    fn alarm(&self);
    fn ready(&self);
}

/// Reports status through the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn busy(&self, on: bool) {
        info!(busy = on, "indicator");
    }

    fn alarm(&self) {
        warn!("indicator: alarm");
    }

    fn ready(&self) {
        info!("indicator: ready");
    }
}
