//! Level-triggered request flags.
//!
//! Buttons and remote commands raise flags; the orchestrator reads them when
//! woken. Raising a flag that is already up changes nothing, and a wake-up
//! that arrives while the orchestrator is busy collapses into one.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Measure,
    WhiteReference,
    Background,
}

/// Flag values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingTriggers {
    pub measure: bool,
    pub white_reference: bool,
    pub background: bool,
}

#[derive(Debug, Default)]
pub struct Triggers {
    measure: AtomicBool,
    white_reference: AtomicBool,
    background: AtomicBool,
    in_progress: AtomicBool,
    notify: Notify,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, trigger: Trigger) -> &AtomicBool {
        match trigger {
            Trigger::Measure => &self.measure,
            Trigger::WhiteReference => &self.white_reference,
            Trigger::Background => &self.background,
        }
    }

    pub fn set(&self, trigger: Trigger) {
        self.flag(trigger).store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_set(&self, trigger: Trigger) -> bool {
        self.flag(trigger).load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> PendingTriggers {
        PendingTriggers {
            measure: self.is_set(Trigger::Measure),
            white_reference: self.is_set(Trigger::WhiteReference),
            background: self.is_set(Trigger::Background),
        }
    }

    pub fn clear_all(&self) {
        self.measure.store(false, Ordering::SeqCst);
        self.white_reference.store(false, Ordering::SeqCst);
        self.background.store(false, Ordering::SeqCst);
    }

    /// Wait until some flag is raised.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Claim the sensor for one session. `None` while another session runs.
    pub fn try_begin_session(&self) -> Option<SessionGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SessionGuard {
                flag: &self.in_progress,
            })
    }
}

/// Releases the in-progress flag when dropped.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
