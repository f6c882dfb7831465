//! Physical button monitor.
//!
//! Runs on its own OS thread so that its blocking poll and hold-wait never
//! stall the orchestrator. A press is acted on at release, and only when no
//! measurement session is in progress.

use embedded_hal::digital::InputPin as _;
use gpiocdev_embedded_hal::InputPin;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::triggers::{Trigger, Triggers};
use crate::config::ButtonConfig;
use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Measure,
    WhiteReference,
    Background,
}

impl Button {
    pub const ALL: [Button; 3] = [Button::Measure, Button::WhiteReference, Button::Background];

    pub fn trigger(self) -> Trigger {
        match self {
            Button::Measure => Trigger::Measure,
            Button::WhiteReference => Trigger::WhiteReference,
            Button::Background => Trigger::Background,
        }
    }
}

/// Pressed/released state of the three buttons.
pub trait ButtonInput: Send + 'static {
    fn is_pressed(&mut self, button: Button) -> bool;
}

/// Buttons on GPIO character-device lines, requested as inputs through
/// gpiocdev.
pub struct GpioButtons {
    pins: HashMap<Button, InputPin>,
    active_low: bool,
}

impl GpioButtons {
    /// Request every configured line on the chip. Unconfigured buttons are
    /// left out and never read as pressed.
    pub fn open(config: &ButtonConfig) -> ScanResult<Self> {
        let mut pins = HashMap::new();
        for (button, offset) in [
            (Button::Measure, config.measure),
            (Button::WhiteReference, config.white_reference),
            (Button::Background, config.background),
        ] {
            let Some(offset) = offset else {
                continue;
            };
            let pin = InputPin::new(&config.chip, offset).map_err(|e| {
                ScanError::Gpio(format!(
                    "cannot open line {offset} on {}: {e}",
                    config.chip.display()
                ))
            })?;
            debug!(?button, offset, chip = %config.chip.display(), "button line requested");
            pins.insert(button, pin);
        }
        Ok(Self {
            pins,
            active_low: config.active_low,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl ButtonInput for GpioButtons {
    fn is_pressed(&mut self, button: Button) -> bool {
        let active_low = self.active_low;
        let Some(pin) = self.pins.get_mut(&button) else {
            return false;
        };
        let level = if active_low { pin.is_low() } else { pin.is_high() };
        match level {
            Ok(pressed) => pressed,
            Err(e) => {
                trace!(?button, error = %e, "gpio read failed");
                false
            }
        }
    }
}

pub struct ButtonMonitor<I> {
    input: I,
    triggers: Arc<Triggers>,
    poll_interval: Duration,
    debounce: Duration,
}

impl<I: ButtonInput> ButtonMonitor<I> {
    pub fn new(input: I, triggers: Arc<Triggers>, config: &ButtonConfig) -> Self {
        Self {
            input,
            triggers,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// Start polling on a dedicated thread.
    pub fn spawn(self) -> io::Result<ButtonMonitorHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("button-monitor".to_string())
            .spawn(move || self.run(&thread_stop))?;
        Ok(ButtonMonitorHandle { stop, thread })
    }

    fn run(mut self, stop: &AtomicBool) {
        info!(poll = ?self.poll_interval, "button monitor started");
        while !stop.load(Ordering::Relaxed) {
            for button in Button::ALL {
                if self.input.is_pressed(button) {
                    if !self.wait_for_release(button, stop) {
                        return;
                    }
                    self.released(button);
                }
            }
            thread::sleep(self.poll_interval);
        }
        debug!("button monitor stopped");
    }

    /// Sleep-poll while held. False when asked to stop meanwhile.
    fn wait_for_release(&mut self, button: Button, stop: &AtomicBool) -> bool {
        while self.input.is_pressed(button) {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            thread::sleep(self.debounce);
        }
        true
    }

    fn released(&self, button: Button) {
        if self.triggers.in_progress() {
            debug!(?button, "press ignored during measurement");
            return;
        }
        info!(?button, "button pressed");
        self.triggers.set(button.trigger());
    }
}

pub struct ButtonMonitorHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ButtonMonitorHandle {
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            warn!("button monitor thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of readings per button, then reports released.
    #[derive(Clone, Default)]
    struct ScriptedInput {
        readings: Arc<Mutex<HashMap<Button, VecDeque<bool>>>>,
    }

    impl ScriptedInput {
        fn press(&self, button: Button, held_reads: usize) {
            let mut readings = self.readings.lock().unwrap();
            let queue = readings.entry(button).or_default();
            queue.extend(std::iter::repeat(true).take(held_reads));
        }
    }

    impl ButtonInput for ScriptedInput {
        fn is_pressed(&mut self, button: Button) -> bool {
            self.readings
                .lock()
                .unwrap()
                .get_mut(&button)
                .and_then(VecDeque::pop_front)
                .unwrap_or(false)
        }
    }

    fn config() -> ButtonConfig {
        ButtonConfig {
            poll_interval_ms: 5,
            debounce_ms: 1,
            ..ButtonConfig::default()
        }
    }

    #[test]
    fn test_press_sets_trigger_after_release() {
        let input = ScriptedInput::default();
        input.press(Button::WhiteReference, 4);
        let triggers = Arc::new(Triggers::new());

        let handle = ButtonMonitor::new(input, triggers.clone(), &config())
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();

        assert!(triggers.is_set(Trigger::WhiteReference));
        assert!(!triggers.is_set(Trigger::Measure));
    }

    #[test]
    fn test_press_during_session_is_dropped() {
        let input = ScriptedInput::default();
        input.press(Button::Measure, 2);
        let triggers = Arc::new(Triggers::new());
        let guard = triggers.try_begin_session().unwrap();

        let handle = ButtonMonitor::new(input, triggers.clone(), &config())
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();

        assert!(!triggers.is_set(Trigger::Measure));
        drop(guard);
    }

    #[test]
    fn test_no_configured_lines_opens_nothing() {
        // the chip is only touched when a line is configured
        let config = ButtonConfig {
            chip: "/nonexistent/gpiochip".into(),
            ..ButtonConfig::default()
        };
        let mut buttons = GpioButtons::open(&config).unwrap();
        assert!(buttons.is_empty());
        assert!(!buttons.is_pressed(Button::Measure));
    }

    #[test]
    fn test_missing_chip_is_a_gpio_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ButtonConfig {
            chip: dir.path().join("gpiochip9"),
            measure: Some(17),
            ..ButtonConfig::default()
        };
        let err = GpioButtons::open(&config).err().unwrap();
        assert!(matches!(err, ScanError::Gpio(_)), "{err}");
        assert!(err.to_string().contains("line 17"));
    }
}
