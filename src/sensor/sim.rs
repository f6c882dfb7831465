//! Simulated spectrometer
//!
//! Serves the sensor protocol over an in-memory duplex stream so the whole
//! controller can run without hardware (`nirscan run --simulate`) and so tests
//! can script sensor behavior.
//!
//! The simulated optics are simple: each slot reads a dark level plus, with
//! the lamp on, an illumination term scaled by the reflectance of whatever is
//! under the sensor. Swapping the target between the white tile and a sample
//! gives spectra whose computed reflectance equals the target profile.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

use super::command::{SensorCommand, CR};
use super::spectrum::{encode_samples, ByteOrder, SPECTRUM_LEN};

/// Leading payload bytes where the firmware linefeed fault can appear.
const FAULT_WINDOW: usize = 128;

#[derive(Debug)]
struct SimState {
    lamp_on: bool,
    target: Vec<f32>,
    /// Remaining `XM` polls answered with an empty frame
    busy_polls: u32,
    temperature_reply: String,
    /// Stop the payload after this many bytes
    truncate_payload: Option<usize>,
    /// Reproduce the firmware fault that turns the first 0x43 into 0x0A
    inject_linefeed: bool,
    commands: Vec<String>,
}

/// Handle for inspecting and scripting a running simulator.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a surface with the given per-slot reflectance under the sensor.
    pub fn set_target(&self, reflectance: Vec<f32>) {
        self.state().target = reflectance;
    }

    /// Put the white calibration tile under the sensor.
    pub fn set_white_target(&self) {
        self.set_target(vec![1.0; SPECTRUM_LEN]);
    }

    pub fn set_busy_polls(&self, polls: u32) {
        self.state().busy_polls = polls;
    }

    /// Text after `St:` in temperature replies.
    pub fn set_temperature_reply(&self, reply: impl Into<String>) {
        self.state().temperature_reply = reply.into();
    }

    pub fn truncate_payload(&self, bytes: Option<usize>) {
        self.state().truncate_payload = bytes;
    }

    pub fn inject_linefeed(&self, enabled: bool) {
        self.state().inject_linefeed = enabled;
    }

    pub fn lamp_on(&self) -> bool {
        self.state().lamp_on
    }

    /// Every command received so far, in wire text.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }
}

/// Simulated NIR spectrometer.
pub struct SimulatedSensor {
    byte_order: ByteOrder,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensor {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            state: Arc::new(Mutex::new(SimState {
                lamp_on: false,
                target: vec![1.0; SPECTRUM_LEN],
                busy_polls: 0,
                temperature_reply: "3.20e+01".to_string(),
                truncate_payload: None,
                inject_linefeed: false,
                commands: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    /// Start serving on a background task and return the controller's end of
    /// the stream. The task ends when that end is dropped.
    pub fn spawn(self) -> (DuplexStream, SimHandle) {
        let (client, server) = duplex(16 * 1024);
        let handle = self.handle();
        tokio::spawn(async move {
            if let Err(e) = self.serve(server).await {
                debug!(error = %e, "simulated sensor stopped");
            }
        });
        (client, handle)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn serve(self, mut stream: DuplexStream) -> std::io::Result<()> {
        let mut line = Vec::new();
        loop {
            let byte = stream.read_u8().await?;
            if byte != CR {
                line.push(byte);
                continue;
            }
            let text = String::from_utf8_lossy(&line).trim().to_string();
            line.clear();
            trace!(command = %text, "sim rx");
            self.lock().commands.push(text.clone());

            let reply = match text.parse::<SensorCommand>() {
                Ok(command) => self.respond(command),
                Err(_) => b"\nERR\r".to_vec(),
            };
            stream.write_all(&reply).await?;
            stream.flush().await?;
        }
    }

    fn respond(&self, command: SensorCommand) -> Vec<u8> {
        let mut state = self.lock();
        let text = match command {
            SensorCommand::SensorType => "NIRONE-S2.0".to_string(),
            SensorCommand::HardwareVersion => "HW1.2".to_string(),
            SensorCommand::SerialNumber => "SIM004217".to_string(),
            SensorCommand::MinWavelength => "1550".to_string(),
            SensorCommand::MaxWavelength => "1950".to_string(),
            SensorCommand::FirmwareVersion => "2.4.1".to_string(),
            SensorCommand::WavelengthCount => SPECTRUM_LEN.to_string(),
            SensorCommand::LampPower(level) => {
                state.lamp_on = level > 0;
                format!("LI:{level}")
            }
            SensorCommand::MeasurementReady => {
                if state.busy_polls > 0 {
                    state.busy_polls -= 1;
                    String::new()
                } else {
                    "XM:1".to_string()
                }
            }
            SensorCommand::Temperature => format!("St:{}", state.temperature_reply),
            SensorCommand::SetWavelength { slot, .. } => format!("W:{slot}"),
            SensorCommand::FetchSpectrum { count } => {
                let samples = spectrum(state.lamp_on, &state.target, count, self.byte_order);
                let mut payload = encode_samples(&samples, self.byte_order);
                if state.inject_linefeed {
                    let window = FAULT_WINDOW.min(payload.len());
                    if let Some(pos) = payload[..window].iter().position(|&b| b == 0x43) {
                        payload[pos] = b'\n';
                    }
                }
                if let Some(limit) = state.truncate_payload {
                    payload.truncate(limit);
                }
                return payload;
            }
        };
        // Real firmware prefixes most replies with a stray linefeed.
        format!("\n{text}\r").into_bytes()
    }
}

/// Dark level for slot `i`.
pub fn dark_level(i: usize) -> f32 {
    120.0 + (i % 7) as f32
}

/// Lamp contribution for slot `i` off a perfect reflector.
pub fn illumination(i: usize) -> f32 {
    2000.0 + 3.0 * i as f32
}

fn spectrum(lamp_on: bool, target: &[f32], count: usize, order: ByteOrder) -> Vec<f32> {
    (0..count)
        .map(|i| {
            let reflect = target.get(i).copied().unwrap_or(1.0);
            let value = if lamp_on {
                dark_level(i) + reflect * illumination(i)
            } else {
                dark_level(i)
            };
            if i * 4 < FAULT_WINDOW {
                without_linefeed(value, order)
            } else {
                value
            }
        })
        .collect()
}

/// Nudge `value` by the smallest steps until its encoding holds no 0x0A byte,
/// so the controller's linefeed repair never touches genuine data.
fn without_linefeed(value: f32, order: ByteOrder) -> f32 {
    let mut bits = value.to_bits();
    while order.encode(f32::from_bits(bits)).contains(&b'\n') {
        bits += 1;
    }
    f32::from_bits(bits)
}
