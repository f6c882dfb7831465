//! Request/response session with the spectrometer.
//!
//! Responses are CR-terminated ASCII frames. LF bytes inside a frame are
//! discarded. The only binary exchange is the spectral payload, which is read
//! by byte count rather than by terminator.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::command::{SensorCommand, CR, LF};
use super::port::SensorPort;
use super::spectrum::{
    decode_spectrum, ByteOrder, LinefeedPatch, Spectrum, WavelengthTable, PAYLOAD_LEN, SPECTRUM_LEN,
};
use super::{MeasurementKind, SensorInfo, SensorTemperature};
use crate::config::SensorConfig;
use crate::error::{ScanError, ScanResult};

/// Longest response frame accepted before the link gives up on finding a CR.
const MAX_FRAME_LEN: usize = 256;

pub struct SensorLink<P> {
    port: P,
    timeout: Duration,
    byte_order: ByteOrder,
    linefeed_patch: LinefeedPatch,
    ready_poll_attempts: u32,
    ready_poll_interval: Duration,
    wavelengths: Option<WavelengthTable>,
}

#[cfg(feature = "tokio_serial")]
impl SensorLink<tokio_serial::SerialStream> {
    /// Open the configured serial port.
    pub async fn open(config: &SensorConfig) -> ScanResult<Self> {
        let port = super::port::open_serial(config)?;
        info!(port = %config.port, baud = config.baud_rate, "sensor serial port opened");
        Ok(Self::with_port(port, config))
    }
}

impl<P: SensorPort> SensorLink<P> {
    /// Wrap an already-open transport.
    pub fn with_port(port: P, config: &SensorConfig) -> Self {
        Self {
            port,
            timeout: config.timeout(),
            byte_order: config.byte_order,
            linefeed_patch: config.linefeed_patch,
            ready_poll_attempts: config.ready_poll_attempts,
            ready_poll_interval: config.ready_poll_interval(),
            wavelengths: None,
        }
    }

    /// Wavelength table from the last successful negotiation.
    pub fn wavelengths(&self) -> Option<&WavelengthTable> {
        self.wavelengths.as_ref()
    }

    async fn send(&mut self, command: SensorCommand) -> ScanResult<()> {
        debug!(%command, "sensor tx");
        self.port
            .write_all(&command.to_wire())
            .await
            .map_err(|e| ScanError::Transport(format!("write '{command}' failed: {e}")))?;
        self.port
            .flush()
            .await
            .map_err(|e| ScanError::Transport(format!("flush after '{command}' failed: {e}")))
    }

    async fn read_frame(&mut self) -> ScanResult<String> {
        match tokio::time::timeout(self.timeout, self.read_frame_inner()).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Transport(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }

    async fn read_frame_inner(&mut self) -> ScanResult<String> {
        let mut frame = Vec::new();
        loop {
            let byte = self
                .port
                .read_u8()
                .await
                .map_err(|e| ScanError::Transport(format!("read failed: {e}")))?;
            match byte {
                CR => break,
                LF => continue,
                b => frame.push(b),
            }
            if frame.len() > MAX_FRAME_LEN {
                return Err(ScanError::Protocol(format!(
                    "response exceeded {MAX_FRAME_LEN} bytes without terminator"
                )));
            }
        }
        let text = String::from_utf8_lossy(&frame).into_owned();
        debug!(response = %text, "sensor rx");
        Ok(text)
    }

    /// Send a command and return its response frame.
    pub async fn query(&mut self, command: SensorCommand) -> ScanResult<String> {
        self.send(command).await?;
        self.read_frame().await
    }

    async fn discard_buffers(&mut self) -> ScanResult<()> {
        self.port
            .discard_buffers()
            .await
            .map_err(|e| ScanError::Transport(format!("buffer flush failed: {e}")))
    }

    /// Read the identification block.
    pub async fn identify(&mut self) -> ScanResult<SensorInfo> {
        let info = SensorInfo {
            sensor_type: self.query(SensorCommand::SensorType).await?,
            hardware_version: self.query(SensorCommand::HardwareVersion).await?,
            serial_number: self.query(SensorCommand::SerialNumber).await?,
            min_wavelength: self.query(SensorCommand::MinWavelength).await?,
            max_wavelength: self.query(SensorCommand::MaxWavelength).await?,
            firmware_version: self.query(SensorCommand::FirmwareVersion).await?,
            wavelength_count: self.query(SensorCommand::WavelengthCount).await?,
        };
        info!(
            sensor_type = %info.sensor_type,
            serial = %info.serial_number,
            firmware = %info.firmware_version,
            "sensor identified"
        );
        Ok(info)
    }

    /// Program every wavelength slot. Each slot must be acknowledged before the
    /// next one is sent.
    pub async fn negotiate_wavelengths(
        &mut self,
        count: usize,
        min_nm: f64,
        max_nm: f64,
    ) -> ScanResult<&WavelengthTable> {
        let table = WavelengthTable::plan(count, min_nm, max_nm)?;
        for (slot, &nm) in table.as_slice().iter().enumerate() {
            self.query(SensorCommand::SetWavelength { slot, nm }).await?;
        }
        info!(slots = table.len(), min_nm, max_nm, "wavelength table programmed");
        Ok(self.wavelengths.insert(table))
    }

    /// Acquire one spectrum. The lamp is on for normal and white-reference
    /// sessions and off for background sessions. On any failure the lamp is
    /// switched off before the error is returned.
    pub async fn run_measurement(&mut self, kind: MeasurementKind) -> ScanResult<Spectrum> {
        let span = info_span!("sensor_sequence", %kind);
        let result = self.acquire(kind).instrument(span).await;
        if let Err(e) = &result {
            warn!(%kind, error = %e, "sensor sequence failed");
            self.lamp_off_best_effort().await;
        }
        result
    }

    async fn acquire(&mut self, kind: MeasurementKind) -> ScanResult<Spectrum> {
        if kind.uses_lamp() {
            self.query(SensorCommand::LAMP_ON).await?;
            self.discard_buffers().await?;
        }

        self.wait_ready().await?;
        self.discard_buffers().await?;

        self.send(SensorCommand::FetchSpectrum {
            count: SPECTRUM_LEN,
        })
        .await?;
        let mut payload = self.read_payload().await?;
        if let Some(index) = self.linefeed_patch.apply(&mut payload) {
            debug!(index, "patched stray linefeed in spectral payload");
        }
        let spectrum = decode_spectrum(&payload, self.byte_order)?;
        self.discard_buffers().await?;

        if kind.uses_lamp() {
            self.query(SensorCommand::LAMP_OFF).await?;
        }
        debug!("spectrum acquired");
        Ok(spectrum)
    }

    async fn wait_ready(&mut self) -> ScanResult<()> {
        for attempt in 1..=self.ready_poll_attempts {
            let status = self.query(SensorCommand::MeasurementReady).await?;
            if !status.trim().is_empty() {
                debug!(attempt, %status, "sensor ready");
                return Ok(());
            }
            tokio::time::sleep(self.ready_poll_interval).await;
        }
        Err(ScanError::Protocol(format!(
            "sensor not ready after {} polls",
            self.ready_poll_attempts
        )))
    }

    async fn read_payload(&mut self) -> ScanResult<Vec<u8>> {
        let mut payload = vec![0u8; PAYLOAD_LEN];
        let mut filled = 0;
        let deadline = Instant::now() + self.timeout;

        while filled < PAYLOAD_LEN {
            match tokio::time::timeout_at(deadline, self.port.read(&mut payload[filled..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => {
                    return Err(ScanError::Transport(format!("payload read failed: {e}")));
                }
            }
        }

        if filled < PAYLOAD_LEN {
            return Err(ScanError::Protocol(format!(
                "spectral payload incomplete: received {filled} of {PAYLOAD_LEN} bytes"
            )));
        }
        Ok(payload)
    }

    async fn lamp_off_best_effort(&mut self) {
        let _ = self.discard_buffers().await;
        if let Err(e) = self.query(SensorCommand::LAMP_OFF).await {
            warn!(error = %e, "could not switch lamp off after failure");
        }
    }

    /// Read the die temperature. Never fails; an unreadable value becomes
    /// [`SensorTemperature::Unavailable`].
    pub async fn query_temperature(&mut self) -> SensorTemperature {
        match self.query(SensorCommand::Temperature).await {
            Ok(response) => match parse_temperature(&response) {
                Some(celsius) => SensorTemperature::Celsius(celsius),
                None => {
                    warn!(%response, "unparseable temperature response");
                    SensorTemperature::Unavailable
                }
            },
            Err(e) => {
                warn!(error = %e, "temperature query failed");
                SensorTemperature::Unavailable
            }
        }
    }
}

/// Parse a `St` response such as `St:3.20e+01`, reading the text after the
/// last colon. The value is truncated toward zero.
pub fn parse_temperature(response: &str) -> Option<i32> {
    let (_, value) = response.rsplit_once(':')?;
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.trunc() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    fn config() -> SensorConfig {
        SensorConfig {
            timeout_ms: 300,
            ready_poll_interval_ms: 5,
            ready_poll_attempts: 3,
            ..SensorConfig::default()
        }
    }

    fn link_pair() -> (SensorLink<DuplexStream>, DuplexStream) {
        let (client, server) = duplex(8192);
        (SensorLink::with_port(client, &config()), server)
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("St:3.20e+01"), Some(32));
        assert_eq!(parse_temperature("St: 28.9"), Some(28));
        assert_eq!(parse_temperature("St:-1.5"), Some(-1));
        assert_eq!(parse_temperature("St:abc"), None);
        assert_eq!(parse_temperature("no colon"), None);
        assert_eq!(parse_temperature("St:T:2.5e+01"), Some(25));
    }

    #[tokio::test]
    async fn test_query_strips_linefeeds() {
        let (mut link, mut server) = link_pair();
        server.write_all(b"\nNIR\nONE\r").await.unwrap();

        let response = link.query(SensorCommand::SensorType).await.unwrap();
        assert_eq!(response, "NIRONE");

        let mut sent = [0u8; 3];
        server.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"h0\r");
    }

    #[tokio::test]
    async fn test_query_times_out_as_transport_error() {
        let (mut link, _server) = link_pair();
        let err = link.query(SensorCommand::SensorType).await.unwrap_err();
        assert!(matches!(err, ScanError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreadable_temperature() {
        let (mut link, mut server) = link_pair();
        server.write_all(b"St:???\r").await.unwrap();
        assert_eq!(link.query_temperature().await, SensorTemperature::Unavailable);

        // nobody answers the second query
        assert_eq!(link.query_temperature().await, SensorTemperature::Unavailable);
    }

    #[tokio::test]
    async fn test_negotiation_waits_for_each_ack() {
        let (mut link, server) = link_pair();
        let responder = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut reader = BufReader::new(server);
            for _ in 0..4 {
                let mut buf = Vec::new();
                reader.read_until(b'\r', &mut buf).await.unwrap();
                lines.push(String::from_utf8(buf).unwrap());
                reader.get_mut().write_all(b"OK\r").await.unwrap();
            }
            lines
        });

        let table = link.negotiate_wavelengths(4, 1500.0, 1530.0).await.unwrap();
        assert_eq!(table.as_slice(), &[1500.0, 1510.0, 1520.0, 1530.0]);

        let lines = responder.await.unwrap();
        assert_eq!(lines[0], "W0,1500.0\r");
        assert_eq!(lines[3], "W3,1530.0\r");
        assert!(link.wavelengths().is_some());
    }
}
