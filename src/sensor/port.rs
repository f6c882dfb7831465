//! Byte transports the sensor link can run over.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};

#[cfg(feature = "tokio_serial")]
use crate::config::SensorConfig;
#[cfg(feature = "tokio_serial")]
use crate::error::{ScanError, ScanResult};

/// A bidirectional byte stream to the spectrometer.
#[async_trait]
pub trait SensorPort: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drop anything buffered in either direction.
    async fn discard_buffers(&mut self) -> io::Result<()>;
}

#[cfg(feature = "tokio_serial")]
#[async_trait]
impl SensorPort for tokio_serial::SerialStream {
    async fn discard_buffers(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPort;
        self.clear(tokio_serial::ClearBuffer::All)
            .map_err(io::Error::from)
    }
}

/// In-memory transport, used with the simulated sensor.
#[async_trait]
impl SensorPort for DuplexStream {
    async fn discard_buffers(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 256];
        loop {
            // A zero timeout still polls the read once, so this drains only
            // what is already buffered.
            match tokio::time::timeout(Duration::ZERO, self.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}

/// Open the spectrometer serial port: 8N1, no flow control, DTR and RTS
/// asserted.
#[cfg(feature = "tokio_serial")]
pub fn open_serial(config: &SensorConfig) -> ScanResult<tokio_serial::SerialStream> {
    use tokio_serial::{SerialPort, SerialPortBuilderExt};

    let mut port = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(config.timeout())
        .open_native_async()
        .map_err(|e| {
            ScanError::Transport(format!(
                "failed to open serial port '{}' at {} baud: {e}",
                config.port, config.baud_rate
            ))
        })?;

    port.write_data_terminal_ready(true)
        .and_then(|_| port.write_request_to_send(true))
        .map_err(|e| ScanError::Transport(format!("failed to assert DTR/RTS: {e}")))?;

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_duplex_discard_drains_pending_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"stale\r\n").await.unwrap();

        client.discard_buffers().await.unwrap();

        server.write_all(b"fresh").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"fresh");
    }
}
