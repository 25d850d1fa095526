//! USB serial (CDC) transport.
//!
//! The controller enumerates as a USB CDC device with a fixed product id.
//! [`discover_candidates`] scans the host's serial ports for that id so a
//! board can be found without knowing its COM port up front; when several
//! boards are attached the caller disambiguates by querying each candidate's
//! serial number (see [`crate::board::Labphox::open_usb`]).

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::error::{Result, SwitchError};
use crate::transport::{Transport, TransportKind};

/// USB product id the controller enumerates with.
pub const LABPHOX_USB_PID: u16 = 1812;

/// Baud rate is nominal only; the CDC link ignores it.
const BAUD_RATE: u32 = 115_200;

const READ_BUF_SIZE: usize = 256;

pub struct SerialTransport {
    stream: SerialStream,
    port_name: String,
}

impl SerialTransport {
    /// Open the given serial port.
    pub fn open(port_name: &str) -> Result<Self> {
        let stream = tokio_serial::new(port_name, BAUD_RATE).open_native_async()?;
        log::debug!("serial port '{}' opened", port_name);
        Ok(Self {
            stream,
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// List serial ports whose USB product id matches the controller's.
pub fn discover_candidates() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|e| SwitchError::Serial(e.to_string()))?;
    let mut candidates = Vec::new();
    for info in ports {
        if let SerialPortType::UsbPort(usb) = &info.port_type {
            if usb.pid == LABPHOX_USB_PID {
                candidates.push(info.port_name.clone());
            }
        }
    }
    Ok(candidates)
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(SwitchError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial port closed",
            )));
        }
        Ok(buf[..n].to_vec())
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.stream
            .clear(ClearBuffer::Input)
            .map_err(SwitchError::from)
    }
}
