use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{read_available, Result, SerialPortSummary, Transport, TransportError};

pub const DEFAULT_BAUD_RATE: u32 = 115200;

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
            stream: None,
        }
    }
}

/// Enumerate serial ports visible to the host
pub fn list_serial_ports() -> Result<Vec<SerialPortSummary>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb_info) => SerialPortSummary {
                port_name: port.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                serial_number: usb_info.serial_number,
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => SerialPortSummary {
                port_name: port.port_name,
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        })
        .collect())
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.port_name, e)))?;

        self.stream = Some(stream);
        log::info!("Opened serial port {} at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            log::info!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        stream.write_all(data).await?;
        stream.flush().await?;

        log::debug!("Serial TX {} bytes: {}", data.len(), hex::encode(data));
        Ok(data.len())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        let data = read_available(stream, timeout).await?;
        if !data.is_empty() {
            log::debug!("Serial RX {} bytes: {}", data.len(), hex::encode(&data));
        }
        Ok(data)
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("serial {}@{}", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_rejects_io() {
        let mut transport =
            SerialTransport::new("/dev/null-port", DEFAULT_BAUD_RATE, Duration::from_millis(10));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.send(&[0xAA]).await,
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            transport.receive(Duration::from_millis(10)).await,
            Err(TransportError::NotOpen)
        ));
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
