pub mod network;
pub mod serial;

pub use network::NetworkTransport;
pub use serial::{list_serial_ports, SerialTransport};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

/// Largest single read performed by `receive`
pub const MAX_READ_SIZE: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortSummary {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Byte channel to the device under test.
///
/// `receive` hands back whatever arrived within the timeout (possibly a partial frame) and an
/// empty buffer when nothing did; framing is left to the protocol layer.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<()>;

    /// Safe to call on a closed transport
    async fn close(&mut self) -> Result<()>;

    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    fn is_open(&self) -> bool;

    fn describe(&self) -> String;
}

/// Lock handle leased to every component that talks to the device. Holding the lock across a
/// send/receive pair keeps request/response exchanges from interleaving.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub fn share(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// One request/response exchange under the transport lock
pub async fn exchange(
    transport: &SharedTransport,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut guard = transport.lock().await;
    guard.send(request).await?;
    guard.receive(timeout).await
}

/// Where the device lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial {
        port: String,
        baud_rate: u32,
        timeout: Duration,
    },
    Network {
        host: String,
        port: u16,
        connect_timeout: Duration,
    },
}

impl Endpoint {
    pub fn is_network(&self) -> bool {
        matches!(self, Endpoint::Network { .. })
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Network { host, .. } => Some(host),
            Endpoint::Serial { .. } => None,
        }
    }

    /// Build a closed transport for this endpoint
    pub fn build(&self) -> Box<dyn Transport> {
        match self {
            Endpoint::Serial {
                port,
                baud_rate,
                timeout,
            } => Box::new(SerialTransport::new(port.clone(), *baud_rate, *timeout)),
            Endpoint::Network {
                host,
                port,
                connect_timeout,
            } => Box::new(NetworkTransport::new(host.clone(), *port, *connect_timeout)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial {
                port, baud_rate, ..
            } => write!(f, "serial {}@{}", port, baud_rate),
            Endpoint::Network { host, port, .. } => write!(f, "tcp {}:{}", host, port),
        }
    }
}

pub(crate) async fn read_available<R>(reader: &mut R, timeout: Duration) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; MAX_READ_SIZE];
    match tokio::time::timeout(timeout, reader.read(&mut buffer)).await {
        Err(_) => Ok(Vec::new()),
        Ok(Ok(0)) => Err(TransportError::ConnectionClosed),
        Ok(Ok(n)) => Ok(buffer[..n].to_vec()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
        Ok(Err(e)) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_and_host() {
        let network = Endpoint::Network {
            host: "10.0.0.2".into(),
            port: 5000,
            connect_timeout: Duration::from_secs(5),
        };
        assert_eq!(network.to_string(), "tcp 10.0.0.2:5000");
        assert_eq!(network.host(), Some("10.0.0.2"));
        assert!(network.is_network());

        let serial = Endpoint::Serial {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115200,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(serial.to_string(), "serial /dev/ttyUSB0@115200");
        assert_eq!(serial.host(), None);
    }

    #[tokio::test]
    async fn read_available_times_out_empty() {
        let (mut client, _server) = tokio::io::duplex(64);
        let data = read_available(&mut client, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn read_available_reports_closed_peer() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let err = read_available(&mut client, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
