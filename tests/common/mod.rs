#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchlink_lib::transport::{self, SharedTransport, Transport, TransportError};

type Responder = Box<dyn Fn(&[u8]) -> Reply + Send>;

/// What the scripted device does with one request
pub enum Reply {
    Bytes(Vec<u8>),
    Silence,
    Fail,
}

/// In-memory device that answers each request through a closure and records every send
pub struct ScriptedTransport {
    responder: Responder,
    pending: Option<Reply>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    open: bool,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&[u8]) -> Reply + Send + 'static,
    ) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            responder: Box::new(responder),
            pending: None,
            sent: sent.clone(),
            open: false,
        };
        (transport, sent)
    }

    /// Opened and wrapped for sharing
    pub async fn shared(
        responder: impl Fn(&[u8]) -> Reply + Send + 'static,
    ) -> (SharedTransport, Arc<Mutex<Vec<Vec<u8>>>>) {
        let (mut transport, sent) = Self::new(responder);
        transport.open().await.expect("open scripted transport");
        (transport::share(Box::new(transport)), sent)
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        self.pending = Some((self.responder)(data));
        Ok(data.len())
    }

    async fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        match self.pending.take() {
            Some(Reply::Bytes(bytes)) => Ok(bytes),
            Some(Reply::Fail) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted failure",
            ))),
            Some(Reply::Silence) | None => Ok(Vec::new()),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Temperature request as the bench sends it
pub const TEMPERATURE_REQUEST: [u8; 6] = [0xAA, 0x01, 0x00, 0x00, 0x01, 0x55];
/// 10.0 °C reply with a valid checksum
pub const TEMPERATURE_REPLY: [u8; 8] = [0xAA, 0x01, 0x02, 0x00, 0x64, 0x00, 0x67, 0x55];
