//! Periodic telemetry polling alongside the scripted test

pub mod poller;

pub use poller::{poll_once, TelemetryPoller, DEFAULT_POLL_INTERVAL};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{DecodeError, EncodeError, TelemetryKind};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub kind: TelemetryKind,
    pub value: f64,
    pub taken_at: DateTime<Utc>,
}

/// Latest value of every channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub temperature: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub polls: u64,
    pub poll_errors: u64,
}

impl TelemetrySnapshot {
    pub fn apply(&mut self, reading: &TelemetryReading) {
        match reading.kind {
            TelemetryKind::Temperature => self.temperature = Some(reading.value),
            TelemetryKind::Current => self.current = Some(reading.value),
            TelemetryKind::Power => self.power = Some(reading.value),
        }
        self.updated_at = Some(reading.taken_at);
        self.polls += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Reading(TelemetryReading),
    Error { kind: TelemetryKind, message: String },
}

pub type TelemetrySink = Arc<dyn Fn(TelemetryEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("No {0} response within timeout")]
    NoResponse(TelemetryKind),

    #[error("Response frame incomplete")]
    Incomplete,

    #[error("Expected command 0x{expected:02X}, device answered 0x{actual:02X}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}
