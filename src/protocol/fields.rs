use serde::{Deserialize, Serialize};

use super::{CommandId, DecodeError};

/// Raw temperature counts per °C
pub const TEMPERATURE_DIVISOR: f64 = 10.0;
/// Raw current counts per A
pub const CURRENT_DIVISOR: f64 = 1000.0;
/// Raw power counts per W
pub const POWER_DIVISOR: f64 = 1000.0;

/// Telemetry channels the device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Temperature,
    Current,
    Power,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 3] = [
        TelemetryKind::Temperature,
        TelemetryKind::Current,
        TelemetryKind::Power,
    ];

    pub fn command(self) -> CommandId {
        match self {
            TelemetryKind::Temperature => CommandId::GetTemperature,
            TelemetryKind::Current => CommandId::GetCurrent,
            TelemetryKind::Power => CommandId::GetPower,
        }
    }

    pub fn from_command(command: CommandId) -> Self {
        match command {
            CommandId::GetTemperature => TelemetryKind::Temperature,
            CommandId::GetCurrent => TelemetryKind::Current,
            CommandId::GetPower => TelemetryKind::Power,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            TelemetryKind::Temperature => "°C",
            TelemetryKind::Current => "A",
            TelemetryKind::Power => "W",
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<f64, DecodeError> {
        match self {
            TelemetryKind::Temperature => decode_temperature(payload),
            TelemetryKind::Current => decode_current(payload),
            TelemetryKind::Power => decode_power(payload),
        }
    }
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TelemetryKind::Temperature => "temperature",
            TelemetryKind::Current => "current",
            TelemetryKind::Power => "power",
        };
        f.write_str(name)
    }
}

fn leading<const N: usize>(payload: &[u8]) -> Result<[u8; N], DecodeError> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::InsufficientData {
            needed: N,
            available: payload.len(),
        })
}

/// Unsigned 2-byte little-endian tenths of a degree
pub fn decode_temperature(payload: &[u8]) -> Result<f64, DecodeError> {
    let raw = u16::from_le_bytes(leading::<2>(payload)?);
    Ok(raw as f64 / TEMPERATURE_DIVISOR)
}

/// Unsigned 4-byte little-endian milliamps
pub fn decode_current(payload: &[u8]) -> Result<f64, DecodeError> {
    let raw = u32::from_le_bytes(leading::<4>(payload)?);
    Ok(raw as f64 / CURRENT_DIVISOR)
}

/// Unsigned 4-byte little-endian milliwatts
pub fn decode_power(payload: &[u8]) -> Result<f64, DecodeError> {
    let raw = u32::from_le_bytes(leading::<4>(payload)?);
    Ok(raw as f64 / POWER_DIVISOR)
}
