use serde::{Deserialize, Serialize};

use super::frame::{self, CommandId};
use super::{DecodeError, TelemetryKind};

/// Leading magic of the script response framing
pub const SCRIPT_MAGIC: [u8; 4] = [0xAA, 0x55, 0x55, 0xAA];
/// magic + header + length + frame id
pub const SCRIPT_HEADER_LEN: usize = 12;
pub const STATUS_OK: u16 = 0x0000;

/// Fields extracted from a raw device response. Byte fields are lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_echo: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
}

impl ParsedFields {
    pub fn telemetry(&self, kind: TelemetryKind) -> Option<f64> {
        match kind {
            TelemetryKind::Temperature => self.temperature,
            TelemetryKind::Current => self.current,
            TelemetryKind::Power => self.power,
        }
    }

    fn set_telemetry(&mut self, kind: TelemetryKind, value: f64) {
        match kind {
            TelemetryKind::Temperature => self.temperature = Some(value),
            TelemetryKind::Current => self.current = Some(value),
            TelemetryKind::Power => self.power = Some(value),
        }
    }
}

/// Outcome of parsing a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeStatus {
    Decoded,
    /// Script framing carried a non-zero status word
    DeviceRejected { status_code: u16 },
    Malformed { reason: String },
    /// No frame could be located in the bytes received
    Incomplete,
}

impl DecodeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DecodeStatus::Decoded)
    }
}

/// Parse a raw response in whichever framing it uses.
///
/// Never fails: whatever could be extracted is returned alongside a status describing how far
/// parsing got.
pub fn parse_response(raw: &[u8]) -> (ParsedFields, DecodeStatus) {
    if raw.starts_with(&SCRIPT_MAGIC) {
        parse_script(raw)
    } else {
        parse_native(raw)
    }
}

fn parse_script(raw: &[u8]) -> (ParsedFields, DecodeStatus) {
    let mut fields = ParsedFields::default();

    if raw.len() >= 6 {
        fields.header = Some(hex::encode(&raw[4..6]));
    }
    if raw.len() >= 8 {
        fields.length = Some(u16::from_be_bytes([raw[6], raw[7]]));
    }
    if raw.len() < SCRIPT_HEADER_LEN {
        let err = DecodeError::InsufficientData {
            needed: SCRIPT_HEADER_LEN,
            available: raw.len(),
        };
        return (fields, malformed(err));
    }
    fields.frame_id = Some(hex::encode(&raw[8..12]));

    let declared = fields.length.unwrap_or_default() as usize;
    let available = raw.len() - SCRIPT_HEADER_LEN;
    let payload = &raw[SCRIPT_HEADER_LEN..SCRIPT_HEADER_LEN + declared.min(available)];
    fields.data = Some(hex::encode(payload));
    if payload.len() >= 2 {
        fields.status_code = Some(u16::from_be_bytes([payload[0], payload[1]]));
    }
    if payload.len() >= 4 {
        fields.command_echo = Some(u16::from_be_bytes([payload[2], payload[3]]));
    }

    if available < declared {
        let err = DecodeError::InsufficientData {
            needed: SCRIPT_HEADER_LEN + declared,
            available: raw.len(),
        };
        return (fields, malformed(err));
    }

    let status = match fields.status_code {
        Some(code) if code != STATUS_OK => DecodeStatus::DeviceRejected { status_code: code },
        _ => DecodeStatus::Decoded,
    };
    (fields, status)
}

fn parse_native(raw: &[u8]) -> (ParsedFields, DecodeStatus) {
    let mut fields = ParsedFields::default();
    let Some(candidate) = frame::locate(raw) else {
        return (fields, DecodeStatus::Incomplete);
    };

    fields.command_id = Some(candidate.command_id());
    fields.length = Some(candidate.declared_len());
    fields.data = Some(hex::encode(candidate.payload()));

    let validation = candidate.validate();

    // Telemetry is extracted from the candidate payload even when validation fails.
    let mut field_error = None;
    if let Ok(command) = CommandId::try_from(candidate.command_id()) {
        let kind = TelemetryKind::from_command(command);
        match kind.decode(candidate.payload()) {
            Ok(value) => fields.set_telemetry(kind, value),
            Err(e) => field_error = Some(e),
        }
    }

    match (validation, field_error) {
        (Err(e), _) => {
            log::warn!("Response frame failed validation: {}", e);
            (fields, malformed(e))
        }
        (Ok(_), Some(e)) => (fields, malformed(e)),
        (Ok(_), None) => (fields, DecodeStatus::Decoded),
    }
}

fn malformed(err: DecodeError) -> DecodeStatus {
    DecodeStatus::Malformed {
        reason: err.to_string(),
    }
}
