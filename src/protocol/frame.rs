use serde::{Deserialize, Serialize};

use super::{DecodeError, EncodeError};

pub const START_BYTE: u8 = 0xAA;
pub const END_BYTE: u8 = 0x55;
/// start + command id + two length bytes + checksum + end
pub const MIN_FRAME_LEN: usize = 6;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Command identifiers understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandId {
    GetTemperature = 0x01,
    GetCurrent = 0x02,
    GetPower = 0x03,
}

impl CommandId {
    pub const ALL: [CommandId; 3] = [
        CommandId::GetTemperature,
        CommandId::GetCurrent,
        CommandId::GetPower,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandId::GetTemperature => "get_temperature",
            CommandId::GetCurrent => "get_current",
            CommandId::GetPower => "get_power",
        }
    }
}

impl TryFrom<u8> for CommandId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CommandId::GetTemperature),
            0x02 => Ok(CommandId::GetCurrent),
            0x03 => Ok(CommandId::GetPower),
            other => Err(other),
        }
    }
}

/// A complete, checksum-validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(command_id: u8, payload: impl Into<Vec<u8>>) -> Result<Self, EncodeError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EncodeError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command_id, payload })
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    /// Typed command id, if the firmware defines it
    pub fn command(&self) -> Option<CommandId> {
        CommandId::try_from(self.command_id).ok()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_LEN + self.payload.len()
    }

    pub fn checksum(&self) -> u8 {
        let len = (self.payload.len() as u16).to_le_bytes();
        xor_checksum(&[self.command_id, len[0], len[1]]) ^ xor_checksum(&self.payload)
    }

    /// Serialize to the wire layout
    pub fn to_bytes(&self) -> Vec<u8> {
        write_frame(self.command_id, &self.payload)
    }
}

pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Build a command frame. Fails only for payloads longer than 65535 bytes.
pub fn encode(command_id: u8, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    Ok(write_frame(command_id, payload))
}

fn write_frame(command_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    out.push(START_BYTE);
    out.push(command_id);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let checksum = xor_checksum(&out[1..]);
    out.push(checksum);
    out.push(END_BYTE);
    out
}

/// Candidate frame located in a receive buffer, not yet validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Offset of the start byte within the scanned buffer
    pub offset: usize,
    bytes: &'a [u8],
}

impl<'a> RawFrame<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn command_id(&self) -> u8 {
        self.bytes[1]
    }

    pub fn declared_len(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[4..self.bytes.len() - 2]
    }

    pub fn received_checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 2]
    }

    pub fn calculated_checksum(&self) -> u8 {
        xor_checksum(&self.bytes[1..self.bytes.len() - 2])
    }

    /// Checksum first, then total length against the declared payload length
    pub fn validate(&self) -> Result<Frame, DecodeError> {
        let calculated = self.calculated_checksum();
        let received = self.received_checksum();
        if calculated != received {
            return Err(DecodeError::ChecksumMismatch {
                calculated,
                received,
            });
        }

        let expected = MIN_FRAME_LEN + self.declared_len() as usize;
        if self.bytes.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: self.bytes.len(),
            });
        }

        Ok(Frame {
            command_id: self.command_id(),
            payload: self.payload().to_vec(),
        })
    }
}

/// Find the first candidate frame in `buffer`.
///
/// Returns `None` when there is no start byte, no end byte after it, or the candidate is
/// shorter than a minimal frame; callers should wait for more bytes in that case.
pub fn locate(buffer: &[u8]) -> Option<RawFrame<'_>> {
    let offset = buffer.iter().position(|&b| b == START_BYTE)?;
    let window = &buffer[offset..];

    // Declared length wins when the buffer already holds a terminator at that position;
    // payload bytes are allowed to equal END_BYTE.
    if window.len() >= 4 {
        let declared = u16::from_le_bytes([window[2], window[3]]) as usize;
        let total = MIN_FRAME_LEN + declared;
        if window.len() >= total && window[total - 1] == END_BYTE {
            return Some(RawFrame {
                offset,
                bytes: &window[..total],
            });
        }
    }

    let end = window.iter().skip(1).position(|&b| b == END_BYTE)? + 1;
    if end + 1 < MIN_FRAME_LEN {
        return None;
    }
    Some(RawFrame {
        offset,
        bytes: &window[..=end],
    })
}

/// Decode the first frame in `buffer`.
///
/// `Ok(None)` means no complete candidate yet. A candidate that fails validation is logged
/// and returned as an error so the caller decides whether to retry or fail the command.
pub fn decode(buffer: &[u8]) -> Result<Option<Frame>, DecodeError> {
    let Some(raw) = locate(buffer) else {
        return Ok(None);
    };

    match raw.validate() {
        Ok(frame) => Ok(Some(frame)),
        Err(e) => {
            log::error!(
                "Rejected frame at offset {} ({}): {}",
                raw.offset,
                hex::encode(raw.as_bytes()),
                e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_temperature_request() {
        let bytes = encode(CommandId::GetTemperature.as_u8(), &[]).unwrap();
        assert_eq!(bytes, vec![0xAA, 0x01, 0x00, 0x00, 0x01, 0x55]);
    }

    #[test]
    fn frame_checksum_matches_wire_checksum() {
        let frame = Frame::new(0x02, vec![0x10, 0x27, 0x00, 0x00]).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes[bytes.len() - 2], frame.checksum());
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    #[test]
    fn payload_may_contain_end_byte() {
        let bytes = encode(0x03, &[0x55, 0x55, 0x01]).unwrap();
        let frame = decode(&bytes).unwrap().expect("frame");
        assert_eq!(frame.payload(), &[0x55, 0x55, 0x01]);
    }

    #[test]
    fn skips_leading_noise() {
        let mut buffer = vec![0x00, 0x13, 0x37];
        buffer.extend(encode(0x01, &[0x64, 0x00]).unwrap());
        let frame = decode(&buffer).unwrap().expect("frame");
        assert_eq!(frame.command(), Some(CommandId::GetTemperature));
        assert_eq!(frame.payload(), &[0x64, 0x00]);
    }

    #[test]
    fn partial_frame_is_not_found() {
        let bytes = encode(0x01, &[0x64, 0x00]).unwrap();
        assert_eq!(decode(&bytes[..5]), Ok(None));
        assert_eq!(decode(&[]), Ok(None));
        assert_eq!(decode(&[0x00, 0x55, 0x55]), Ok(None));
    }

    #[test]
    fn reports_length_mismatch() {
        // declared length 5, one payload byte, checksum fixed up so only the length is wrong
        let mut bytes = vec![0xAA, 0x01, 0x05, 0x00, 0x11];
        bytes.push(xor_checksum(&bytes[1..]));
        bytes.push(0x55);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::LengthMismatch {
                expected: 11,
                actual: 7
            })
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode(0x01, &payload),
            Err(EncodeError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn command_id_conversion() {
        assert_eq!(CommandId::try_from(0x02), Ok(CommandId::GetCurrent));
        assert_eq!(CommandId::try_from(0x7F), Err(0x7F));
    }
}
