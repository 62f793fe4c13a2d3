//! Binary wire protocol spoken by the device under test.
//!
//! Outgoing commands use the native frame layout
//! `[0xAA][cmd_id][len_lo][len_hi][payload..][xor][0x55]`; responses come back either in the
//! same layout or in the script framing `[AA 55 55 AA][header:2][len:2 BE][frame_id:4][payload]`.

pub mod fields;
pub mod frame;
pub mod response;

pub use fields::{decode_current, decode_power, decode_temperature, TelemetryKind};
pub use frame::{
    decode, encode, locate, xor_checksum, CommandId, Frame, RawFrame, END_BYTE, MAX_PAYLOAD_LEN,
    MIN_FRAME_LEN, START_BYTE,
};
pub use response::{parse_response, DecodeStatus, ParsedFields, SCRIPT_HEADER_LEN, SCRIPT_MAGIC};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Checksum mismatch: calculated 0x{calculated:02X}, received 0x{received:02X}")]
    ChecksumMismatch { calculated: u8, received: u8 },

    #[error("Insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Payload too large: {0} bytes (max {max})", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),
}
