use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{DecodeStatus, ParsedFields};

/// Command lifecycle. Variants are declared in lifecycle order; a command only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sending,
    Sent,
    Success,
    Received,
    Processed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Processed | CommandStatus::Failed)
    }

    pub fn can_advance_to(self, next: CommandStatus) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, CommandStatus::Failed) => true,
            (current, next) => next > current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CommandFailure {
    #[error("no response within timeout")]
    NoResponse,

    #[error("transport error: {0}")]
    TransportIo(String),

    #[error("abandoned before dispatch")]
    Abandoned,
}

/// One scripted command and everything learned about it while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Zero-based position in the script
    pub seq: usize,
    pub description: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    status: CommandStatus,
    pub send_time: Option<DateTime<Utc>>,
    pub response_time: Option<DateTime<Utc>>,
    #[serde(default, with = "hex_option")]
    response: Option<Vec<u8>>,
    #[serde(default, with = "hex_option")]
    pub expected_response: Option<Vec<u8>>,
    pub failure: Option<CommandFailure>,
}

impl Command {
    pub fn new(seq: usize, description: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            seq,
            description: description.into(),
            payload,
            status: CommandStatus::Pending,
            send_time: None,
            response_time: None,
            response: None,
            expected_response: None,
            failure: None,
        }
    }

    pub fn with_expected_response(mut self, expected: Vec<u8>) -> Self {
        self.expected_response = Some(expected);
        self
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn response_bytes(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    /// Move to `next` if that is forward in the lifecycle. Returns whether the status changed.
    pub fn advance(&mut self, next: CommandStatus) -> bool {
        if !self.status.can_advance_to(next) {
            log::debug!(
                "Command #{} ignoring status change {:?} -> {:?}",
                self.seq,
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn mark_sent(&mut self) {
        if self.advance(CommandStatus::Sent) {
            self.send_time = Some(Utc::now());
        }
    }

    pub fn mark_success(&mut self, response: Vec<u8>) {
        if self.advance(CommandStatus::Success) {
            self.response_time = Some(Utc::now());
            self.response = Some(response);
        }
    }

    pub fn fail(&mut self, failure: CommandFailure) {
        if self.advance(CommandStatus::Failed) {
            self.failure = Some(failure);
        }
    }

    pub fn round_trip(&self) -> Option<chrono::Duration> {
        Some(self.response_time? - self.send_time?)
    }
}

/// A command that got bytes back, on its way to the processing pipeline
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub command: Command,
    pub raw_response: Vec<u8>,
}

/// What the dispatcher learned about one command
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Response(ResponseEnvelope),
    Failed(Command),
}

impl DispatchOutcome {
    pub fn command(&self) -> &Command {
        match self {
            DispatchOutcome::Response(envelope) => &envelope.command,
            DispatchOutcome::Failed(command) => command,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub command: Command,
    #[serde(with = "hex::serde")]
    pub raw_response: Vec<u8>,
    pub parsed_fields: ParsedFields,
    pub decode_status: DecodeStatus,
    /// `None` when the script carried no response template for this command
    pub matches_expected: Option<bool>,
    pub process_time: DateTime<Utc>,
}

impl ProcessedResult {
    pub fn passed(&self) -> bool {
        self.decode_status.is_ok() && self.matches_expected != Some(false)
    }
}

mod hex_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut command = Command::new(0, "probe", vec![0xAA]);
        assert!(command.advance(CommandStatus::Sending));
        command.mark_sent();
        assert!(command.send_time.is_some());
        assert!(!command.advance(CommandStatus::Sending));
        command.mark_success(vec![0x01]);
        assert_eq!(command.status(), CommandStatus::Success);
        assert!(command.advance(CommandStatus::Received));
        assert!(command.advance(CommandStatus::Processed));
        assert!(!command.advance(CommandStatus::Failed));
        assert!(command.round_trip().is_some());
    }

    #[test]
    fn failure_is_terminal() {
        let mut command = Command::new(3, "lost", vec![0xAA]);
        command.advance(CommandStatus::Sending);
        command.mark_sent();
        command.fail(CommandFailure::NoResponse);
        assert_eq!(command.status(), CommandStatus::Failed);
        assert_eq!(command.failure, Some(CommandFailure::NoResponse));

        command.mark_success(vec![0x01]);
        assert_eq!(command.status(), CommandStatus::Failed);
        assert!(command.response_bytes().is_none());
    }

    #[test]
    fn command_serializes_bytes_as_hex() {
        let command = Command::new(1, "temp", vec![0xAA, 0x01, 0x00, 0x00, 0x01, 0x55])
            .with_expected_response(vec![0x0D, 0xEE]);
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["payload"], "aa0100000155");
        assert_eq!(json["expected_response"], "0dee");
        assert_eq!(json["status"], "pending");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back.expected_response, Some(vec![0x0D, 0xEE]));
    }
}
