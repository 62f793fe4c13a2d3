use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Result;
use crate::dispatch::Command;

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
    #[serde(default)]
    description: String,
    hex_data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawScript {
    #[serde(default)]
    commands: Vec<RawEntry>,
    #[serde(default)]
    response_frames: Vec<RawEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptEntry {
    pub description: String,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

/// Ordered command list plus optional response templates, matched by index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandScript {
    pub commands: Vec<ScriptEntry>,
    pub response_frames: Vec<ScriptEntry>,
}

impl CommandScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let script = Self::from_yaml_str(&text)?;
        log::info!(
            "Loaded {} commands and {} response frames from {}",
            script.commands.len(),
            script.response_frames.len(),
            path.display()
        );
        Ok(script)
    }

    /// Entries whose hex does not parse are skipped with a warning
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawScript = serde_yaml::from_str(text)?;
        Ok(Self {
            commands: convert_entries("command", raw.commands),
            response_frames: convert_entries("response frame", raw.response_frames),
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn to_commands(&self) -> Vec<Command> {
        self.commands
            .iter()
            .enumerate()
            .map(|(seq, entry)| {
                let command = Command::new(seq, entry.description.clone(), entry.data.clone());
                match self.response_frames.get(seq) {
                    Some(template) => command.with_expected_response(template.data.clone()),
                    None => command,
                }
            })
            .collect()
    }
}

fn convert_entries(kind: &str, entries: Vec<RawEntry>) -> Vec<ScriptEntry> {
    entries
        .into_iter()
        .filter_map(|entry| match parse_hex(&entry.hex_data) {
            Ok(data) => {
                log::debug!("Loaded {} '{}': {}", kind, entry.description, hex::encode(&data));
                Some(ScriptEntry {
                    description: entry.description,
                    data,
                })
            }
            Err(e) => {
                log::warn!("Skipping {} '{}': {}", kind, entry.description, e);
                None
            }
        })
        .collect()
}

/// Decode a hex string that may contain whitespace between bytes
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    Ok(hex::decode(compact)?)
}
