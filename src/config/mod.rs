pub mod script;
pub mod settings;

pub use script::{parse_hex, CommandScript, ScriptEntry};
pub use settings::{
    BenchConfig, CommunicationConfig, CommunicationKind, NetworkSettings, SerialSettings,
    TelemetrySettings, TestSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
