pub mod manager;
pub mod models;
pub mod probe;

pub use manager::TestOrchestrator;
pub use models::*;
pub use probe::{count_replies, ProbeReport, ReachabilityProbe, SystemPing};

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("Test already running")]
    AlreadyRunning,

    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Reachability probe to {host} failed: {received}/{sent} replies")]
    ProbeFailed { host: String, received: u32, sent: u32 },

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Test cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TestError>;
