//! Command dispatch and response processing

pub mod dispatcher;
pub mod pipeline;
pub mod types;

pub use dispatcher::{CommandDispatcher, DispatchSettings};
pub use pipeline::{process_envelope, ProcessingPipeline, DEFAULT_WORKERS};
pub use types::*;

use std::time::Duration;

/// How long queue consumers block before re-checking their running flag
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Queue closed")]
    QueueClosed,

    #[error("Output queue already taken")]
    OutputTaken,

    #[error("Not running")]
    NotRunning,
}
