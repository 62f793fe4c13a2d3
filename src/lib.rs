pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use config::{BenchConfig, CommandScript};
pub use orchestrator::{TestCallbacks, TestError, TestOrchestrator, TestRun, TestState};
