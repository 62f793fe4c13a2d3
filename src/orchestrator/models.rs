use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{Command, ProcessedResult};
use crate::protocol::DecodeStatus;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Test run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Idle,
    Connecting,
    Probing,
    Dispatching,
    Collecting,
    Completed,
    Failed,
    Cancelled,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestState::Completed | TestState::Failed | TestState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != TestState::Idle
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestState::Idle => "idle",
            TestState::Connecting => "connecting",
            TestState::Probing => "probing",
            TestState::Dispatching => "dispatching",
            TestState::Collecting => "collecting",
            TestState::Completed => "completed",
            TestState::Failed => "failed",
            TestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything recorded about one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: Uuid,
    pub state: TestState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub ping_result: Option<bool>,
    pub commands_total: usize,
    /// Commands that reached a dispatch outcome, answered or not
    pub commands_sent: usize,
    /// Responses that made it through the pipeline
    pub data_received: usize,
    pub errors: Vec<String>,
    /// Completion order
    pub command_results: Vec<ProcessedResult>,
    pub failed_commands: Vec<Command>,
}

impl TestRun {
    pub fn begin(commands_total: usize) -> Self {
        Self {
            commands_total,
            ..Self::default()
        }
    }

    pub fn results_in_command_order(&self) -> Vec<&ProcessedResult> {
        let mut ordered: Vec<&ProcessedResult> = self.command_results.iter().collect();
        ordered.sort_by_key(|result| result.command.seq);
        ordered
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn passed(&self) -> bool {
        self.state == TestState::Completed
            && self.errors.is_empty()
            && self.failed_commands.is_empty()
            && self.command_results.len() == self.commands_total
            && self.command_results.iter().all(ProcessedResult::passed)
    }

    pub fn summary(&self) -> TestSummary {
        let decode_failures = self
            .command_results
            .iter()
            .filter(|r| !matches!(r.decode_status, DecodeStatus::Decoded))
            .count();
        let mismatches = self
            .command_results
            .iter()
            .filter(|r| r.matches_expected == Some(false))
            .count();

        TestSummary {
            id: self.id,
            state: self.state,
            passed: self.passed(),
            total: self.commands_total,
            sent: self.commands_sent,
            received: self.data_received,
            failed: self.failed_commands.len(),
            decode_failures,
            mismatches,
            errors: self.errors.clone(),
            duration_ms: self.duration().map(|d| d.num_milliseconds()),
        }
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TestState::Idle,
            start_time: Utc::now(),
            end_time: None,
            ping_result: None,
            commands_total: 0,
            commands_sent: 0,
            data_received: 0,
            errors: Vec::new(),
            command_results: Vec::new(),
            failed_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    pub id: Uuid,
    pub state: TestState,
    pub passed: bool,
    pub total: usize,
    pub sent: usize,
    pub received: usize,
    pub failed: usize,
    pub decode_failures: usize,
    pub mismatches: usize,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Test {} {} ({})",
            self.id,
            if self.passed { "PASSED" } else { "FAILED" },
            self.state
        )?;
        writeln!(
            f,
            "  commands: {} total, {} sent, {} answered, {} failed",
            self.total, self.sent, self.received, self.failed
        )?;
        writeln!(
            f,
            "  responses: {} decode failures, {} template mismatches",
            self.decode_failures, self.mismatches
        )?;
        if let Some(ms) = self.duration_ms {
            writeln!(f, "  duration: {} ms", ms)?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {}", error)?;
        }
        Ok(())
    }
}

pub type StatusCallback = Arc<dyn Fn(TestState, &str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type CompletionCallback = Arc<dyn Fn(&TestRun) + Send + Sync>;
pub type CommandCallback = Arc<dyn Fn(&Command) + Send + Sync>;
pub type ResultCallback = Arc<dyn Fn(&ProcessedResult) + Send + Sync>;

/// Observers notified while a run progresses. They are invoked on the run's tasks and
/// should return quickly.
#[derive(Clone)]
pub struct TestCallbacks {
    pub on_status: StatusCallback,
    pub on_error: ErrorCallback,
    pub on_complete: CompletionCallback,
    pub on_command: Option<CommandCallback>,
    pub on_result: Option<ResultCallback>,
    pub on_telemetry: Option<TelemetrySink>,
}

impl TestCallbacks {
    pub fn new(
        on_status: impl Fn(TestState, &str) + Send + Sync + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
        on_complete: impl Fn(&TestRun) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_status: Arc::new(on_status),
            on_error: Arc::new(on_error),
            on_complete: Arc::new(on_complete),
            on_command: None,
            on_result: None,
            on_telemetry: None,
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {}, |_| {}, |_| {})
    }

    pub fn with_command_observer(mut self, f: impl Fn(&Command) + Send + Sync + 'static) -> Self {
        self.on_command = Some(Arc::new(f));
        self
    }

    pub fn with_result_observer(
        mut self,
        f: impl Fn(&ProcessedResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }

    pub fn with_telemetry_observer(
        mut self,
        f: impl Fn(TelemetryEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_telemetry = Some(Arc::new(f));
        self
    }
}

impl Default for TestCallbacks {
    fn default() -> Self {
        Self::noop()
    }
}
