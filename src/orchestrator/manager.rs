use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::probe::{ProbeReport, ReachabilityProbe, SystemPing};
use super::{CommandCallback, ResultCallback, Result, TestCallbacks, TestError, TestRun, TestState};
use crate::config::{BenchConfig, CommandScript};
use crate::dispatch::{
    Command, CommandDispatcher, CommandFailure, CommandStatus, DispatchError, DispatchOutcome,
    ProcessedResult, ProcessingPipeline, ResponseEnvelope, QUEUE_POLL_INTERVAL,
};
use crate::telemetry::TelemetryPoller;
use crate::transport::{self, SharedTransport};

/// Runs scripted tests against one device.
///
/// Owns the transport for the duration of a run and is the only component that opens or
/// closes it.
pub struct TestOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: BenchConfig,
    commands: Vec<Command>,
    probe: Arc<dyn ReachabilityProbe>,
    running: AtomicBool,
    state: watch::Sender<TestState>,
    run: RwLock<TestRun>,
    session: Mutex<Option<RunSession>>,
}

/// Background task of one run plus the flag that keeps its loops going
struct RunSession {
    task_handle: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

/// Everything a run starts, so teardown can stop it in order
#[derive(Default)]
struct RunResources {
    transport: Option<SharedTransport>,
    poller: Option<TelemetryPoller>,
    dispatcher: Option<CommandDispatcher>,
    pipeline: Option<ProcessingPipeline>,
    forwarder: Option<JoinHandle<Forwarded>>,
    outcomes: Option<mpsc::Receiver<DispatchOutcome>>,
    collector: Option<JoinHandle<()>>,
    on_command: Option<CommandCallback>,
}

/// How the forward loop ended, plus the outcome queue so later outcomes can still be recorded
struct Forwarded {
    completed: bool,
    outcomes: mpsc::Receiver<DispatchOutcome>,
}

impl TestOrchestrator {
    pub fn new(config: BenchConfig, commands: Vec<Command>) -> Self {
        Self::with_probe(config, commands, Arc::new(SystemPing))
    }

    pub fn from_script(config: BenchConfig, script: &CommandScript) -> Self {
        Self::new(config, script.to_commands())
    }

    pub fn with_probe(
        config: BenchConfig,
        commands: Vec<Command>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                commands,
                probe,
                running: AtomicBool::new(false),
                state: watch::channel(TestState::Idle).0,
                run: RwLock::new(TestRun::default()),
                session: Mutex::new(None),
            }),
        }
    }

    /// Begin a run in the background. Progress is reported through `callbacks`.
    pub async fn start_test(&self, callbacks: TestCallbacks) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::warn!("start_test called while a test is already running");
            return Err(TestError::AlreadyRunning);
        }

        let mut session = self.inner.session.lock().await;
        if let Some(previous) = session.take() {
            // The running flag is cleared only after a run has fully torn down
            let _ = previous.task_handle.await;
        }

        *self.inner.run.write().await = TestRun::begin(self.inner.commands.len());
        self.inner.state.send_replace(TestState::Connecting);
        log::info!("Starting test with {} commands", self.inner.commands.len());

        let active = Arc::new(AtomicBool::new(true));
        let inner = self.inner.clone();
        let run_active = active.clone();
        let task_handle = tokio::spawn(async move { inner.run_test(run_active, callbacks).await });
        *session = Some(RunSession {
            task_handle,
            active,
        });
        Ok(())
    }

    /// Interrupt the current run and wait for its teardown. Does nothing when no run is active.
    pub async fn stop_test(&self) {
        let session = self.inner.session.lock().await.take();
        let Some(session) = session else {
            return;
        };

        if session.active.swap(false, Ordering::SeqCst) {
            log::info!("Stopping test run");
        }
        if let Err(e) = session.task_handle.await {
            log::error!("Test task terminated abnormally: {}", e);
        }
    }

    /// Wait until the current run reaches a final state and return its results
    pub async fn wait_for_completion(&self) -> TestRun {
        let mut state_rx = self.inner.state.subscribe();
        // The sender lives as long as the orchestrator, so this only ends on a final state
        let _ = state_rx.wait_for(|state| !state.is_active()).await;
        self.get_test_results().await
    }

    /// Snapshot of the current or most recent run
    pub async fn get_test_results(&self) -> TestRun {
        self.inner.run.read().await.clone()
    }

    pub async fn state(&self) -> TestState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TestState> {
        self.inner.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

fn ensure_active(active: &AtomicBool) -> Result<()> {
    if active.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(TestError::Cancelled)
    }
}

impl OrchestratorInner {
    async fn enter(&self, state: TestState, callbacks: &TestCallbacks, message: &str) {
        self.run.write().await.state = state;
        self.state.send_replace(state);
        log::info!("Test state -> {}: {}", state, message);
        (callbacks.on_status)(state, message);
    }

    async fn run_test(self: Arc<Self>, active: Arc<AtomicBool>, callbacks: TestCallbacks) {
        let mut resources = RunResources::default();
        let outcome = self.execute(&active, &callbacks, &mut resources).await;

        let final_state = match &outcome {
            Ok(()) => TestState::Completed,
            Err(TestError::Cancelled) => TestState::Cancelled,
            Err(_) => TestState::Failed,
        };

        if let Err(e) = &outcome {
            let message = format!("Test {}: {}", final_state, e);
            match e {
                TestError::Cancelled => log::info!("{}", message),
                _ => log::error!("{}", message),
            }
            self.run.write().await.errors.push(e.to_string());
            (callbacks.on_error)(&message);
        }

        active.store(false, Ordering::SeqCst);
        resources.teardown(&self).await;

        let snapshot = {
            let mut run = self.run.write().await;
            run.end_time = Some(Utc::now());
            run.state = final_state;
            run.clone()
        };
        self.state.send_replace(final_state);

        let message = match final_state {
            TestState::Completed => format!(
                "Test completed: {}/{} commands answered",
                snapshot.data_received, snapshot.commands_total
            ),
            TestState::Cancelled => "Test cancelled".to_string(),
            _ => "Test failed".to_string(),
        };
        log::info!("{}", message);
        (callbacks.on_status)(final_state, &message);
        (callbacks.on_complete)(&snapshot);
        self.running.store(false, Ordering::SeqCst);
    }

    async fn execute(
        self: &Arc<Self>,
        active: &Arc<AtomicBool>,
        callbacks: &TestCallbacks,
        res: &mut RunResources,
    ) -> Result<()> {
        self.enter(TestState::Connecting, callbacks, "Establishing communication link")
            .await;
        self.config.validate()?;
        let endpoint = self.config.communication.endpoint()?;
        let dispatch_settings = self.config.dispatch_settings()?;

        let mut link = endpoint.build();
        log::info!("Connecting to {}", endpoint);
        link.open().await?;
        let link = transport::share(link);
        res.transport = Some(link.clone());

        if self.config.telemetry.enabled {
            let mut poller = TelemetryPoller::new(
                link.clone(),
                self.config.poll_interval(),
                dispatch_settings.response_timeout,
            );
            if let Some(sink) = &callbacks.on_telemetry {
                poller = poller.with_sink(sink.clone());
            }
            poller.start();
            res.poller = Some(poller);
        }
        ensure_active(active)?;

        if let (Some(host), true) = (endpoint.host(), self.config.test.probe_enabled) {
            self.enter(TestState::Probing, callbacks, "Checking device reachability")
                .await;
            self.probe_host(host).await?;
            ensure_active(active)?;
        }

        self.enter(TestState::Dispatching, callbacks, "Dispatching test commands")
            .await;
        let total = self.commands.len();
        if total == 0 {
            log::warn!("No test commands loaded");
        }

        let mut dispatcher = CommandDispatcher::new(link.clone(), dispatch_settings.clone());
        let outcomes = dispatcher.take_outcomes().ok_or(DispatchError::OutputTaken)?;
        let mut pipeline = ProcessingPipeline::new(self.config.test.pipeline_workers)
            .with_queue_capacity(dispatch_settings.queue_capacity);
        pipeline.start();
        let results = pipeline.take_results().ok_or(DispatchError::OutputTaken)?;
        let submitter = pipeline.submitter().ok_or(DispatchError::NotRunning)?;
        dispatcher.start();

        res.collector = Some(tokio::spawn(collect_loop(
            self.clone(),
            results,
            callbacks.on_result.clone(),
        )));
        res.forwarder = Some(tokio::spawn(forward_loop(
            self.clone(),
            active.clone(),
            outcomes,
            submitter,
            total,
            callbacks.on_command.clone(),
        )));
        res.pipeline = Some(pipeline);
        res.on_command = callbacks.on_command.clone();
        let dispatcher = res.dispatcher.insert(dispatcher);

        for mut command in self.commands.iter().cloned() {
            if !active.load(Ordering::SeqCst) {
                log::info!("Test stopped; no further commands queued");
                break;
            }
            command.advance(CommandStatus::Sending);
            if let Some(observer) = &callbacks.on_command {
                observer(&command);
            }
            log::info!("Queued command {}/{}: {}", command.seq + 1, total, command.description);
            dispatcher.submit(command).await?;
        }

        let completed = match res.forwarder.take() {
            Some(forwarder) => match forwarder.await {
                Ok(forwarded) => {
                    res.outcomes = Some(forwarded.outcomes);
                    forwarded.completed
                }
                Err(e) => {
                    log::error!("Forwarding task terminated abnormally: {}", e);
                    false
                }
            },
            None => false,
        };
        if !completed {
            ensure_active(active)?;
            return Err(TestError::Dispatch(DispatchError::QueueClosed));
        }

        self.enter(TestState::Collecting, callbacks, "Collecting processed results")
            .await;
        if let Some(mut dispatcher) = res.dispatcher.take() {
            dispatcher.stop().await;
        }
        if let Some(mut pipeline) = res.pipeline.take() {
            pipeline.stop().await;
        }
        if let Some(collector) = res.collector.take() {
            if let Err(e) = collector.await {
                log::error!("Result collector terminated abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Count one dispatcher outcome and route it: responses to the pipeline, failures into the
    /// run. Returns false when a response could not be handed to the pipeline.
    async fn record_outcome(
        &self,
        outcome: DispatchOutcome,
        pipeline: Option<&mpsc::Sender<ResponseEnvelope>>,
        on_command: Option<&CommandCallback>,
    ) -> bool {
        self.run.write().await.commands_sent += 1;

        match outcome {
            DispatchOutcome::Response(mut envelope) => {
                envelope.command.advance(CommandStatus::Received);
                if let Some(observer) = on_command {
                    observer(&envelope.command);
                }
                let Some(pipeline) = pipeline else {
                    log::error!("No pipeline for response to command #{}", envelope.command.seq);
                    return false;
                };
                if let Err(e) = pipeline.send(envelope).await {
                    log::error!("Processing pipeline input closed");
                    let mut command = e.0.command;
                    command.fail(CommandFailure::Abandoned);
                    self.run.write().await.failed_commands.push(command);
                    return false;
                }
                true
            }
            DispatchOutcome::Failed(command) => {
                if let Some(observer) = on_command {
                    observer(&command);
                }
                self.run.write().await.failed_commands.push(command);
                true
            }
        }
    }

    async fn probe_host(&self, host: &str) -> Result<()> {
        let count = self.config.test.ping_count;
        let report = match self.probe.probe(host, count, self.config.ping_timeout()?).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Reachability probe of {} failed to run: {}", host, e);
                ProbeReport {
                    sent: count,
                    received: 0,
                }
            }
        };

        let reachable = report.passed();
        self.run.write().await.ping_result = Some(reachable);
        if !reachable {
            return Err(TestError::ProbeFailed {
                host: host.to_string(),
                received: report.received,
                sent: report.sent,
            });
        }
        log::info!("Device {} reachable ({}/{})", host, report.received, report.sent);
        Ok(())
    }
}

impl RunResources {
    /// Stop everything still alive, in dependency order. Never fails.
    async fn teardown(&mut self, inner: &OrchestratorInner) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop().await;
        }

        // Waits for an in-flight exchange, whose outcome lands on the outcome queue
        if let Some(mut dispatcher) = self.dispatcher.take() {
            let abandoned = dispatcher.stop().await;
            if !abandoned.is_empty() {
                let mut run = inner.run.write().await;
                for mut command in abandoned {
                    command.fail(CommandFailure::Abandoned);
                    run.failed_commands.push(command);
                }
            }
        }

        if let Some(forwarder) = self.forwarder.take() {
            match forwarder.await {
                Ok(forwarded) => self.outcomes = Some(forwarded.outcomes),
                Err(e) => log::error!("Forwarding task terminated abnormally: {}", e),
            }
        }

        if let Some(mut outcomes) = self.outcomes.take() {
            let submitter = self.pipeline.as_ref().and_then(ProcessingPipeline::submitter);
            let mut late = 0;
            while let Ok(outcome) = outcomes.try_recv() {
                late += 1;
                inner
                    .record_outcome(outcome, submitter.as_ref(), self.on_command.as_ref())
                    .await;
            }
            if late > 0 {
                log::info!("Recorded {} outcomes that arrived after the stop", late);
            }
        }

        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop().await;
        }

        if let Some(collector) = self.collector.take() {
            if let Err(e) = collector.await {
                log::error!("Result collector terminated abnormally: {}", e);
            }
        }

        if let Some(link) = self.transport.take() {
            let mut guard = link.lock().await;
            if let Err(e) = guard.close().await {
                log::warn!("Failed to close {}: {}", guard.describe(), e);
            }
        }
    }
}

/// Dispatcher outcomes -> pipeline input, failures straight into the run.
/// `completed` is set once `expected` outcomes have been seen.
async fn forward_loop(
    inner: Arc<OrchestratorInner>,
    active: Arc<AtomicBool>,
    mut outcomes: mpsc::Receiver<DispatchOutcome>,
    pipeline: mpsc::Sender<ResponseEnvelope>,
    expected: usize,
    on_command: Option<CommandCallback>,
) -> Forwarded {
    let mut seen = 0;

    while seen < expected {
        if !active.load(Ordering::SeqCst) {
            log::info!("Forwarding interrupted after {}/{} outcomes", seen, expected);
            return Forwarded {
                completed: false,
                outcomes,
            };
        }

        let outcome = match timeout(QUEUE_POLL_INTERVAL, outcomes.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                log::warn!("Dispatcher outcome queue closed");
                return Forwarded {
                    completed: false,
                    outcomes,
                };
            }
            Err(_) => continue,
        };
        seen += 1;

        if !inner
            .record_outcome(outcome, Some(&pipeline), on_command.as_ref())
            .await
        {
            return Forwarded {
                completed: false,
                outcomes,
            };
        }
    }

    Forwarded {
        completed: true,
        outcomes,
    }
}

/// Pipeline results -> run. Ends when the pipeline closes its output.
async fn collect_loop(
    inner: Arc<OrchestratorInner>,
    mut results: mpsc::Receiver<ProcessedResult>,
    on_result: Option<ResultCallback>,
) {
    while let Some(result) = results.recv().await {
        {
            let mut run = inner.run.write().await;
            run.data_received += 1;
            run.command_results.push(result.clone());
        }
        if let Some(observer) = &on_result {
            observer(&result);
        }
    }
    log::debug!("Result collection finished");
}
