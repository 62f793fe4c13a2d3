use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use super::types::*;
use super::{DispatchError, QUEUE_POLL_INTERVAL};
use crate::protocol::{parse_response, ParsedFields};

pub const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Parses raw responses on a bounded worker pool, off the send path.
///
/// Results come out in completion order; sort by `command.seq` for script order.
pub struct ProcessingPipeline {
    workers: usize,
    queue_capacity: usize,
    input_tx: Option<mpsc::Sender<ResponseEnvelope>>,
    results_rx: Option<mpsc::Receiver<ProcessedResult>>,
    running: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl ProcessingPipeline {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            input_tx: None,
            results_rx: None,
            running: Arc::new(AtomicBool::new(false)),
            feeder: None,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) || self.feeder.is_some() {
            return;
        }

        let (input_tx, input_rx) = mpsc::channel(self.queue_capacity);
        let (results_tx, results_rx) = mpsc::channel(self.queue_capacity);
        self.input_tx = Some(input_tx);
        self.results_rx = Some(results_rx);

        self.running.store(true, Ordering::SeqCst);
        self.feeder = Some(tokio::spawn(feed_loop(
            input_rx,
            results_tx,
            self.running.clone(),
            self.workers,
        )));
        log::info!("Processing pipeline started with {} workers", self.workers);
    }

    /// Output queue of the current run. Closes once `stop` has flushed everything.
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<ProcessedResult>> {
        self.results_rx.take()
    }

    /// Sender for producers living on other tasks
    pub fn submitter(&self) -> Option<mpsc::Sender<ResponseEnvelope>> {
        self.input_tx.clone()
    }

    pub async fn submit(&self, envelope: ResponseEnvelope) -> Result<(), DispatchError> {
        let tx = self.input_tx.as_ref().ok_or(DispatchError::NotRunning)?;
        tx.send(envelope).await.map_err(|_| DispatchError::QueueClosed)
    }

    /// Process whatever is already queued, wait for in-flight workers, then close the output
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.input_tx = None;

        if let Some(feeder) = self.feeder.take() {
            if let Err(e) = feeder.await {
                log::error!("Pipeline feeder terminated abnormally: {}", e);
            }
        }
    }
}

async fn feed_loop(
    mut input_rx: mpsc::Receiver<ResponseEnvelope>,
    results_tx: mpsc::Sender<ProcessedResult>,
    running: Arc<AtomicBool>,
    workers: usize,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();

    loop {
        match timeout(QUEUE_POLL_INTERVAL, input_rx.recv()).await {
            Ok(Some(envelope)) => {
                spawn_worker(&mut in_flight, &permits, &results_tx, envelope).await;
            }
            Ok(None) => break,
            Err(_) if running.load(Ordering::SeqCst) => continue,
            Err(_) => break,
        }
    }

    // Flush envelopes accepted before the stop
    input_rx.close();
    while let Some(envelope) = input_rx.recv().await {
        spawn_worker(&mut in_flight, &permits, &results_tx, envelope).await;
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            log::error!("Processing worker panicked: {}", e);
        }
    }
    log::info!("Processing pipeline stopped");
}

async fn spawn_worker(
    in_flight: &mut JoinSet<()>,
    permits: &Arc<Semaphore>,
    results_tx: &mpsc::Sender<ProcessedResult>,
    envelope: ResponseEnvelope,
) {
    let permit = match permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            log::error!(
                "Worker pool closed; dropping response for command #{}",
                envelope.command.seq
            );
            return;
        }
    };

    let tx = results_tx.clone();
    in_flight.spawn(async move {
        let result = process_envelope(envelope);
        if tx.send(result).await.is_err() {
            log::warn!("Result queue closed; dropping processed result");
        }
        drop(permit);
    });
}

/// Turn one raw response into a structured result
pub fn process_envelope(envelope: ResponseEnvelope) -> ProcessedResult {
    let ResponseEnvelope {
        mut command,
        raw_response,
    } = envelope;

    let (parsed_fields, decode_status) = parse_response(&raw_response);
    let matches_expected = command
        .expected_response
        .as_deref()
        .map(|expected| response_matches(expected, &raw_response, &parsed_fields));

    command.advance(CommandStatus::Processed);
    log::info!(
        "Processed command #{} '{}': {:?}",
        command.seq,
        command.description,
        decode_status
    );

    ProcessedResult {
        command,
        raw_response,
        parsed_fields,
        decode_status,
        matches_expected,
        process_time: Utc::now(),
    }
}

/// Script responses match on the echoed command word; anything else must match byte for byte
fn response_matches(expected: &[u8], actual: &[u8], parsed: &ParsedFields) -> bool {
    let (template, _) = parse_response(expected);
    match (template.command_echo, parsed.command_echo) {
        (Some(want), Some(got)) => want == got,
        _ => expected == actual,
    }
}
