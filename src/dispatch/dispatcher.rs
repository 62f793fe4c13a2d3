use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::types::*;
use super::{DispatchError, QUEUE_POLL_INTERVAL};
use crate::transport::SharedTransport;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub response_timeout: Duration,
    /// Pause after every send attempt, success or not
    pub command_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            command_interval: Duration::from_millis(500),
            queue_capacity: 256,
        }
    }
}

/// Sends queued commands one at a time and waits for each reply before moving on.
///
/// Every attempt produces exactly one [`DispatchOutcome`] on the outcome queue.
pub struct CommandDispatcher {
    transport: SharedTransport,
    settings: DispatchSettings,
    queue_tx: mpsc::Sender<Command>,
    // Held here while idle, moved into the worker while running
    queue_rx: Option<mpsc::Receiver<Command>>,
    outcome_tx: mpsc::Sender<DispatchOutcome>,
    outcome_rx: Option<mpsc::Receiver<DispatchOutcome>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<mpsc::Receiver<Command>>>,
}

impl CommandDispatcher {
    pub fn new(transport: SharedTransport, settings: DispatchSettings) -> Self {
        let capacity = settings.queue_capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel(capacity);
        Self {
            transport,
            settings,
            queue_tx,
            queue_rx: Some(queue_rx),
            outcome_tx,
            outcome_rx: Some(outcome_rx),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Hand out the outcome queue. Only the first call gets it.
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<DispatchOutcome>> {
        self.outcome_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Commands waiting to be sent
    pub fn queued(&self) -> usize {
        self.settings.queue_capacity.max(1) - self.queue_tx.capacity()
    }

    /// Queue a command. Waits for room when the queue is full.
    pub async fn submit(&self, command: Command) -> Result<(), DispatchError> {
        self.queue_tx
            .send(command)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        let Some(queue_rx) = self.queue_rx.take() else {
            log::warn!("Dispatcher queue unavailable; worker still shutting down");
            return;
        };

        self.running.store(true, Ordering::SeqCst);
        self.worker = Some(tokio::spawn(dispatch_loop(
            self.transport.clone(),
            self.settings.clone(),
            queue_rx,
            self.outcome_tx.clone(),
            self.running.clone(),
        )));
    }

    /// Stop the worker after its in-flight exchange and return commands that were never sent
    pub async fn stop(&mut self) -> Vec<Command> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(queue_rx) => self.queue_rx = Some(queue_rx),
                Err(e) => log::error!("Dispatcher worker terminated abnormally: {}", e),
            }
        }

        let mut abandoned = Vec::new();
        if let Some(queue_rx) = self.queue_rx.as_mut() {
            while let Ok(command) = queue_rx.try_recv() {
                abandoned.push(command);
            }
        }
        if !abandoned.is_empty() {
            log::warn!("Dispatcher stopped with {} queued commands abandoned", abandoned.len());
        }
        abandoned
    }
}

async fn dispatch_loop(
    transport: SharedTransport,
    settings: DispatchSettings,
    mut queue_rx: mpsc::Receiver<Command>,
    outcome_tx: mpsc::Sender<DispatchOutcome>,
    running: Arc<AtomicBool>,
) -> mpsc::Receiver<Command> {
    log::info!("Command dispatcher started");

    while running.load(Ordering::SeqCst) {
        let command = match timeout(QUEUE_POLL_INTERVAL, queue_rx.recv()).await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(_) => continue,
        };

        let outcome = dispatch_one(&transport, command, settings.response_timeout).await;
        if outcome_tx.send(outcome).await.is_err() {
            log::warn!("Dispatch outcome receiver dropped");
        }

        tokio::time::sleep(settings.command_interval).await;
    }

    log::info!("Command dispatcher stopped");
    queue_rx
}

async fn dispatch_one(
    transport: &SharedTransport,
    mut command: Command,
    response_timeout: Duration,
) -> DispatchOutcome {
    command.advance(CommandStatus::Sending);
    log::info!(
        "Sending command #{} '{}': {}",
        command.seq,
        command.description,
        hex::encode(&command.payload)
    );

    let received = {
        let mut guard = transport.lock().await;
        match guard.send(&command.payload).await {
            Ok(_) => {
                command.mark_sent();
                guard.receive(response_timeout).await
            }
            Err(e) => Err(e),
        }
    };

    match received {
        Ok(bytes) if bytes.is_empty() => {
            log::warn!(
                "Command #{} '{}' got no response within {:?}",
                command.seq,
                command.description,
                response_timeout
            );
            command.fail(CommandFailure::NoResponse);
            DispatchOutcome::Failed(command)
        }
        Ok(bytes) => {
            log::info!(
                "Command #{} received {} bytes: {}",
                command.seq,
                bytes.len(),
                hex::encode(&bytes)
            );
            command.mark_success(bytes.clone());
            DispatchOutcome::Response(ResponseEnvelope {
                command,
                raw_response: bytes,
            })
        }
        Err(e) => {
            log::error!("Command #{} '{}' failed: {}", command.seq, command.description, e);
            command.fail(CommandFailure::TransportIo(e.to_string()));
            DispatchOutcome::Failed(command)
        }
    }
}
