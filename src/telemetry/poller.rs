use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use super::{PollError, TelemetryEvent, TelemetryReading, TelemetrySink, TelemetrySnapshot};
use crate::protocol::{self, TelemetryKind};
use crate::transport::{self, SharedTransport};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Asks the device for temperature, current and power on a fixed interval
pub struct TelemetryPoller {
    transport: SharedTransport,
    interval: Duration,
    response_timeout: Duration,
    sink: Option<TelemetrySink>,
    snapshot_tx: Arc<watch::Sender<TelemetrySnapshot>>,
    snapshot_rx: watch::Receiver<TelemetrySnapshot>,
    session: Option<PollingSession>,
}

struct PollingSession {
    task_handle: JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

impl TelemetryPoller {
    pub fn new(transport: SharedTransport, interval: Duration, response_timeout: Duration) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(TelemetrySnapshot::default());
        Self {
            transport,
            interval,
            response_timeout,
            sink: None,
            snapshot_tx: Arc::new(snapshot_tx),
            snapshot_rx,
            session: None,
        }
    }

    pub fn with_sink(mut self, sink: TelemetrySink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn snapshot_receiver(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn start(&mut self) {
        if self.session.is_some() {
            log::warn!("Telemetry poller already running");
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task_handle = tokio::spawn(poll_loop(
            self.transport.clone(),
            self.interval,
            self.response_timeout,
            self.sink.clone(),
            self.snapshot_tx.clone(),
            stop_rx,
        ));

        self.session = Some(PollingSession {
            task_handle,
            stop_tx,
        });
    }

    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let _ = session.stop_tx.send(()).await;

        let grace = stop_grace(self.response_timeout);
        let abort = session.task_handle.abort_handle();
        if timeout(grace, session.task_handle).await.is_err() {
            log::warn!("Telemetry poller did not stop within {:?}; aborting", grace);
            abort.abort();
        }
    }
}

/// A poll in progress may hold the transport for up to three response timeouts
fn stop_grace(response_timeout: Duration) -> Duration {
    response_timeout
        .checked_mul(3)
        .and_then(|polls| polls.checked_add(Duration::from_secs(1)))
        .unwrap_or(Duration::MAX)
}

async fn poll_loop(
    transport: SharedTransport,
    interval: Duration,
    response_timeout: Duration,
    sink: Option<TelemetrySink>,
    snapshot_tx: Arc<watch::Sender<TelemetrySnapshot>>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    log::info!("Telemetry polling started every {:?}", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                log::info!("Received stop signal for telemetry polling");
                break;
            }

            _ = ticker.tick() => {
                for kind in TelemetryKind::ALL {
                    match poll_once(&transport, kind, response_timeout).await {
                        Ok(reading) => {
                            log::debug!("{} = {} {}", kind, reading.value, kind.unit());
                            snapshot_tx.send_modify(|snapshot| snapshot.apply(&reading));
                            if let Some(sink) = &sink {
                                sink(TelemetryEvent::Reading(reading));
                            }
                        }
                        Err(e) => {
                            log::warn!("Telemetry poll for {} failed: {}", kind, e);
                            snapshot_tx.send_modify(|snapshot| snapshot.poll_errors += 1);
                            if let Some(sink) = &sink {
                                sink(TelemetryEvent::Error { kind, message: e.to_string() });
                            }
                        }
                    }
                }
            }
        }
    }

    log::info!("Telemetry polling stopped");
}

/// One locked request/response exchange for a single telemetry channel
pub async fn poll_once(
    transport: &SharedTransport,
    kind: TelemetryKind,
    response_timeout: Duration,
) -> Result<TelemetryReading, PollError> {
    let expected = kind.command().as_u8();
    let request = protocol::encode(expected, &[])?;

    let response = transport::exchange(transport, &request, response_timeout).await?;
    if response.is_empty() {
        return Err(PollError::NoResponse(kind));
    }

    let frame = protocol::decode(&response)?.ok_or(PollError::Incomplete)?;
    if frame.command_id() != expected {
        return Err(PollError::UnexpectedCommand {
            expected,
            actual: frame.command_id(),
        });
    }

    Ok(TelemetryReading {
        kind,
        value: kind.decode(frame.payload())?,
        taken_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_grace_covers_three_polls() {
        assert_eq!(stop_grace(Duration::from_secs(2)), Duration::from_secs(7));
        assert_eq!(stop_grace(Duration::MAX), Duration::MAX);
        assert_eq!(stop_grace(Duration::from_secs(u64::MAX / 2)), Duration::MAX);
    }
}
