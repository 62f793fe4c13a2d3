mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchlink_lib::protocol::{encode, TelemetryKind};
use benchlink_lib::telemetry::{poll_once, PollError, TelemetryEvent, TelemetryPoller};
use common::{Reply, ScriptedTransport};
use tokio::time::timeout;

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(50);

/// Device that answers every channel with the reference 10.0 reading
fn healthy_device(request: &[u8]) -> Reply {
    match request[1] {
        0x01 => Reply::Bytes(encode(0x01, &[0x64, 0x00]).unwrap()),
        cmd @ (0x02 | 0x03) => Reply::Bytes(encode(cmd, &[0x10, 0x27, 0x00, 0x00]).unwrap()),
        _ => Reply::Silence,
    }
}

#[tokio::test]
async fn every_channel_reads_back() {
    let (link, sent) = ScriptedTransport::shared(healthy_device).await;

    for kind in TelemetryKind::ALL {
        let reading = poll_once(&link, kind, RESPONSE_TIMEOUT).await.unwrap();
        assert_eq!(reading.kind, kind);
        assert_eq!(reading.value, 10.0);
    }

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0], vec![0xAA, 0x01, 0x00, 0x00, 0x01, 0x55]);
    assert_eq!(sent[1], vec![0xAA, 0x02, 0x00, 0x00, 0x02, 0x55]);
    assert_eq!(sent[2], vec![0xAA, 0x03, 0x00, 0x00, 0x03, 0x55]);
}

#[tokio::test]
async fn wrong_command_in_reply_is_rejected() {
    let (link, _) = ScriptedTransport::shared(|_| {
        Reply::Bytes(encode(0x03, &[0x10, 0x27, 0x00, 0x00]).unwrap())
    })
    .await;

    match poll_once(&link, TelemetryKind::Temperature, RESPONSE_TIMEOUT).await {
        Err(PollError::UnexpectedCommand { expected, actual }) => {
            assert_eq!(expected, 0x01);
            assert_eq!(actual, 0x03);
        }
        other => panic!("expected command mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn silence_and_corruption_are_errors() {
    let (link, _) = ScriptedTransport::shared(|_| Reply::Silence).await;
    assert!(matches!(
        poll_once(&link, TelemetryKind::Power, RESPONSE_TIMEOUT).await,
        Err(PollError::NoResponse(TelemetryKind::Power))
    ));

    let (link, _) = ScriptedTransport::shared(|_| {
        Reply::Bytes(vec![0xAA, 0x01, 0x02, 0x00, 0x64, 0x00, 0x63, 0x55])
    })
    .await;
    assert!(matches!(
        poll_once(&link, TelemetryKind::Temperature, RESPONSE_TIMEOUT).await,
        Err(PollError::Decode(_))
    ));

    let (link, _) = ScriptedTransport::shared(|_| Reply::Bytes(vec![0x13, 0x37])).await;
    assert!(matches!(
        poll_once(&link, TelemetryKind::Current, RESPONSE_TIMEOUT).await,
        Err(PollError::Incomplete)
    ));
}

#[tokio::test]
async fn poller_updates_snapshot_until_stopped() {
    let (link, sent) = ScriptedTransport::shared(healthy_device).await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();

    let mut poller = TelemetryPoller::new(link, Duration::from_millis(20), RESPONSE_TIMEOUT)
        .with_sink(Arc::new(move |event: TelemetryEvent| {
            sink_events.lock().unwrap().push(event)
        }));
    let mut snapshots = poller.snapshot_receiver();

    poller.start();
    poller.start();
    assert!(poller.is_running());

    timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|snapshot| snapshot.polls >= 6),
    )
    .await
    .expect("snapshot updated in time")
    .unwrap();

    poller.stop().await;
    assert!(!poller.is_running());

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.temperature, Some(10.0));
    assert_eq!(snapshot.current, Some(10.0));
    assert_eq!(snapshot.power, Some(10.0));
    assert_eq!(snapshot.poll_errors, 0);
    assert!(snapshot.updated_at.is_some());

    assert!(events
        .lock()
        .unwrap()
        .iter()
        .all(|event| matches!(event, TelemetryEvent::Reading(_))));

    // Nothing goes out once stopped
    let count = sent.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sent.lock().unwrap().len(), count);

    poller.stop().await;
}

#[tokio::test]
async fn failed_polls_are_counted() {
    let (link, _) = ScriptedTransport::shared(|_| Reply::Silence).await;
    let mut poller = TelemetryPoller::new(link, Duration::from_millis(20), RESPONSE_TIMEOUT);
    let mut snapshots = poller.snapshot_receiver();

    poller.start();
    timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|snapshot| snapshot.poll_errors >= 3),
    )
    .await
    .expect("errors counted in time")
    .unwrap();
    poller.stop().await;

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.polls, 0);
    assert_eq!(snapshot.temperature, None);
}
