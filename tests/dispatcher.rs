mod common;

use std::time::Duration;

use benchlink_lib::dispatch::{
    Command, CommandDispatcher, CommandFailure, CommandStatus, DispatchOutcome, DispatchSettings,
};
use common::{Reply, ScriptedTransport};
use tokio::time::timeout;

fn fast_settings() -> DispatchSettings {
    DispatchSettings {
        response_timeout: Duration::from_millis(50),
        command_interval: Duration::from_millis(5),
        queue_capacity: 16,
    }
}

fn command(seq: usize, marker: u8) -> Command {
    Command::new(seq, format!("cmd {}", marker), vec![0xAA, marker, 0x00, 0x00, marker, 0x55])
}

async fn collect(
    outcomes: &mut tokio::sync::mpsc::Receiver<DispatchOutcome>,
    count: usize,
) -> Vec<DispatchOutcome> {
    let mut collected = Vec::new();
    while collected.len() < count {
        let outcome = timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .expect("outcome in time")
            .expect("outcome queue open");
        collected.push(outcome);
    }
    collected
}

#[tokio::test]
async fn commands_go_out_in_submission_order() {
    let (link, sent) = ScriptedTransport::shared(|req| Reply::Bytes(vec![0x0D, req[1]])).await;
    let mut dispatcher = CommandDispatcher::new(link, fast_settings());
    let mut outcomes = dispatcher.take_outcomes().unwrap();
    dispatcher.start();

    for (seq, marker) in [0x0A, 0x0B, 0x0C].into_iter().enumerate() {
        dispatcher.submit(command(seq, marker)).await.unwrap();
    }
    let results = collect(&mut outcomes, 3).await;
    assert!(dispatcher.stop().await.is_empty());

    let markers: Vec<u8> = sent.lock().unwrap().iter().map(|frame| frame[1]).collect();
    assert_eq!(markers, vec![0x0A, 0x0B, 0x0C]);

    let seqs: Vec<usize> = results.iter().map(|o| o.command().seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    for outcome in results {
        match outcome {
            DispatchOutcome::Response(envelope) => {
                assert_eq!(envelope.command.status(), CommandStatus::Success);
                assert!(envelope.command.send_time.is_some());
                assert!(envelope.command.response_time.is_some());
                assert_eq!(envelope.raw_response[1], envelope.command.payload[1]);
            }
            DispatchOutcome::Failed(command) => panic!("unexpected failure for #{}", command.seq),
        }
    }
}

#[tokio::test]
async fn silent_command_does_not_block_the_rest() {
    let (link, sent) = ScriptedTransport::shared(|req| {
        if req[1] == 0x0B {
            Reply::Silence
        } else {
            Reply::Bytes(vec![0x0D, 0xEE])
        }
    })
    .await;
    let mut dispatcher = CommandDispatcher::new(link, fast_settings());
    let mut outcomes = dispatcher.take_outcomes().unwrap();
    dispatcher.start();

    dispatcher.submit(command(0, 0x0A)).await.unwrap();
    dispatcher.submit(command(1, 0x0B)).await.unwrap();
    dispatcher.submit(command(2, 0x0C)).await.unwrap();
    let results = collect(&mut outcomes, 3).await;
    dispatcher.stop().await;

    assert_eq!(sent.lock().unwrap().len(), 3);
    assert!(matches!(results[0], DispatchOutcome::Response(_)));
    match &results[1] {
        DispatchOutcome::Failed(command) => {
            assert_eq!(command.seq, 1);
            assert_eq!(command.status(), CommandStatus::Failed);
            assert_eq!(command.failure, Some(CommandFailure::NoResponse));
            assert!(command.send_time.is_some());
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(matches!(results[2], DispatchOutcome::Response(_)));
}

#[tokio::test]
async fn transport_error_is_recorded_per_command() {
    let (link, _sent) = ScriptedTransport::shared(|req| {
        if req[1] == 0x0A {
            Reply::Fail
        } else {
            Reply::Bytes(vec![0x01])
        }
    })
    .await;
    let mut dispatcher = CommandDispatcher::new(link, fast_settings());
    let mut outcomes = dispatcher.take_outcomes().unwrap();
    dispatcher.start();

    dispatcher.submit(command(0, 0x0A)).await.unwrap();
    dispatcher.submit(command(1, 0x0B)).await.unwrap();
    let results = collect(&mut outcomes, 2).await;
    dispatcher.stop().await;

    match &results[0] {
        DispatchOutcome::Failed(command) => {
            assert!(matches!(command.failure, Some(CommandFailure::TransportIo(_))))
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
    assert!(matches!(results[1], DispatchOutcome::Response(_)));
}

#[tokio::test]
async fn stop_returns_unsent_commands() {
    let (link, sent) = ScriptedTransport::shared(|_| Reply::Bytes(vec![0x01])).await;
    let mut dispatcher = CommandDispatcher::new(link, fast_settings());

    dispatcher.submit(command(0, 0x0A)).await.unwrap();
    dispatcher.submit(command(1, 0x0B)).await.unwrap();
    assert_eq!(dispatcher.queued(), 2);

    let abandoned = dispatcher.stop().await;
    assert_eq!(abandoned.len(), 2);
    assert_eq!(abandoned[0].seq, 0);
    assert!(sent.lock().unwrap().is_empty());

    // Stopping again has nothing left to do
    assert!(dispatcher.stop().await.is_empty());
}

#[tokio::test]
async fn start_is_idempotent() {
    let (link, sent) = ScriptedTransport::shared(|_| Reply::Bytes(vec![0x01])).await;
    let mut dispatcher = CommandDispatcher::new(link, fast_settings());
    let mut outcomes = dispatcher.take_outcomes().unwrap();
    assert!(dispatcher.take_outcomes().is_none());

    dispatcher.start();
    dispatcher.start();
    assert!(dispatcher.is_running());

    dispatcher.submit(command(0, 0x0A)).await.unwrap();
    collect(&mut outcomes, 1).await;
    dispatcher.stop().await;
    assert!(!dispatcher.is_running());
    assert_eq!(sent.lock().unwrap().len(), 1);
}
