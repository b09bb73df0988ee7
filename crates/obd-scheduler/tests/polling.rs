//! Polling rounds against the simulated adapter

use obd_protocol::sim::{SimConfig, SimConnector, SimHandle, SimTransport};
use obd_protocol::{ByteChannel, Connector, DecodeMode, DecodedValue, Handshake};
use obd_scheduler::{ConnectionParameters, PidRegistry, PollingScheduler, RelayError, RoundReport};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(u8, DecodedValue)>>>;

async fn connected() -> (ByteChannel<SimTransport>, SimHandle) {
    let mut connector = SimConnector::new(SimConfig::default());
    let adapter = connector.handle();
    let mut channel = ByteChannel::new(connector.open("sim", 38_400).unwrap(), 38_400);
    let params = ConnectionParameters::for_port("sim");
    Handshake::new(&mut channel, params.handshake_settings())
        .establish(|_| {})
        .await
        .unwrap();
    adapter.clear_commands();
    (channel, adapter)
}

fn registry(sequence: &[u8]) -> (PidRegistry, Seen) {
    let seen: Seen = Arc::default();
    let mut registry = PidRegistry::new();
    for (pid, length) in [(0x0C, 2), (0x0D, 1), (0x05, 1)] {
        registry.set_response_length(pid, length, DecodeMode::Integer);
        let sink = seen.clone();
        registry.set_handler(pid, move |pid, value, _| {
            sink.lock().unwrap().push((pid, value.clone()));
        });
    }
    for &pid in sequence {
        registry.add_to_sequence(pid);
    }
    (registry, seen)
}

#[tokio::test(start_paused = true)]
async fn test_round_dispatches_answers() {
    let (mut channel, adapter) = connected().await;
    let (mut registry, seen) = registry(&[0x0C, 0x0D]);
    let params = ConnectionParameters::for_port("sim");
    let mut scheduler = PollingScheduler::new(false);
    scheduler.prepare(&mut channel, params.poll_timeouts());

    let report = scheduler
        .run_round(&mut channel, &mut registry, params.poll_timeouts())
        .await
        .unwrap();

    assert_eq!(
        report,
        RoundReport {
            answered: 2,
            unanswered: 0,
            stopped: 0
        }
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (0x0C, DecodedValue::Integer(6904)),
            (0x0D, DecodedValue::Integer(0x55))
        ]
    );
    assert_eq!(adapter.commands(), vec!["010C", "010D"]);
    assert_eq!(scheduler.last_pid(), Some(0x0D));
    assert_eq!(
        registry.last_response(0x0C),
        Some(DecodedValue::Integer(6904))
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_request_uses_negotiation_timeout() {
    let (mut channel, _adapter) = connected().await;
    let (mut registry, _) = registry(&[0x0C]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(false);

    scheduler.prepare(&mut channel, timeouts);
    assert_eq!(channel.timeout(), timeouts.negotiation);

    scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();
    assert_eq!(channel.timeout(), timeouts.request);
}

#[tokio::test(start_paused = true)]
async fn test_reloaded_request_timeout_applies_at_once() {
    let (mut channel, _adapter) = connected().await;
    let (mut registry, _) = registry(&[0x0C]);
    let mut params = ConnectionParameters::for_port("sim");
    let mut scheduler = PollingScheduler::new(false);
    scheduler.prepare(&mut channel, params.poll_timeouts());

    // Still waiting for the first answer: negotiation timeout stays
    params.request_timeout_ms = 250;
    scheduler.update_timeouts(&mut channel, params.poll_timeouts());
    assert_eq!(channel.timeout(), params.poll_timeouts().negotiation);

    scheduler
        .run_round(&mut channel, &mut registry, params.poll_timeouts())
        .await
        .unwrap();
    params.request_timeout_ms = 120;
    scheduler.update_timeouts(&mut channel, params.poll_timeouts());
    assert_eq!(channel.timeout(), Duration::from_millis(120));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_round_loses_link() {
    let (mut channel, adapter) = connected().await;
    adapter.set_silent(true);
    let (mut registry, seen) = registry(&[0x0C, 0x0D, 0x05]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(false);
    scheduler.prepare(&mut channel, timeouts);

    let report = scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();

    assert_eq!(report.unanswered, 3);
    assert!(seen.lock().unwrap().is_empty());
    assert!(matches!(
        scheduler.check_link(registry.sequence().len()),
        Err(RelayError::LinkLost(3))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_one_answer_resets_failure_count() {
    let (mut channel, adapter) = connected().await;
    let (mut registry, _) = registry(&[0x0C, 0x0D]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(false);
    scheduler.prepare(&mut channel, timeouts);

    adapter.set_silent(true);
    scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();
    assert_eq!(scheduler.straight_errors(), 2);

    adapter.set_silent(false);
    scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();
    assert_eq!(scheduler.straight_errors(), 0);
    assert!(scheduler.check_link(2).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failures_accumulate_across_rounds() {
    let (mut channel, adapter) = connected().await;
    adapter.set_silent(true);
    let (mut registry, _) = registry(&[0x0C, 0x0D]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(false);
    scheduler.prepare(&mut channel, timeouts);

    scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();
    // A longer sequence tolerates more failures
    registry.add_to_sequence(0x05);
    registry.add_to_sequence(0x0C);
    assert!(scheduler.check_link(registry.sequence().len()).is_ok());

    scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();
    assert!(matches!(
        scheduler.check_link(registry.sequence().len()),
        Err(RelayError::LinkLost(6))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stopped_reinitiates_bus() {
    let (mut channel, adapter) = connected().await;
    adapter.queue_stopped(1);
    let (mut registry, seen) = registry(&[0x0C, 0x0D]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(true);
    scheduler.prepare(&mut channel, timeouts);

    let report = scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();

    assert_eq!(report.stopped, 1);
    assert_eq!(scheduler.straight_errors(), 0);
    assert_eq!(adapter.commands(), vec!["010C", "0100", "010D"]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(0x0D, DecodedValue::Integer(0x55))]
    );
    assert_eq!(channel.timeout(), timeouts.request);
}

#[tokio::test(start_paused = true)]
async fn test_negative_and_missing_answers_are_not_failures() {
    let (mut channel, adapter) = connected().await;
    adapter.set_answer(0x0C, "7F010C12");
    let (mut registry, seen) = registry(&[0x0C, 0x42]);
    registry.set_response_length(0x42, 2, DecodeMode::Integer);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(true);
    scheduler.prepare(&mut channel, timeouts);

    let report = scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();

    // 7F and NO DATA are answers
    assert_eq!(report.answered, 2);
    assert_eq!(scheduler.straight_errors(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_sequence_loses_link() {
    let (mut channel, adapter) = connected().await;
    let (mut registry, _) = registry(&[]);
    let timeouts = ConnectionParameters::for_port("sim").poll_timeouts();
    let mut scheduler = PollingScheduler::new(false);

    let report = scheduler
        .run_round(&mut channel, &mut registry, timeouts)
        .await
        .unwrap();

    assert_eq!(report, RoundReport::default());
    assert!(adapter.commands().is_empty());
    assert!(matches!(
        scheduler.check_link(0),
        Err(RelayError::LinkLost(0))
    ));
}
