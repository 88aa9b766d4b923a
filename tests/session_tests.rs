//! End-to-end tests: the real session loop over a real socket against the
//! in-crate mock sensor server.

use sensor_edge_rs::config::ClientConfig;
use sensor_edge_rs::mock_server::{MockSensorServer, MockServerConfig};
use sensor_edge_rs::session::{
    AlarmKind, ChannelSink, ConnectionState, Session, SessionHandle, SinkEvent,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

async fn start_server(readings: Vec<(f64, f64)>) -> MockSensorServer {
    MockSensorServer::start(MockServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        readings: Some(readings),
    })
    .await
    .expect("mock server failed to start")
}

struct TestClient {
    handle: SessionHandle,
    events: UnboundedReceiver<SinkEvent>,
    cancel: CancellationToken,
    task: JoinHandle<sensor_edge_rs::Result<()>>,
}

fn spawn_client(url: &str) -> TestClient {
    let config = ClientConfig {
        server_url: url.to_string(),
        poll_interval: POLL_INTERVAL,
        batch_capacity: 10,
    };
    let (sink, events) = ChannelSink::new();
    let (session, handle) = Session::create(config, Box::new(sink));
    let cancel = CancellationToken::new();
    let task = tokio::spawn(session.run(cancel.clone()));
    TestClient {
        handle,
        events,
        cancel,
        task,
    }
}

impl TestClient {
    async fn next_event(&mut self) -> SinkEvent {
        timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a sink event")
            .expect("event channel closed")
    }

    /// Consume events until the given connection state is reported.
    async fn wait_for_state(&mut self, state: ConnectionState) -> Vec<SinkEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            if event == SinkEvent::ConnectionStateChanged(state) {
                return seen;
            }
            seen.push(event);
        }
    }

    /// Consume events until a single-read update arrives, returning
    /// everything seen before it (it is excluded).
    async fn wait_for_single_read(&mut self) -> (Vec<SinkEvent>, SinkEvent) {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            if matches!(event, SinkEvent::SingleReadUpdated(_)) {
                return (seen, event);
            }
            seen.push(event);
        }
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        let _ = timeout(EVENT_TIMEOUT, &mut self.task).await;
    }
}

/// Poll until the server's received log satisfies the predicate.
async fn wait_for_received<F: Fn(&[String]) -> bool>(server: &MockSensorServer, predicate: F) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        if predicate(&server.received_messages()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on server received log: {:?}",
            server.received_messages()
        );
        sleep(Duration::from_millis(5)).await;
    }
}

fn alarms(events: &[SinkEvent]) -> Vec<(AlarmKind, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::AlarmRaised(kind, value) => Some((*kind, *value)),
            _ => None,
        })
        .collect()
}

#[test_log::test(tokio::test)]
async fn connect_greets_and_reports_first_reading_with_default_alarms() {
    let server = start_server(vec![(45.5, 72.3)]).await;
    let mut client = spawn_client(&server.url());

    client.handle.connect_toggle();
    assert_eq!(
        client.next_event().await,
        SinkEvent::ConnectionStateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        client.next_event().await,
        SinkEvent::ConnectionStateChanged(ConnectionState::Open)
    );

    // The initial reading breaches both default limits (60 / 25); alarm
    // evaluation runs before the view update.
    let (before, single) = client.wait_for_single_read().await;
    assert_eq!(
        alarms(&before),
        vec![
            (AlarmKind::Temperature, 72.3),
            (AlarmKind::Humidity, 45.5)
        ]
    );
    match single {
        SinkEvent::SingleReadUpdated(reading) => {
            assert_eq!(reading.humidity, 45.5);
            assert_eq!(reading.temperature, 72.3);
        }
        other => panic!("Expected a single-read update, got {:?}", other),
    }

    // Greeting first, then the initial read request.
    wait_for_received(&server, |log| {
        log == ["Hello Server!".to_string(), "data req".to_string()]
    })
    .await;

    // Later breaches stay silent: the latches only fire once per session.
    client.handle.single_read();
    let (before, _) = client.wait_for_single_read().await;
    assert!(alarms(&before).is_empty());

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn thresholds_set_while_disconnected_suppress_alarms() {
    let server = start_server(vec![(45.5, 72.3)]).await;
    let mut client = spawn_client(&server.url());

    // Thresholds are valid input while the connection is closed; no wire
    // message goes out for them.
    client.handle.set_alarm_thresholds(80.0, 90.0);
    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Open).await;

    let (before, _) = client.wait_for_single_read().await;
    assert!(alarms(&before).is_empty(), "72.3 is below the raised limit");
    assert!(!server
        .received_messages()
        .iter()
        .any(|m| m.starts_with("alarm")));

    // While open the server is informed as well.
    client.handle.set_alarm_thresholds(85.0, 95.0);
    wait_for_received(&server, |log| log.iter().any(|m| m == "alarm 85,95")).await;
    assert_eq!(server.alarm_thresholds(), Some((85.0, 95.0)));

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn batch_run_fills_ten_slots_in_order_then_stops() {
    let readings: Vec<(f64, f64)> = (0..11).map(|i| (i as f64, i as f64)).collect();
    let server = start_server(readings).await;
    let mut client = spawn_client(&server.url());

    // Keep the latches out of the picture.
    client.handle.set_alarm_thresholds(1000.0, 1000.0);
    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Open).await;
    client.wait_for_single_read().await;

    client.handle.start_batch_read();
    // A second start while the run is active must not overlap timers.
    client.handle.start_batch_read();

    let mut slots = Vec::new();
    while slots.len() < 10 {
        if let SinkEvent::BatchSlotUpdated(index, reading) = client.next_event().await {
            slots.push((index, reading.humidity));
        }
    }
    for (i, (index, _)) in slots.iter().enumerate() {
        assert_eq!(*index, i, "slots must fill in order");
    }

    // Let several more intervals elapse: the run is over, no 11th request.
    sleep(POLL_INTERVAL * 5).await;
    let batch_requests = server
        .received_messages()
        .iter()
        .filter(|m| m.as_str() == "datam req")
        .count();
    assert_eq!(batch_requests, 10);
    assert!(client.events.try_recv().is_err(), "no 11th slot update");

    // The cursor reset: a fresh run fills slot 0 first again.
    client.handle.start_batch_read();
    match client.next_event().await {
        SinkEvent::BatchSlotUpdated(index, _) => assert_eq!(index, 0),
        other => panic!("Expected a batch slot update, got {:?}", other),
    }

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn statistics_snapshot_covers_served_readings() {
    let server = start_server(vec![(10.0, 1.0), (20.0, 2.0), (30.0, 3.0)]).await;
    let mut client = spawn_client(&server.url());

    client.handle.set_alarm_thresholds(1000.0, 1000.0);
    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Open).await;
    client.wait_for_single_read().await;

    client.handle.single_read();
    client.wait_for_single_read().await;
    client.handle.single_read();
    client.wait_for_single_read().await;

    client.handle.request_statistics();
    loop {
        if let SinkEvent::StatisticsUpdated(stats) = client.next_event().await {
            assert_eq!(stats.humidity.min, 10.0);
            assert_eq!(stats.humidity.max, 30.0);
            assert_eq!(stats.humidity.avg, 20.0);
            assert_eq!(stats.temperature.min, 1.0);
            assert_eq!(stats.temperature.max, 3.0);
            assert_eq!(stats.temperature.avg, 2.0);
            break;
        }
    }

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn data_commands_send_nothing_while_closed() {
    let server = start_server(vec![(1.0, 1.0)]).await;
    let mut client = spawn_client(&server.url());

    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Open).await;
    client.wait_for_single_read().await;

    // Toggle closes the open connection.
    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Closed).await;

    client.handle.single_read();
    client.handle.start_batch_read();
    client.handle.request_statistics();
    sleep(POLL_INTERVAL * 5).await;

    // Nothing beyond the connect-phase traffic reached the server.
    assert_eq!(
        server.received_messages(),
        vec!["Hello Server!".to_string(), "data req".to_string()]
    );

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn reconnect_resets_the_alarm_latches() {
    let server = start_server(vec![(45.5, 72.3)]).await;
    let mut client = spawn_client(&server.url());

    client.handle.connect_toggle();
    let (before, _) = client.wait_for_single_read().await;
    assert_eq!(alarms(&before).len(), 2);

    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Closed).await;

    // A fresh connection is a fresh alarm session.
    client.handle.connect_toggle();
    let (before, _) = client.wait_for_single_read().await;
    assert_eq!(alarms(&before).len(), 2);

    client.stop().await;
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn shutdown_notifies_server_and_ends_the_loop() {
    let server = start_server(vec![(1.0, 1.0)]).await;
    let mut client = spawn_client(&server.url());

    client.handle.connect_toggle();
    client.wait_for_state(ConnectionState::Open).await;
    client.wait_for_single_read().await;

    client.handle.shutdown();
    timeout(EVENT_TIMEOUT, client.task)
        .await
        .expect("session loop did not end")
        .expect("session task panicked")
        .expect("session loop failed");

    wait_for_received(&server, |log| log.iter().any(|m| m == "shutdown")).await;
    assert!(server.is_stopped());
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn failed_connection_attempt_ends_closed() {
    // Bind a port and drop it so the connect is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = spawn_client(&format!("ws://{}/ws/", addr));
    client.handle.connect_toggle();

    assert_eq!(
        client.next_event().await,
        SinkEvent::ConnectionStateChanged(ConnectionState::Connecting)
    );
    match client.next_event().await {
        SinkEvent::ConnectionError(message) => {
            assert!(message.contains("connection attempt failed"));
        }
        other => panic!("Expected a connection error, got {:?}", other),
    }
    assert_eq!(
        client.next_event().await,
        SinkEvent::ConnectionStateChanged(ConnectionState::Closed)
    );

    client.stop().await;
}
