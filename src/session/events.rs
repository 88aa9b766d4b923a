//! Notifications the session delivers to the presentation layer.

use crate::protocol::{Reading, SensorStats};
use tokio::sync::mpsc;

/// Lifecycle of the single server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Data-requesting commands are only valid while the connection is open.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", label)
    }
}

/// Which threshold a reading crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Temperature,
    Humidity,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::Temperature => "temperature",
            AlarmKind::Humidity => "humidity",
        }
    }
}

/// Outward interface the session core calls into. Implementations render
/// state for the user; the core never waits on them, so every method is a
/// plain synchronous call made after the state mutation has completed.
pub trait TelemetrySink: Send {
    fn on_connection_state_changed(&mut self, state: ConnectionState);
    fn on_connection_error(&mut self, message: &str);
    fn on_single_read_updated(&mut self, reading: &Reading);
    fn on_batch_slot_updated(&mut self, index: usize, reading: &Reading);
    fn on_statistics_updated(&mut self, stats: &SensorStats);
    fn on_alarm_raised(&mut self, kind: AlarmKind, value: f64);
}

/// Owned form of a sink notification, for sinks that forward into a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    ConnectionStateChanged(ConnectionState),
    ConnectionError(String),
    SingleReadUpdated(Reading),
    BatchSlotUpdated(usize, Reading),
    StatisticsUpdated(SensorStats),
    AlarmRaised(AlarmKind, f64),
}

/// Sink that forwards every notification into an unbounded channel. Used by
/// the integration tests and by tooling that consumes events asynchronously.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        // Receiver may be gone during teardown; nothing to do then.
        let _ = self.tx.send(event);
    }
}

impl TelemetrySink for ChannelSink {
    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        self.forward(SinkEvent::ConnectionStateChanged(state));
    }

    fn on_connection_error(&mut self, message: &str) {
        self.forward(SinkEvent::ConnectionError(message.to_string()));
    }

    fn on_single_read_updated(&mut self, reading: &Reading) {
        self.forward(SinkEvent::SingleReadUpdated(reading.clone()));
    }

    fn on_batch_slot_updated(&mut self, index: usize, reading: &Reading) {
        self.forward(SinkEvent::BatchSlotUpdated(index, reading.clone()));
    }

    fn on_statistics_updated(&mut self, stats: &SensorStats) {
        self.forward(SinkEvent::StatisticsUpdated(*stats));
    }

    fn on_alarm_raised(&mut self, kind: AlarmKind, value: f64) {
        self.forward(SinkEvent::AlarmRaised(kind, value));
    }
}
