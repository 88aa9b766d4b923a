//! The session engine: connection lifecycle, command surface, and the
//! single-threaded event loop tying transport signals, inbound messages and
//! scheduler ticks together.

pub mod events;
pub mod scheduler;
pub mod state;

pub use events::{AlarmKind, ChannelSink, ConnectionState, SinkEvent, TelemetrySink};
pub use state::AlarmThresholds;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::{Request, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use scheduler::BatchPoller;
use state::SessionState;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands accepted by the session loop.
#[derive(Debug, Clone)]
pub enum Command {
    ConnectToggle,
    SingleRead,
    StartBatchRead,
    RequestStatistics,
    SetAlarmThresholds { temperature: f64, humidity: f64 },
    Shutdown,
}

/// Cloneable command surface. Handles outlive the session; commands sent
/// after the loop ended are dropped with a warning.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Session loop has ended, dropping command");
        }
    }

    /// Open the connection, or close it if it is already open.
    pub fn connect_toggle(&self) {
        self.send(Command::ConnectToggle);
    }

    /// Request one reading. No-op unless the connection is open.
    pub fn single_read(&self) {
        self.send(Command::SingleRead);
    }

    /// Start a timed batch run of reads. No-op unless the connection is
    /// open, or while a run is already active.
    pub fn start_batch_read(&self) {
        self.send(Command::StartBatchRead);
    }

    /// Ask the server for a statistics snapshot. No-op unless open.
    pub fn request_statistics(&self) {
        self.send(Command::RequestStatistics);
    }

    /// Update the alarm limits. Valid while disconnected; the server is
    /// additionally informed when the connection is open.
    pub fn set_alarm_thresholds(&self, temperature: f64, humidity: f64) {
        self.send(Command::SetAlarmThresholds {
            temperature,
            humidity,
        });
    }

    /// Ask the server to shut down (if open) and end the session loop.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

/// Owns the socket, the connection state and the session state. All
/// transitions happen inside [`Session::run`], strictly one event at a time.
pub struct Session {
    config: ClientConfig,
    state: SessionState,
    poller: BatchPoller,
    sink: Box<dyn TelemetrySink>,
    socket: Option<WsStream>,
    conn_state: ConnectionState,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Session {
    pub fn create(config: ClientConfig, sink: Box<dyn TelemetrySink>) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            state: SessionState::new(config.batch_capacity),
            poller: BatchPoller::new(config.poll_interval, config.batch_capacity),
            config,
            sink,
            socket: None,
            conn_state: ConnectionState::Idle,
            commands: rx,
        };
        (session, SessionHandle { commands: tx })
    }

    /// The event loop. Reacts to exactly three signal sources — commands,
    /// the inbound WebSocket stream, and scheduler ticks — never
    /// concurrently. Returns when a shutdown command arrives, every handle
    /// is dropped, or the cancellation token fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Session loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session cancelled");
                    self.teardown().await;
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            info!("All session handles dropped");
                            self.teardown().await;
                            break;
                        }
                    }
                }
                frame = Self::next_frame(&mut self.socket), if self.socket.is_some() => {
                    self.handle_frame(frame).await;
                }
                _ = self.poller.tick(), if self.poller.is_ticking() => {
                    self.send_request(Request::BatchRead).await;
                }
            }
        }

        info!("Session loop ended");
        Ok(())
    }

    /// Next inbound frame, pending forever while disconnected (the select
    /// branch is also guarded, so this arm never wakes without a socket).
    async fn next_frame(socket: &mut Option<WsStream>) -> Option<std::result::Result<Message, WsError>> {
        match socket.as_mut() {
            Some(ws) => ws.next().await,
            None => std::future::pending().await,
        }
    }

    /// Returns false when the loop should end.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::ConnectToggle => match self.conn_state {
                ConnectionState::Open => self.disconnect().await,
                ConnectionState::Idle | ConnectionState::Closed => self.connect().await,
                other => warn!("Connect toggle ignored while {}", other),
            },
            Command::SingleRead => self.send_request(Request::SingleRead).await,
            Command::StartBatchRead => {
                if self.conn_state.can_send() {
                    // start() itself rejects an overlapping run.
                    self.poller.start();
                } else {
                    warn!("Batch read requires an open connection");
                }
            }
            Command::RequestStatistics => self.send_request(Request::Statistics).await,
            Command::SetAlarmThresholds {
                temperature,
                humidity,
            } => {
                self.state.set_thresholds(temperature, humidity);
                if self.conn_state.can_send() {
                    self.send_request(Request::SetAlarm {
                        temperature,
                        humidity,
                    })
                    .await;
                }
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                if self.conn_state.can_send() {
                    self.send_request(Request::Shutdown).await;
                }
                self.teardown().await;
                return false;
            }
        }
        true
    }

    async fn connect(&mut self) {
        self.set_conn_state(ConnectionState::Connecting);
        info!("Connecting to {}", self.config.server_url);

        let ws = match connect_async(self.config.server_url.as_str()).await {
            Ok((ws, response)) => {
                debug!("WebSocket handshake complete, status {}", response.status());
                ws
            }
            Err(e) => {
                error!("Connection attempt failed: {}", e);
                self.sink
                    .on_connection_error(&format!("connection attempt failed: {}", e));
                self.set_conn_state(ConnectionState::Closed);
                return;
            }
        };

        self.socket = Some(ws);
        // Fresh connection, fresh alarm session.
        self.state.reset_alarms();

        // Greeting goes out before the state flips to Open.
        if let Err(e) = self.write_frame(Request::Greeting).await {
            error!("Failed to send greeting: {}", e);
            self.sink
                .on_connection_error(&format!("connection attempt failed: {}", e));
            self.socket = None;
            self.set_conn_state(ConnectionState::Closed);
            return;
        }

        self.set_conn_state(ConnectionState::Open);
        // Ask for a first reading right away.
        self.send_request(Request::SingleRead).await;
    }

    async fn disconnect(&mut self) {
        self.set_conn_state(ConnectionState::Closing);
        self.poller.stop();
        if let Some(mut ws) = self.socket.take() {
            if let Err(e) = ws.close(None).await {
                debug!("Error closing WebSocket: {}", e);
            }
        }
        self.set_conn_state(ConnectionState::Closed);
    }

    async fn teardown(&mut self) {
        self.poller.stop();
        if let Some(mut ws) = self.socket.take() {
            if let Err(e) = ws.close(None).await {
                debug!("Error closing WebSocket: {}", e);
            }
        }
        self.set_conn_state(ConnectionState::Closed);
    }

    async fn handle_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.dispatch_message(text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                info!("Server closed the connection: {:?}", frame);
                self.on_transport_closed();
            }
            None => {
                info!("Connection stream ended");
                self.on_transport_closed();
            }
            Some(Ok(other)) => {
                debug!("Ignoring non-text frame: {:?}", other);
            }
            Some(Err(e)) => {
                // State deliberately unchanged; if the stream then ends, the
                // Closed transition follows on its own.
                error!("WebSocket error: {}", e);
                self.sink.on_connection_error(&e.to_string());
            }
        }
    }

    fn dispatch_message(&mut self, line: &str) {
        debug!("Message from server: {}", line);

        match ServerMessage::decode(line) {
            Ok(ServerMessage::Data(reading)) => {
                self.state.apply_single(reading, self.sink.as_mut());
            }
            Ok(ServerMessage::BatchData(reading)) => {
                let run_complete = self.state.apply_batch(reading, self.sink.as_mut());
                if run_complete {
                    self.poller.stop();
                }
            }
            Ok(ServerMessage::Stats(stats)) => {
                self.state.apply_stats(stats, self.sink.as_mut());
            }
            Err(e) => {
                // Covers the server's greeting banner and its replies to
                // requests it does not know.
                debug!("Dropping inbound message: {}", e);
            }
        }
    }

    fn on_transport_closed(&mut self) {
        self.socket = None;
        self.poller.stop();
        self.set_conn_state(ConnectionState::Closed);
    }

    /// Gated send: a silent no-op (beyond the log) unless the connection is
    /// open, so misused commands never surface as transport errors.
    async fn send_request(&mut self, request: Request) {
        if !self.conn_state.can_send() {
            warn!(
                "Ignoring '{}' while connection is {}",
                request.encode(),
                self.conn_state
            );
            return;
        }
        if let Err(e) = self.write_frame(request).await {
            error!("Send failed: {}", e);
            self.sink.on_connection_error(&e.to_string());
        }
    }

    async fn write_frame(&mut self, request: Request) -> std::result::Result<(), WsError> {
        let ws = match self.socket.as_mut() {
            Some(ws) => ws,
            None => return Err(WsError::ConnectionClosed),
        };
        let line = request.encode();
        debug!("Sending request: {}", line);
        ws.send(Message::Text(line.into())).await
    }

    fn set_conn_state(&mut self, state: ConnectionState) {
        if self.conn_state != state {
            info!("Connection state: {} -> {}", self.conn_state, state);
            self.conn_state = state;
            self.sink.on_connection_state_changed(state);
        }
    }
}
