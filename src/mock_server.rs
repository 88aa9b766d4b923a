//! Mock sensor server for integration tests and local demos.
//!
//! Speaks the same line protocol as the real server: greets clients with
//! `Hello World`, answers `data req` / `datam req` with pseudo-sensor
//! values, computes `calcstats` over the last 10 served readings, stops on
//! `shutdown`, and replies `Unrecognized message` to anything else.

use crate::error::{Result, SensorError};
use crate::protocol::{Reading, Request, SensorStats, ServerMessage, StatRange};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

const HISTORY_LEN: usize = 10;

/// Configuration for the mock sensor server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Address to bind to (use "127.0.0.1:0" for a random port)
    pub bind_address: String,
    /// Scripted (humidity, temperature) values served in order, cycling.
    /// None walks the built-in pseudo-sensor ramp instead.
    pub readings: Option<Vec<(f64, f64)>>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            readings: None,
        }
    }
}

/// The pseudo-sensor walks fixed humidity and temperature ramps, one step
/// per generated value, wrapping at the end of each table.
struct PseudoSensor {
    script: Option<Vec<(f64, f64)>>,
    h_index: usize,
    t_index: usize,
}

const H_RANGE: [f64; 18] = [
    0.0, 20.0, 20.0, 40.0, 40.0, 60.0, 60.0, 80.0, 80.0, 90.0, 70.0, 70.0, 50.0, 50.0, 30.0,
    30.0, 10.0, 10.0,
];
const T_RANGE: [f64; 16] = [
    -20.0, -10.0, 0.0, 10.0, 30.0, 50.0, 70.0, 80.0, 90.0, 80.0, 60.0, 40.0, 20.0, 10.0, 0.0,
    -10.0,
];

impl PseudoSensor {
    fn new(script: Option<Vec<(f64, f64)>>) -> Self {
        Self {
            script,
            h_index: 0,
            t_index: 0,
        }
    }

    fn generate_values(&mut self) -> (f64, f64) {
        if let Some(script) = &self.script {
            let pair = script[self.h_index % script.len()];
            self.h_index += 1;
            return pair;
        }

        let humidity = H_RANGE[self.h_index];
        let temperature = T_RANGE[self.t_index];
        self.h_index = (self.h_index + 1) % H_RANGE.len();
        self.t_index = (self.t_index + 1) % T_RANGE.len();
        (humidity, temperature)
    }
}

/// State shared by all client connections, like the real server's single
/// sensor and reading log.
struct ServerCore {
    sensor: PseudoSensor,
    history: VecDeque<Reading>,
    alarm_thresholds: Option<(f64, f64)>,
    received: Vec<String>,
}

impl ServerCore {
    fn next_reading(&mut self) -> Reading {
        let (humidity, temperature) = self.sensor.generate_values();
        let reading = Reading {
            humidity,
            temperature,
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        };
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(reading.clone());
        reading
    }

    fn stats(&self) -> Option<SensorStats> {
        if self.history.is_empty() {
            return None;
        }
        let temps: Vec<f64> = self.history.iter().map(|r| r.temperature).collect();
        let hums: Vec<f64> = self.history.iter().map(|r| r.humidity).collect();
        Some(SensorStats {
            temperature: range_of(&temps),
            humidity: range_of(&hums),
        })
    }
}

fn range_of(values: &[f64]) -> StatRange {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
        sum += v;
    }
    StatRange {
        min,
        max,
        avg: sum / values.len() as f64,
    }
}

/// A running mock server. Dropping it does not stop the accept loop; call
/// [`MockSensorServer::stop`].
pub struct MockSensorServer {
    local_addr: SocketAddr,
    core: Arc<Mutex<ServerCore>>,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl MockSensorServer {
    /// Bind and start serving. Returns once the listener is ready.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        info!("Mock sensor server listening on {}", local_addr);

        let core = Arc::new(Mutex::new(ServerCore {
            sensor: PseudoSensor::new(config.readings),
            history: VecDeque::new(),
            alarm_thresholds: None,
            received: Vec::new(),
        }));

        let cancel = CancellationToken::new();
        let accept_core = core.clone();
        let accept_cancel = cancel.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                info!("Client connected from {}", peer);
                                let core = accept_core.clone();
                                let cancel = accept_cancel.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(stream, core, cancel).await {
                                        debug!("Client {} ended: {}", peer, e);
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("Accept failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            core,
            cancel,
            accept_task,
        })
    }

    /// WebSocket URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}/ws/", self.local_addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Every text frame received so far, in arrival order.
    pub fn received_messages(&self) -> Vec<String> {
        self.core.lock().unwrap().received.clone()
    }

    /// Thresholds from the most recent `alarm` request, if any.
    pub fn alarm_thresholds(&self) -> Option<(f64, f64)> {
        self.core.lock().unwrap().alarm_thresholds
    }

    /// True once a client asked the server to shut down.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a client asks the server to shut down.
    pub async fn wait_for_shutdown(&self) {
        self.cancel.cancelled().await;
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.accept_task.await;
    }
}

async fn handle_client(
    stream: TcpStream,
    core: Arc<Mutex<ServerCore>>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ws = accept_async(stream)
        .await
        .map_err(SensorError::WebSocket)?;

    // Greeting banner, same as the real server.
    ws.send(Message::Text("Hello World".into())).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                break;
            }
            frame = ws.next() => {
                let message = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(SensorError::WebSocket(e)),
                };

                debug!("Mock server received: {}", message);
                if let Some(reply) = handle_request(message.as_str(), &core, &cancel) {
                    ws.send(Message::Text(reply.into())).await?;
                }
            }
        }
    }

    Ok(())
}

fn handle_request(
    line: &str,
    core: &Arc<Mutex<ServerCore>>,
    cancel: &CancellationToken,
) -> Option<String> {
    let mut core = core.lock().unwrap();
    core.received.push(line.to_string());

    match Request::decode(line) {
        Ok(Request::Greeting) => None,
        Ok(Request::SingleRead) => {
            let reading = core.next_reading();
            Some(ServerMessage::Data(reading).encode())
        }
        Ok(Request::BatchRead) => {
            let reading = core.next_reading();
            Some(ServerMessage::BatchData(reading).encode())
        }
        Ok(Request::Statistics) => match core.stats() {
            Some(stats) => Some(ServerMessage::Stats(stats).encode()),
            None => {
                warn!("Statistics requested before any readings");
                None
            }
        },
        Ok(Request::SetAlarm {
            temperature,
            humidity,
        }) => {
            core.alarm_thresholds = Some((temperature, humidity));
            None
        }
        Ok(Request::Shutdown) => {
            info!("Shutdown requested by client");
            cancel.cancel();
            None
        }
        Err(_) => Some("Unrecognized message".to_string()),
    }
}
