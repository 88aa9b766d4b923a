use anyhow::Result;
use clap::Parser;
use sensor_edge_rs::config::load_config;
use sensor_edge_rs::protocol::{Reading, SensorStats};
use sensor_edge_rs::session::{AlarmKind, ConnectionState, Session, SessionHandle, TelemetrySink};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "sensor-edge", about = "Console client for the sensor telemetry server")]
struct Args {
    /// WebSocket endpoint of the sensor server (overrides SENSOR_SERVER_URL)
    #[arg(long)]
    server: Option<String>,

    /// Batch read cadence in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

/// Renders session notifications on stdout. This is the presentation layer;
/// all sequencing lives in the session core.
struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        println!("-- connection {}", state);
        if state == ConnectionState::Closed {
            println!("-- data commands are disabled until reconnect");
        }
    }

    fn on_connection_error(&mut self, message: &str) {
        println!("-- connection error: {}", message);
    }

    fn on_single_read_updated(&mut self, reading: &Reading) {
        println!(
            "humidity {:.2} %  temperature {:.2} C  ({})",
            reading.humidity, reading.temperature, reading.timestamp
        );
    }

    fn on_batch_slot_updated(&mut self, index: usize, reading: &Reading) {
        println!(
            "[{:2}] humidity {:.2} %  temperature {:.2} C  ({})",
            index, reading.humidity, reading.temperature, reading.timestamp
        );
    }

    fn on_statistics_updated(&mut self, stats: &SensorStats) {
        println!(
            "temperature  min {:.2}  max {:.2}  avg {:.2}",
            stats.temperature.min, stats.temperature.max, stats.temperature.avg
        );
        println!(
            "humidity     min {:.2}  max {:.2}  avg {:.2}",
            stats.humidity.min, stats.humidity.max, stats.humidity.avg
        );
    }

    fn on_alarm_raised(&mut self, kind: AlarmKind, value: f64) {
        println!("!! {} alarm raised at {:.2}", kind.as_str(), value);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = load_config()?;
    if let Some(server) = args.server {
        config.server_url = server;
        config.validate()?;
    }
    if let Some(millis) = args.poll_interval_ms {
        config.poll_interval = Duration::from_millis(millis);
    }

    let (session, handle) = Session::create(config, Box::new(ConsoleSink));
    let cancel = CancellationToken::new();
    let mut session_task = tokio::spawn(session.run(cancel.clone()));

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                cancel.cancel();
                break;
            }
            result = &mut session_task => {
                result??;
                return Ok(());
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => dispatch(line.trim(), &handle),
                    None => {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    session_task.await??;
    Ok(())
}

fn dispatch(line: &str, handle: &SessionHandle) {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("connect") => handle.connect_toggle(),
        Some("read") => handle.single_read(),
        Some("batch") => handle.start_batch_read(),
        Some("stats") => handle.request_statistics(),
        Some("alarm") => {
            // Raw input is parsed permissively, like the rest of the wire
            // protocol: a bad field becomes NaN and never trips a latch.
            let temperature = parse_threshold(parts.next());
            let humidity = parse_threshold(parts.next());
            handle.set_alarm_thresholds(temperature, humidity);
            println!(
                "-- alarm thresholds set to temperature {} humidity {}",
                temperature, humidity
            );
        }
        Some("shutdown") => handle.shutdown(),
        Some("help") => print_help(),
        Some(other) => println!("Unknown command '{}', try 'help'", other),
        None => {}
    }
}

fn parse_threshold(field: Option<&str>) -> f64 {
    field
        .and_then(|f| f.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn print_help() {
    println!("Commands:");
    println!("  connect            open the connection, or close it if open");
    println!("  read               request a single reading");
    println!("  batch              start a timed run of 10 readings");
    println!("  stats              request min/max/avg statistics");
    println!("  alarm <temp> <hum> set the alarm thresholds");
    println!("  shutdown           ask the server to shut down and exit");
    println!("  help               show this help");
}
