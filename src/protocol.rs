//! Line protocol spoken between the client and the sensor server.
//!
//! Every message is a single text line `"<type> <payload>"`, split on the
//! first space. Numeric payload fields are comma separated and parsed
//! permissively: a field that fails to parse (or is missing entirely)
//! becomes `f64::NAN` and propagates downstream; nothing is rejected.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

/// One humidity/temperature sample from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub humidity: f64,
    pub temperature: f64,
    pub timestamp: String,
}

impl Reading {
    /// Wire payload form: `<hum>,<temp>,<timestamp>`.
    pub fn to_payload(&self) -> String {
        format!("{},{},{}", self.humidity, self.temperature, self.timestamp)
    }

    fn from_payload(payload: &str) -> Self {
        let mut fields = payload.split(',');
        Reading {
            humidity: parse_float(fields.next()),
            temperature: parse_float(fields.next()),
            timestamp: fields.next().unwrap_or_default().to_string(),
        }
    }
}

/// min/max/avg over one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatRange {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Server-computed aggregate over the most recent readings. The client never
/// computes these itself; the snapshot is replaced wholesale on arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorStats {
    pub temperature: StatRange,
    pub humidity: StatRange,
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `data <hum>,<temp>,<ts>` — reply to a single read request.
    Data(Reading),
    /// `datam <hum>,<temp>,<ts>` — reply to a batch read request, destined
    /// for the rolling batch buffer.
    BatchData(Reading),
    /// `datacalc <tmin>,<tmax>,<tavg>,<hmin>,<hmax>,<havg>`.
    Stats(SensorStats),
}

impl ServerMessage {
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::Data(reading) => format!("data {}", reading.to_payload()),
            ServerMessage::BatchData(reading) => format!("datam {}", reading.to_payload()),
            ServerMessage::Stats(stats) => format!(
                "datacalc {},{},{},{},{},{}",
                stats.temperature.min,
                stats.temperature.max,
                stats.temperature.avg,
                stats.humidity.min,
                stats.humidity.max,
                stats.humidity.avg,
            ),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let (msg_type, payload) = split_type(line)?;

        match msg_type {
            "data" => Ok(ServerMessage::Data(Reading::from_payload(payload))),
            "datam" => Ok(ServerMessage::BatchData(Reading::from_payload(payload))),
            "datacalc" => {
                let mut fields = payload.split(',');
                Ok(ServerMessage::Stats(SensorStats {
                    temperature: StatRange {
                        min: parse_float(fields.next()),
                        max: parse_float(fields.next()),
                        avg: parse_float(fields.next()),
                    },
                    humidity: StatRange {
                        min: parse_float(fields.next()),
                        max: parse_float(fields.next()),
                        avg: parse_float(fields.next()),
                    },
                }))
            }
            _ => Err(ProtocolError::Unrecognized(line.to_string())),
        }
    }
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `Hello Server!` — sent once per successful open.
    Greeting,
    /// `data req`
    SingleRead,
    /// `datam req`
    BatchRead,
    /// `calcstats`
    Statistics,
    /// `alarm <temp>,<hum>`
    SetAlarm { temperature: f64, humidity: f64 },
    /// `shutdown`
    Shutdown,
}

impl Request {
    pub fn encode(&self) -> String {
        match self {
            Request::Greeting => "Hello Server!".to_string(),
            Request::SingleRead => "data req".to_string(),
            Request::BatchRead => "datam req".to_string(),
            Request::Statistics => "calcstats".to_string(),
            Request::SetAlarm {
                temperature,
                humidity,
            } => format!("alarm {},{}", temperature, humidity),
            Request::Shutdown => "shutdown".to_string(),
        }
    }

    /// Decode a client request. Used by the mock server side of the codec.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        match line {
            "Hello Server!" => return Ok(Request::Greeting),
            "data req" => return Ok(Request::SingleRead),
            "datam req" => return Ok(Request::BatchRead),
            "calcstats" => return Ok(Request::Statistics),
            "shutdown" => return Ok(Request::Shutdown),
            _ => {}
        }

        let (msg_type, payload) = split_type(line)?;
        if msg_type == "alarm" {
            let mut fields = payload.split(',');
            return Ok(Request::SetAlarm {
                temperature: parse_float(fields.next()),
                humidity: parse_float(fields.next()),
            });
        }

        Err(ProtocolError::Unrecognized(line.to_string()))
    }
}

fn split_type(line: &str) -> Result<(&str, &str), ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(match line.split_once(' ') {
        Some((msg_type, payload)) => (msg_type, payload),
        None => (line, ""),
    })
}

fn parse_float(field: Option<&str>) -> f64 {
    field
        .and_then(|f| f.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}
