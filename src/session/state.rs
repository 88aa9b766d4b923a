//! Session state: latest reading, batch buffer, alarm latches, statistics.
//!
//! This is the single point where decoded server messages mutate state.
//! Every apply method finishes its mutation before any sink notification
//! goes out, and the session loop feeds it messages strictly in arrival
//! order.

use super::events::{AlarmKind, TelemetrySink};
use crate::protocol::{Reading, SensorStats};
use log::{debug, info};

/// Alarm limits supplied by the command surface. Defaults apply before any
/// user input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmThresholds {
    pub temperature_limit: f64,
    pub humidity_limit: f64,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            temperature_limit: 60.0,
            humidity_limit: 25.0,
        }
    }
}

pub struct SessionState {
    latest: Option<Reading>,
    batch: Vec<Option<Reading>>,
    cursor: usize,
    thresholds: AlarmThresholds,
    temperature_crossed: bool,
    humidity_crossed: bool,
    stats: Option<SensorStats>,
}

impl SessionState {
    pub fn new(batch_capacity: usize) -> Self {
        Self {
            latest: None,
            batch: vec![None; batch_capacity],
            cursor: 0,
            thresholds: AlarmThresholds::default(),
            temperature_crossed: false,
            humidity_crossed: false,
            stats: None,
        }
    }

    /// Apply a single-read reply: replace the latest reading, evaluate
    /// alarms, then notify the single-read view.
    pub fn apply_single(&mut self, reading: Reading, sink: &mut dyn TelemetrySink) {
        self.latest = Some(reading.clone());
        self.evaluate_alarms(&reading, sink);
        sink.on_single_read_updated(&reading);
    }

    /// Apply a batch-read reply: store the reading at the cursor slot,
    /// evaluate alarms, notify the table view for that slot, then advance
    /// the cursor. Returns true when the buffer just filled — the cursor
    /// wraps to 0 and the caller stops the poller.
    pub fn apply_batch(&mut self, reading: Reading, sink: &mut dyn TelemetrySink) -> bool {
        let slot = self.cursor;
        self.latest = Some(reading.clone());
        self.batch[slot] = Some(reading.clone());
        self.evaluate_alarms(&reading, sink);
        sink.on_batch_slot_updated(slot, &reading);

        self.cursor += 1;
        if self.cursor >= self.batch.len() {
            self.cursor = 0;
            info!("Batch buffer full, cursor reset");
            return true;
        }
        false
    }

    /// Replace the statistics snapshot wholesale and notify the stats view.
    pub fn apply_stats(&mut self, stats: SensorStats, sink: &mut dyn TelemetrySink) {
        self.stats = Some(stats);
        sink.on_statistics_updated(&stats);
    }

    /// Replace both limits atomically. Already-latched alarms are not
    /// re-evaluated against the new limits.
    pub fn set_thresholds(&mut self, temperature_limit: f64, humidity_limit: f64) {
        self.thresholds = AlarmThresholds {
            temperature_limit,
            humidity_limit,
        };
        debug!(
            "Alarm thresholds set: temperature {} humidity {}",
            temperature_limit, humidity_limit
        );
    }

    /// A fresh connection starts a fresh alarm session.
    pub fn reset_alarms(&mut self) {
        self.temperature_crossed = false;
        self.humidity_crossed = false;
    }

    /// Latch evaluation. Each latch flips false→true the first time a value
    /// exceeds its limit, raising exactly one notification; later breaches
    /// stay silent until `reset_alarms`. NaN values never compare greater,
    /// so malformed readings cannot trip a latch.
    fn evaluate_alarms(&mut self, reading: &Reading, sink: &mut dyn TelemetrySink) {
        if !self.temperature_crossed && reading.temperature > self.thresholds.temperature_limit {
            self.temperature_crossed = true;
            sink.on_alarm_raised(AlarmKind::Temperature, reading.temperature);
        }
        if !self.humidity_crossed && reading.humidity > self.thresholds.humidity_limit {
            self.humidity_crossed = true;
            sink.on_alarm_raised(AlarmKind::Humidity, reading.humidity);
        }
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.latest.as_ref()
    }

    pub fn thresholds(&self) -> AlarmThresholds {
        self.thresholds
    }

    pub fn stats(&self) -> Option<&SensorStats> {
        self.stats.as_ref()
    }

    pub fn batch_slot(&self, index: usize) -> Option<&Reading> {
        self.batch.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
