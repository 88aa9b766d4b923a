//! Finite counted poller driving the batch read cadence.
//!
//! One run issues at most `capacity` requests, one per interval, with the
//! first tick landing one interval after `start`. The run ends when the
//! session reports the batch buffer wrapped (all replies arrived) or when
//! the connection goes away.

use log::{debug, warn};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval};

pub struct BatchPoller {
    interval: Duration,
    capacity: usize,
    ticker: Option<Interval>,
    requests_sent: usize,
    running: bool,
}

impl BatchPoller {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            interval,
            capacity,
            ticker: None,
            requests_sent: 0,
            running: false,
        }
    }

    /// Begin a run. Returns false (and changes nothing) if a run is already
    /// active — overlapping timers are explicitly disallowed.
    pub fn start(&mut self) -> bool {
        if self.running {
            warn!("Batch run already active, ignoring start");
            return false;
        }
        self.running = true;
        self.requests_sent = 0;
        self.ticker = Some(interval_at(Instant::now() + self.interval, self.interval));
        debug!(
            "Batch run started: {} requests every {:?}",
            self.capacity, self.interval
        );
        true
    }

    /// End the run and cancel any future ticks.
    pub fn stop(&mut self) {
        if self.running {
            debug!("Batch run stopped after {} requests", self.requests_sent);
        }
        self.running = false;
        self.requests_sent = 0;
        self.ticker = None;
    }

    /// A run is in progress (replies may still be outstanding after the
    /// ticker has hit its cap).
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// More ticks are due for the current run.
    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Wait for the next tick. Counts the request it is about to trigger and
    /// disables the ticker once the cap is reached. Pends forever while no
    /// ticker is armed, so a disabled select branch never fires.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }

        self.requests_sent += 1;
        if self.requests_sent >= self.capacity {
            debug!("Batch request cap reached, no further ticks");
            self.ticker = None;
        }
    }
}
