use std::time::Instant;

use tracing::info;

#[derive(Debug, Clone)]
pub struct Stats {
    pub sent: u64,
    pub received: u64,
    pub timeouts: u64,
    t0: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            sent: 0,
            received: 0,
            timeouts: 0,
            t0: Instant::now(),
        }
    }
    pub fn inc_sent(&mut self) {
        self.sent += 1;
    }
    pub fn inc_received(&mut self) {
        self.received += 1;
    }
    pub fn inc_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn log_summary(&self) {
        let dur = self.t0.elapsed().as_secs_f64().max(1e-3);
        info!(
            "[session] sent={} received={} timed_out={} over {:.1}s => {:.1} frames/s",
            self.sent,
            self.received,
            self.timeouts,
            dur,
            (self.sent + self.received) as f64 / dur
        );
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
