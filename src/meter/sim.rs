//! Simulated meter for dry runs without hardware.

use std::time::Duration;

use rand::Rng;

use super::{MeterError, PowerMeter};

pub struct SimulatedMeter {
    base_watts: f64,
    jitter_watts: f64,
    interval: Duration,
    fail_every: Option<u64>,
    fetches: u64,
}

impl SimulatedMeter {
    pub fn new(base_watts: f64, jitter_watts: f64, interval: Duration) -> Self {
        Self {
            base_watts,
            jitter_watts,
            interval,
            fail_every: None,
            fetches: 0,
        }
    }

    /// Make every `n`th fetch fail.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

impl PowerMeter for SimulatedMeter {
    fn name(&self) -> &str {
        "simulated"
    }

    fn fetch(&mut self, metric: &str) -> Result<f64, MeterError> {
        if metric != "power" {
            return Err(MeterError::UnknownMetric(metric.to_string()));
        }
        std::thread::sleep(self.interval);
        self.fetches += 1;

        if let Some(n) = self.fail_every {
            if self.fetches % n == 0 {
                return Err(MeterError::Simulated);
            }
        }

        let jitter = if self.jitter_watts > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_watts..=self.jitter_watts)
        } else {
            0.0
        };
        Ok(self.base_watts + jitter)
    }
}
