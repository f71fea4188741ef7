//! Background power sampling loop.
//!
//! The loop runs on tokio's blocking pool because meter reads block on the
//! device. Readings go into a single mutex-guarded buffer that the
//! orchestration side clears and snapshots between stints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::PowerMeter;

/// Metric requested from the meter on every cycle.
pub const POWER_METRIC: &str = "power";

/// Shared, append-only (between resets) sequence of power readings.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    inner: Arc<Mutex<Vec<f64>>>,
}

impl Readings {
    fn lock(&self) -> MutexGuard<'_, Vec<f64>> {
        // plain floats: a panic mid-push cannot leave the Vec inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, value: f64) {
        self.lock().push(value);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.lock().clone()
    }
}

/// Log every this many consecutive failures while a meter stays down.
const FAILURE_LOG_EVERY: u64 = 100;

/// Pull one reading from `meter` and append it. A failed fetch appends 0.0.
///
/// `failures` counts consecutive failed fetches; only the first failure of a
/// streak and every [`FAILURE_LOG_EVERY`]th after it are logged.
pub fn sample_once<M: PowerMeter + ?Sized>(
    meter: &mut M,
    readings: &Readings,
    failures: &mut u64,
) {
    let value = match meter.fetch(POWER_METRIC) {
        Ok(v) => {
            if *failures > 0 {
                info!(meter = meter.name(), failed = *failures, "power meter recovered");
                *failures = 0;
            }
            v
        }
        Err(e) => {
            *failures += 1;
            if *failures == 1 || *failures % FAILURE_LOG_EVERY == 0 {
                warn!(
                    meter = meter.name(),
                    error = %e,
                    consecutive = *failures,
                    "power fetch failed, recording 0.0"
                );
            }
            0.0
        }
    };
    readings.push(value);
}

/// Continuously samples a [`PowerMeter`] until shut down.
pub struct PowerSampler {
    readings: Readings,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for PowerSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerSampler {
    pub fn new() -> Self {
        Self {
            readings: Readings::default(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the sampling loop. Calling `start` on a running sampler is a no-op;
    /// after `shutdown` it spawns a fresh loop.
    pub fn start<M: PowerMeter + 'static>(&mut self, mut meter: M) {
        if self.is_running() {
            warn!("power sampler already running");
            return;
        }

        info!(meter = meter.name(), "starting power sampler");
        // a loop still draining after shutdown keeps its own, raised, flag
        self.stop = Arc::new(AtomicBool::new(false));

        let readings = self.readings.clone();
        let stop = self.stop.clone();
        self.handle = Some(tokio::task::spawn_blocking(move || {
            let mut failures = 0;
            while !stop.load(Ordering::Acquire) {
                sample_once(&mut meter, &readings, &mut failures);
            }
            info!(meter = meter.name(), "power sampler stopped");
        }));
    }

    /// True while a loop is sampling and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Discard everything sampled so far.
    pub fn reset_readings(&self) {
        self.readings.clear();
    }

    /// Copy of the current buffer.
    pub fn get_readings(&self) -> Vec<f64> {
        self.readings.snapshot()
    }

    /// Handle on the shared buffer.
    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    /// Ask the loop to exit at its next iteration boundary. Does not wait.
    pub fn shutdown(&self) {
        info!("stopping power sampler");
        self.stop.store(true, Ordering::Release);
    }

    /// Shut down and wait for the loop to finish its in-flight fetch.
    pub async fn join(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "power sampler task ended abnormally");
            }
        }
    }
}

impl Drop for PowerSampler {
    fn drop(&mut self) {
        // the blocking loop would otherwise keep the runtime from shutting down
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::MeterError;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays a fixed script of fetch outcomes, then keeps returning 1.0.
    struct ScriptedMeter {
        script: VecDeque<Result<f64, MeterError>>,
    }

    impl ScriptedMeter {
        fn new(script: Vec<Result<f64, MeterError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl PowerMeter for ScriptedMeter {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&mut self, _metric: &str) -> Result<f64, MeterError> {
            std::thread::sleep(Duration::from_millis(1));
            self.script.pop_front().unwrap_or(Ok(1.0))
        }
    }

    #[test]
    fn test_each_cycle_appends_one_reading() {
        let readings = Readings::default();
        let mut meter = ScriptedMeter::new(vec![Ok(2.5), Ok(3.5), Ok(4.5)]);
        let mut failures = 0;
        for _ in 0..3 {
            sample_once(&mut meter, &readings, &mut failures);
        }
        assert_eq!(readings.snapshot(), vec![2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_failed_fetch_records_zero() {
        let readings = Readings::default();
        let mut meter =
            ScriptedMeter::new(vec![Ok(2.0), Err(MeterError::Disconnected), Ok(3.0)]);
        let mut failures = 0;
        sample_once(&mut meter, &readings, &mut failures);
        sample_once(&mut meter, &readings, &mut failures);
        assert_eq!(failures, 1);
        sample_once(&mut meter, &readings, &mut failures);
        assert_eq!(failures, 0);
        assert_eq!(readings.snapshot(), vec![2.0, 0.0, 3.0]);
    }

    #[test]
    fn test_reset_empties_buffer() {
        let sampler = PowerSampler::new();
        sampler.readings().push(1.0);
        sampler.readings().push(2.0);
        sampler.reset_readings();
        assert!(sampler.get_readings().is_empty());
    }

    #[tokio::test]
    async fn test_loop_collects_until_shutdown() {
        let mut sampler = PowerSampler::new();
        sampler.start(ScriptedMeter::new(vec![]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sampler.get_readings().is_empty());

        sampler.reset_readings();
        sampler.join().await;
        assert!(!sampler.is_running());

        // nothing is appended once the loop has exited
        let settled = sampler.get_readings().len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sampler.get_readings().len(), settled);
    }

    #[tokio::test]
    async fn test_restart_after_shutdown_samples_again() {
        let mut sampler = PowerSampler::new();
        sampler.start(ScriptedMeter::new(vec![]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        sampler.shutdown();
        assert!(!sampler.is_running());

        // restart before the first loop has necessarily drained
        sampler.start(ScriptedMeter::new(vec![]));
        assert!(sampler.is_running());
        sampler.reset_readings();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sampler.get_readings().is_empty());

        sampler.join().await;
        assert!(!sampler.is_running());
    }
}
