//! Power meter backends and the background power sampler.

pub mod energino;
pub mod sampler;
pub mod sim;

use thiserror::Error;

pub use sampler::PowerSampler;

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("meter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("meter stream closed")]
    Disconnected,

    #[error("malformed meter record: {0:?}")]
    Malformed(String),

    #[error("metric {0:?} not reported by this meter")]
    UnknownMetric(String),

    #[error("unsupported serial speed {0} bps")]
    UnsupportedSpeed(u32),

    #[error("simulated fetch failure")]
    Simulated,
}

/// A device that reports instantaneous electrical readings.
///
/// `fetch` blocks until the meter produces its next record, so the meter's
/// own reporting interval paces whoever polls it.
pub trait PowerMeter: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Read the next value of `metric` (e.g. `"power"`).
    fn fetch(&mut self, metric: &str) -> Result<f64, MeterError>;
}

impl<M: PowerMeter + ?Sized> PowerMeter for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&mut self, metric: &str) -> Result<f64, MeterError> {
        (**self).fetch(metric)
    }
}
