//! Turning raw counters and power readings into stint results.

pub mod aggregator;
pub mod stats;

pub use aggregator::{ResultAggregator, StintResult};
pub use stats::{PowerStats, StatsError};
