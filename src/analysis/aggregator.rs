//! Per-stint results from probe counters and the stint's power window.

use serde::Serialize;
use tracing::info;

use crate::analysis::stats::{PowerStats, StatsError};
use crate::descriptor::Stint;
use crate::probes::ProbeStatus;
use crate::report::format_bitrate;

/// Derived figures for one executed stint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StintResult {
    pub power: PowerStats,
    pub throughput_bps: f64,
    pub goodput_bps: f64,
    /// `(sent - received) / sent`. Negative when the receiver counted more
    /// than the sender, which is reported as-is.
    pub loss_ratio: f64,
}

/// Combines probe counters and the power window into a [`StintResult`].
pub struct ResultAggregator;

impl ResultAggregator {
    /// Power-only summary, used for the idle baseline.
    pub fn aggregate_power(readings: &[f64]) -> Result<PowerStats, StatsError> {
        let power = PowerStats::from_readings(readings)?;
        info!(
            median = power.median,
            mean = power.mean,
            ci = power.ci,
            samples = readings.len(),
            "power consumption"
        );
        Ok(power)
    }

    pub fn aggregate(
        stint: &Stint,
        src: &ProbeStatus,
        dst: &ProbeStatus,
        readings: &[f64],
    ) -> Result<StintResult, StatsError> {
        let power = Self::aggregate_power(readings)?;

        info!(packets = src.client_count, interval_s = src.client_interval, "client sent");
        info!(packets = dst.server_count, interval_s = dst.server_interval, "server received");

        let throughput_bps = bitrate(src.client_count, stint.packetsize_bytes, src.client_interval);
        let goodput_bps = bitrate(dst.server_count, stint.packetsize_bytes, dst.server_interval);
        let loss_ratio = loss_ratio(src.client_count, dst.server_count);

        info!(throughput = %format_bitrate(throughput_bps), "actual throughput");
        info!(goodput = %format_bitrate(goodput_bps), "actual goodput");
        info!(
            sent = src.client_count,
            received = dst.server_count,
            loss_ratio,
            "packet error rate"
        );

        Ok(StintResult {
            power,
            throughput_bps,
            goodput_bps,
            loss_ratio,
        })
    }
}

/// Payload bits per second; a zero interval yields zero.
fn bitrate(packets: u64, packet_size: u32, interval_s: f64) -> f64 {
    if interval_s == 0.0 {
        return 0.0;
    }
    (packets as f64 * packet_size as f64 * 8.0) / interval_s
}

fn loss_ratio(sent: u64, received: u64) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    (sent as f64 - received as f64) / sent as f64
}
