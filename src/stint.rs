//! Execution of a single measurement stint.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::airtime::{AirtimeError, RadioMode};
use crate::control::ControlError;
use crate::descriptor::Stint;
use crate::meter::PowerSampler;
use crate::probes::{ProbeController, SessionState};
use crate::report::format_bitrate;

#[derive(Debug, Error)]
pub enum StintError {
    #[error(transparent)]
    Airtime(#[from] AirtimeError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("invalid stint duration {0} s")]
    BadDuration(f64),
}

/// What the sender was configured with for a stint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StintPlan {
    pub max_safe_rate_hz: u64,
    pub session: SessionState,
}

/// Drives one stint: reset, configure, transmit for the stint duration, stop.
pub struct StintRunner {
    mode: RadioMode,
}

impl StintRunner {
    pub fn new(mode: RadioMode) -> Self {
        Self { mode }
    }

    /// Run `stint` from `src` to `dst`. The sampler's buffer is cleared right
    /// before transmission starts, so after this returns it holds exactly the
    /// stint's power window.
    pub async fn run(
        &self,
        stint: &Stint,
        src: &ProbeController,
        dst: &ProbeController,
        sampler: &PowerSampler,
    ) -> Result<StintPlan, StintError> {
        let duration = Duration::try_from_secs_f64(stint.duration_s)
            .map_err(|_| StintError::BadDuration(stint.duration_s))?;

        let tps = self.mode.max_safe_rate_hz(stint.packetsize_bytes)?;
        info!(medium = %self.mode, tps, "maximum tps for this medium");
        info!(
            goodput = %format_bitrate(stint.packetsize_bytes as f64 * 8.0 * tps as f64),
            "maximum theoretical goodput"
        );

        src.reset().await;
        dst.reset().await;

        let session = src.configure(stint, tps).await?;

        sampler.reset_readings();

        src.start().await?;
        tokio::time::sleep(duration).await;
        src.stop().await?;

        Ok(StintPlan {
            max_safe_rate_hz: tps,
            session,
        })
    }
}
