//! Joule profiler -- energy and throughput measurement campaigns for WLAN probes.
//!
//! Drives Click-based traffic probes through a list of stints while sampling
//! an Energino power meter, and writes per-stint power, throughput, goodput
//! and loss figures back into the campaign descriptor.

pub mod airtime;
pub mod analysis;
pub mod campaign;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod meter;
pub mod probes;
pub mod report;
pub mod stint;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::Instrument;

use crate::campaign::{CampaignController, CampaignOptions};
use crate::config::ProfilerConfig;
use crate::control::{click::ClickClient, sim::SimulatedNetwork, ControlTransport};
use crate::descriptor::Descriptor;
use crate::meter::{energino::EnerginoMeter, sim::SimulatedMeter, PowerMeter};

/// Packet loss of the simulated medium.
const SIMULATED_LOSS: f64 = 0.02;

/// Run the campaign described by `config`.
///
/// With `simulate` set, the probes and the meter are replaced by in-memory
/// stand-ins so a descriptor can be rehearsed without hardware.
pub async fn run(config: &ProfilerConfig, simulate: bool) -> Result<()> {
    let path = config.campaign.descriptor.as_path();
    let run_id = uuid::Uuid::new_v4();

    async {
        tracing::info!(descriptor = %path.display(), simulate, "starting Joule profiler");

        let descriptor = Descriptor::load(path)?;

        let transport: Arc<dyn ControlTransport> = if simulate {
            Arc::new(SimulatedNetwork::new(SIMULATED_LOSS))
        } else {
            Arc::new(ClickClient::new(config.campaign.call_timeout()))
        };

        let options = CampaignOptions {
            settle_delay: Duration::from_secs(config.campaign.settle_delay_secs),
        };

        let mut campaign = CampaignController::new(
            path,
            descriptor,
            transport,
            &config.radio.hwmode,
            &config.radio.channel,
            config.radio.streams,
            options,
        )?;

        let meter: Box<dyn PowerMeter> = if simulate {
            Box::new(SimulatedMeter::new(
                5.0,
                0.05,
                Duration::from_millis(config.meter.interval_ms.into()),
            ))
        } else {
            let device = &config.meter.device;
            Box::new(
                EnerginoMeter::open(device, config.meter.bps, config.meter.interval_ms)
                    .with_context(|| format!("failed to open meter at {}", device.display()))?,
            )
        };

        campaign.run(meter).await?;
        tracing::info!(
            stints = campaign.descriptor().stints.len(),
            descriptor = %path.display(),
            "campaign complete"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(tracing::info_span!("campaign", %run_id))
    .await
}
