//! Campaign orchestration: idle baseline, then every stint in order, with the
//! descriptor rewritten after each step.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::airtime::{AirtimeError, RadioMode};
use crate::analysis::{ResultAggregator, StatsError};
use crate::control::{ControlError, ControlTransport};
use crate::descriptor::{Descriptor, DescriptorError, StintStats};
use crate::meter::{PowerMeter, PowerSampler};
use crate::probes::ProbeController;
use crate::stint::{StintError, StintRunner};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Airtime(#[from] AirtimeError),

    #[error("stint {index} references unknown probe {id:?}")]
    UnknownProbe { index: usize, id: String },

    #[error("invalid idle duration {0} s")]
    BadIdleDuration(f64),

    #[error(transparent)]
    Stint(#[from] StintError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignPhase {
    Idle,
    Baseline,
    RunningStints(usize),
    Done,
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignPhase::Idle => write!(f, "idle"),
            CampaignPhase::Baseline => write!(f, "baseline"),
            CampaignPhase::RunningStints(i) => write!(f, "stint {}", i + 1),
            CampaignPhase::Done => write!(f, "done"),
        }
    }
}

/// Timing knobs for a campaign.
#[derive(Debug, Clone, Copy)]
pub struct CampaignOptions {
    /// Pause before each stint so the medium settles.
    pub settle_delay: Duration,
}

impl Default for CampaignOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
        }
    }
}

pub struct CampaignController {
    path: PathBuf,
    descriptor: Descriptor,
    probes: BTreeMap<String, ProbeController>,
    runner: StintRunner,
    sampler: PowerSampler,
    options: CampaignOptions,
    phase: CampaignPhase,
}

impl CampaignController {
    /// Build the controller. The radio mode is resolved here so an unknown
    /// mode aborts before anything touches the probes or the meter.
    pub fn new(
        path: &Path,
        descriptor: Descriptor,
        transport: Arc<dyn ControlTransport>,
        hwmode: &str,
        channel: &str,
        streams: u32,
        options: CampaignOptions,
    ) -> Result<Self, CampaignError> {
        let mode = RadioMode::lookup(hwmode, channel, streams)?;

        let probes = descriptor
            .probes
            .iter()
            .map(|(id, spec)| (id.clone(), ProbeController::new(id, spec, transport.clone())))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            descriptor,
            probes,
            runner: StintRunner::new(mode),
            sampler: PowerSampler::new(),
            options,
            phase: CampaignPhase::Idle,
        })
    }

    pub fn phase(&self) -> CampaignPhase {
        self.phase
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn enter(&mut self, phase: CampaignPhase) {
        info!(from = %self.phase, to = %phase, "campaign phase");
        self.phase = phase;
    }

    /// Run the whole campaign against `meter`. The sampler is stopped on
    /// every exit path; whatever was persisted last stays on disk.
    pub async fn run<M: PowerMeter + 'static>(&mut self, meter: M) -> Result<(), CampaignError> {
        self.sampler.start(meter);
        let outcome = self.run_phases().await;
        self.sampler.shutdown();

        match &outcome {
            Ok(()) => self.enter(CampaignPhase::Done),
            Err(e) => error!(phase = %self.phase, error = %e, "campaign aborted"),
        }
        outcome
    }

    async fn run_phases(&mut self) -> Result<(), CampaignError> {
        self.enter(CampaignPhase::Baseline);
        self.run_idle().await?;

        info!(stints = self.descriptor.stints.len(), "running stints");
        for index in 0..self.descriptor.stints.len() {
            tokio::time::sleep(self.options.settle_delay).await;
            self.enter(CampaignPhase::RunningStints(index));
            self.run_stint(index).await?;
        }
        Ok(())
    }

    async fn run_idle(&mut self) -> Result<(), CampaignError> {
        let duration_s = self.descriptor.idle.duration_s;
        let duration = Duration::try_from_secs_f64(duration_s)
            .map_err(|_| CampaignError::BadIdleDuration(duration_s))?;

        info!(duration_s, "evaluating idle power consumption");
        self.sampler.reset_readings();
        tokio::time::sleep(duration).await;

        let power = ResultAggregator::aggregate_power(&self.sampler.get_readings())?;
        self.descriptor.idle.stats = Some(StintStats::from(power));
        self.descriptor.persist(&self.path)?;
        Ok(())
    }

    fn probe(&self, index: usize, key: String) -> Result<&ProbeController, CampaignError> {
        self.probes
            .get(&key)
            .ok_or(CampaignError::UnknownProbe { index, id: key })
    }

    async fn run_stint(&mut self, index: usize) -> Result<(), CampaignError> {
        let stint = &self.descriptor.stints[index];
        let src = self.probe(index, stint.src.key())?;
        let dst = self.probe(index, stint.dst.key())?;

        info!(
            stint = index + 1,
            total = self.descriptor.stints.len(),
            src = src.id(),
            src_address = %src.address(),
            dst = dst.id(),
            dst_address = %dst.address(),
            dst_port = dst.receiver_port(),
            "running profile"
        );

        self.runner.run(stint, src, dst, &self.sampler).await?;
        let readings = self.sampler.get_readings();

        let src_status = src.status().await?;
        let dst_status = dst.status().await?;
        let result = ResultAggregator::aggregate(stint, &src_status, &dst_status, &readings)?;

        self.descriptor.stints[index].stats = Some(StintStats::from(result));
        self.descriptor.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::sim::SimulatedNetwork;
    use crate::meter::sim::SimulatedMeter;

    const TWO_PROBES: &str = r#"{
        "probes": {
            "a": {"ip": "10.0.0.1", "receiver_control": 7777, "receiver_port": 5555},
            "b": {"ip": "10.0.0.2", "receiver_control": 7777, "receiver_port": 5555}
        },
        "idle": {"duration_s": 0.1},
        "stints": [
            {"src": "a", "dst": "b",
              "packetsize_bytes": 64, "bitrate_mbps": 0.5, "duration_s": 0.1},
            {"src": "a", "dst": "ghost",
              "packetsize_bytes": 64, "bitrate_mbps": 0.5, "duration_s": 0.1}
        ]
    }"#;

    fn quick() -> CampaignOptions {
        CampaignOptions {
            settle_delay: Duration::ZERO,
        }
    }

    fn meter() -> SimulatedMeter {
        SimulatedMeter::new(5.0, 0.1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_unknown_radio_mode_fails_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = Descriptor::from_json(TWO_PROBES).unwrap();
        let net = Arc::new(SimulatedNetwork::new(0.0));

        let path = dir.path().join("c.json");
        let err = CampaignController::new(&path, descriptor, net.clone(), "11z", "20", 1, quick())
            .err()
            .unwrap();
        assert!(matches!(err, CampaignError::Airtime(AirtimeError::UnknownMode { .. })));
        assert!(net.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_probe_aborts_after_persisting_earlier_stints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let descriptor = Descriptor::from_json(TWO_PROBES).unwrap();
        descriptor.persist(&path).unwrap();

        let net = Arc::new(SimulatedNetwork::new(0.0));
        let mut campaign =
            CampaignController::new(&path, descriptor, net, "11a", "20", 1, quick()).unwrap();

        let err = campaign.run(meter()).await.unwrap_err();
        assert!(matches!(err, CampaignError::UnknownProbe { index: 1, .. }));
        assert_eq!(campaign.phase(), CampaignPhase::RunningStints(1));

        let on_disk = Descriptor::load(&path).unwrap();
        assert!(on_disk.idle.stats.is_some());
        assert!(on_disk.stints[0].stats.is_some());
        assert!(on_disk.stints[1].stats.is_none());
    }

    #[tokio::test]
    async fn test_status_failure_aborts_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let descriptor = Descriptor::from_json(TWO_PROBES).unwrap();

        let net = Arc::new(SimulatedNetwork::new(0.0));
        net.fail_handler("tr_server.interval");
        let mut campaign =
            CampaignController::new(&path, descriptor, net, "11a", "20", 1, quick()).unwrap();

        let err = campaign.run(meter()).await.unwrap_err();
        assert!(matches!(err, CampaignError::Control(ControlError::MissingValue { .. })));
        assert!(Descriptor::load(&path).unwrap().stints[0].stats.is_none());
    }
}
