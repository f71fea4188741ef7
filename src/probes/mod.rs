//! Remote probe control: one [`ProbeController`] per Click probe.
//!
//! A probe runs two Click daemons. The receiver listens on
//! `receiver_control`; the sender on `receiver_control + 1`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{error, info};

use crate::control::{CallReply, ControlError, ControlTransport};
use crate::descriptor::{ProbeSpec, Stint};
use crate::report::format_bitrate;

/// Session defaults restored by every reset.
pub const DEFAULT_PACKET_RATE: u64 = 10;
pub const DEFAULT_PACKET_SIZE: u32 = 64;

/// Packet counters and measurement intervals read back from a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProbeStatus {
    pub client_count: u64,
    pub client_interval: f64,
    pub server_count: u64,
    pub server_interval: f64,
}

/// Locally tracked sender configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub packet_rate: u64,
    pub packet_size: u32,
    pub limit: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            packet_rate: DEFAULT_PACKET_RATE,
            packet_size: DEFAULT_PACKET_SIZE,
            limit: 0,
        }
    }
}

pub struct ProbeController {
    id: String,
    address: String,
    sender_control: u16,
    receiver_control: u16,
    receiver_port: u16,
    transport: Arc<dyn ControlTransport>,
    session: Mutex<SessionState>,
}

impl ProbeController {
    pub fn new(id: &str, spec: &ProbeSpec, transport: Arc<dyn ControlTransport>) -> Self {
        Self {
            id: id.to_string(),
            address: spec.ip.clone(),
            sender_control: spec.sender_control(),
            receiver_control: spec.receiver_control,
            receiver_port: spec.receiver_port,
            transport,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn receiver_port(&self) -> u16 {
        self.receiver_port
    }

    pub fn session(&self) -> SessionState {
        *self.lock_session()
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn write_sender(&self, command: &str) -> Result<CallReply, ControlError> {
        self.transport
            .write(&self.address, self.sender_control, command)
            .await
            .map(CallReply::logged)
    }

    async fn write_receiver(&self, command: &str) -> Result<CallReply, ControlError> {
        self.transport
            .write(&self.address, self.receiver_control, command)
            .await
            .map(CallReply::logged)
    }

    async fn read(&self, channel: u16, command: &str) -> Result<CallReply, ControlError> {
        self.transport
            .read(&self.address, channel, command)
            .await
            .map(CallReply::logged)
    }

    /// Best-effort reset of both daemons. Failing calls are logged and skipped.
    pub async fn reset(&self) {
        info!(address = %self.address, port = self.sender_control, "resetting click tx daemon");
        let sender_resets = [
            "src.active false",
            "src.reset",
            "counter_client.reset",
            "tr_client.reset",
        ];
        for command in sender_resets {
            if let Err(e) = self.write_sender(command).await {
                error!(address = %self.address, %command, error = %e, "reset call failed");
            }
        }

        info!(address = %self.address, port = self.receiver_control, "resetting click rx daemon");
        for command in ["counter_server.reset", "tr_server.reset"] {
            if let Err(e) = self.write_receiver(command).await {
                error!(address = %self.address, %command, error = %e, "reset call failed");
            }
        }

        *self.lock_session() = SessionState::default();
    }

    /// Push the stint's packet size, rate and limit to the sender, and cap the
    /// shaper at `max_safe_rate_hz`.
    pub async fn configure(
        &self,
        stint: &Stint,
        max_safe_rate_hz: u64,
    ) -> Result<SessionState, ControlError> {
        let bits_per_packet = stint.packetsize_bytes as f64 * 8.0;
        let packet_rate = (stint.target_bitrate_bps() / bits_per_packet).floor() as u64;
        let limit = (packet_rate as f64 * stint.duration_s).floor() as u64;

        let session = SessionState {
            packet_rate,
            packet_size: stint.packetsize_bytes,
            limit,
        };
        *self.lock_session() = session;

        info!(
            packets = limit,
            payload_bytes = stint.packetsize_bytes,
            rate_pps = packet_rate,
            duration_s = stint.duration_s,
            target = %format_bitrate(stint.target_bitrate_bps()),
            "configuring stint"
        );

        self.write_sender(&format!("src.length {}", session.packet_size)).await?;
        self.write_sender(&format!("src.rate {}", session.packet_rate)).await?;
        self.write_sender(&format!("src.limit {}", session.limit)).await?;
        self.write_sender(&format!("sha.rate {}", max_safe_rate_hz)).await?;

        Ok(session)
    }

    pub async fn start(&self) -> Result<(), ControlError> {
        info!(address = %self.address, "starting probe");
        self.write_sender("src.active true").await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        info!(address = %self.address, "stopping probe");
        self.write_sender("src.active false").await?;
        Ok(())
    }

    /// Read all four counters. Any failed read aborts the whole status call.
    pub async fn status(&self) -> Result<ProbeStatus, ControlError> {
        info!(address = %self.address, "fetching click daemon status");

        let tx = self.sender_control;
        let rx = self.receiver_control;
        let client_count = self.read(tx, "counter_client.count").await?.parse_value()?;
        let client_interval = self.read(tx, "tr_client.interval").await?.parse_value()?;
        let server_count = self.read(rx, "counter_server.count").await?.parse_value()?;
        let server_interval = self.read(rx, "tr_server.interval").await?.parse_value()?;

        Ok(ProbeStatus {
            client_count,
            client_interval,
            server_count,
            server_interval,
        })
    }
}
