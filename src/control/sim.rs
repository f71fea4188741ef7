//! In-memory Click routers for dry runs and tests.
//!
//! Each probe address gets a sender (`src`, `counter_client`, `tr_client`,
//! `sha`) and a receiver (`counter_server`, `tr_server`). Channels are not
//! distinguished: the handler name alone selects the element.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{CallReply, ControlError, ControlTransport};

const STATUS_OK: u16 = 200;
const STATUS_NO_HANDLER: u16 = 511;
const STATUS_HANDLER_ERROR: u16 = 520;

#[derive(Debug, Default, Clone)]
struct RouterState {
    length: u64,
    rate: u64,
    limit: u64,
    shaper_rate: u64,
    active: bool,
    client_count: u64,
    client_interval: f64,
    server_count: u64,
    server_interval: f64,
}

#[derive(Debug, Default)]
struct Network {
    routers: BTreeMap<String, RouterState>,
    failing: BTreeSet<String>,
    calls: Vec<String>,
}

/// A set of simulated probes sharing one lossy medium.
#[derive(Debug, Default)]
pub struct SimulatedNetwork {
    loss: f64,
    inner: Mutex<Network>,
}

impl SimulatedNetwork {
    /// `loss` is the fraction of sent packets that never reach a receiver.
    pub fn new(loss: f64) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
            inner: Mutex::new(Network::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Network> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call to `handler` (e.g. `"counter_server.count"`) fail.
    pub fn fail_handler(&self, handler: &str) {
        self.lock().failing.insert(handler.to_string());
    }

    /// Every command issued so far, as `"<address>:<channel> <command>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Overwrite a probe's counters, e.g. to mimic traffic outside a stint.
    pub fn set_counters(&self, address: &str, client_count: u64, server_count: u64) {
        let mut net = self.lock();
        let router = net.routers.entry(address.to_string()).or_default();
        router.client_count = client_count;
        router.server_count = server_count;
    }

    /// The sender finished: credit the transmission to everyone listening.
    fn transmit(&self, net: &mut Network, sender: &str) {
        let Some(state) = net.routers.get(sender) else {
            return;
        };
        let sent = state.limit;
        let interval = if state.rate > 0 {
            sent as f64 / state.rate as f64
        } else {
            0.0
        };
        let delivered = (sent as f64 * (1.0 - self.loss)).round() as u64;

        for (address, router) in net.routers.iter_mut() {
            if address == sender {
                router.client_count += sent;
                router.client_interval = interval;
            } else {
                router.server_count += delivered;
                router.server_interval = interval;
            }
        }
    }

    fn apply_write(&self, net: &mut Network, address: &str, handler: &str, args: &str) -> u16 {
        let parse = |s: &str| s.trim().parse::<u64>().ok();
        let router = net.routers.entry(address.to_string()).or_default();

        match handler {
            "src.active" => match args.trim() {
                "true" => router.active = true,
                "false" => {
                    let was_active = std::mem::replace(&mut router.active, false);
                    if was_active {
                        self.transmit(net, address);
                    }
                }
                _ => return STATUS_HANDLER_ERROR,
            },
            "src.reset" => router.active = false,
            "src.length" | "src.rate" | "src.limit" | "sha.rate" => {
                let Some(value) = parse(args) else {
                    return STATUS_HANDLER_ERROR;
                };
                match handler {
                    "src.length" => router.length = value,
                    "src.rate" => router.rate = value,
                    "src.limit" => router.limit = value,
                    _ => router.shaper_rate = value,
                }
            }
            "counter_client.reset" => router.client_count = 0,
            "tr_client.reset" => router.client_interval = 0.0,
            "counter_server.reset" => router.server_count = 0,
            "tr_server.reset" => router.server_interval = 0.0,
            _ => return STATUS_NO_HANDLER,
        }
        STATUS_OK
    }

    fn apply_read(net: &mut Network, address: &str, handler: &str) -> Option<String> {
        let router = net.routers.entry(address.to_string()).or_default();
        let value = match handler {
            "counter_client.count" => router.client_count.to_string(),
            "tr_client.interval" => router.client_interval.to_string(),
            "counter_server.count" => router.server_count.to_string(),
            "tr_server.interval" => router.server_interval.to_string(),
            "src.rate" => router.rate.to_string(),
            "src.length" => router.length.to_string(),
            "src.limit" => router.limit.to_string(),
            "src.active" => router.active.to_string(),
            "sha.rate" => router.shaper_rate.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

#[async_trait::async_trait]
impl ControlTransport for SimulatedNetwork {
    async fn write(
        &self,
        address: &str,
        channel: u16,
        command: &str,
    ) -> Result<CallReply, ControlError> {
        let mut net = self.lock();
        net.calls.push(format!("{}:{} {}", address, channel, command));

        let (handler, args) = command.split_once(' ').unwrap_or((command, ""));
        if net.failing.contains(handler) {
            return Ok(CallReply::with_status(command, STATUS_HANDLER_ERROR));
        }
        let status = self.apply_write(&mut net, address, handler, args);
        Ok(CallReply::with_status(command, status))
    }

    async fn read(
        &self,
        address: &str,
        channel: u16,
        command: &str,
    ) -> Result<CallReply, ControlError> {
        let mut net = self.lock();
        net.calls.push(format!("{}:{} {}", address, channel, command));

        let handler = command.trim();
        if net.failing.contains(handler) {
            return Ok(CallReply::with_status(command, STATUS_HANDLER_ERROR));
        }
        Ok(match Self::apply_read(&mut net, address, handler) {
            Some(value) => CallReply::ok(command, Some(value)),
            None => CallReply::with_status(command, STATUS_NO_HANDLER),
        })
    }
}
