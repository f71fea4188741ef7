//! Remote probe control interface.
//!
//! Probes are Click routers exposing element handlers over a control socket.
//! A command is `"<element>.<handler> [args]"`; writes change configuration,
//! reads return the handler's current value.

pub mod click;
pub mod sim;

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control connection to {address}:{channel} failed: {source}")]
    Io {
        address: String,
        channel: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("control call to {address}:{channel} timed out after {timeout:?}")]
    Timeout {
        address: String,
        channel: u16,
        timeout: Duration,
    },

    #[error("control protocol violation from {address}:{channel}: {detail}")]
    Protocol {
        address: String,
        channel: u16,
        detail: String,
    },

    #[error("{command:?} returned no value (status {status})")]
    MissingValue { command: String, status: u16 },

    #[error("{command:?} returned unparsable value {value:?}")]
    BadValue { command: String, value: String },
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReply {
    /// Three-digit status code; 2xx means success.
    pub status: u16,
    /// The command as sent.
    pub command: String,
    /// Handler value for successful reads.
    pub value: Option<String>,
}

impl CallReply {
    pub fn ok(command: &str, value: Option<String>) -> Self {
        Self {
            status: 200,
            command: command.to_string(),
            value,
        }
    }

    /// A reply carrying only a status line.
    pub fn with_status(command: &str, status: u16) -> Self {
        Self {
            status,
            command: command.to_string(),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Log the reply: debug on success, error otherwise.
    pub fn logged(self) -> Self {
        if self.is_success() {
            debug!(command = %self.command, status = self.status, "control call");
        } else {
            error!(command = %self.command, status = self.status, "control call");
        }
        self
    }

    /// Parse the returned value, failing if it is absent or malformed.
    pub fn parse_value<T: std::str::FromStr>(&self) -> Result<T, ControlError> {
        let raw = self.value.as_deref().ok_or_else(|| ControlError::MissingValue {
            command: self.command.clone(),
            status: self.status,
        })?;
        raw.trim().parse().map_err(|_| ControlError::BadValue {
            command: self.command.clone(),
            value: raw.to_string(),
        })
    }
}

/// Request/response access to probe control channels.
///
/// A non-success status is reported in the [`CallReply`], not as an `Err`;
/// `Err` means the call itself could not be completed.
#[async_trait::async_trait]
pub trait ControlTransport: Send + Sync {
    async fn write(&self, address: &str, channel: u16, command: &str)
        -> Result<CallReply, ControlError>;

    async fn read(&self, address: &str, channel: u16, command: &str)
        -> Result<CallReply, ControlError>;
}
