//! Campaign descriptor: the JSON document listing probes, the idle baseline
//! and the stints to run. Results are written back into the same file.
//!
//! Known fields are declared in alphabetical order so rewrites come out with
//! sorted keys; unknown fields are carried through untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::analysis::{PowerStats, StintResult};

type Extra = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write descriptor {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A probe id as written in a stint: either `"ap1"` or `1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeRef {
    Number(u64),
    Name(String),
}

impl ProbeRef {
    /// Key into the `probes` mapping.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProbeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeRef::Number(n) => write!(f, "{}", n),
            ProbeRef::Name(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ProbeRef {
    fn from(s: &str) -> Self {
        ProbeRef::Name(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub ip: String,
    pub receiver_control: u16,
    pub receiver_port: u16,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ProbeSpec {
    pub fn sender_control(&self) -> u16 {
        self.receiver_control.wrapping_add(1)
    }
}

/// Results attached to a stint. Traffic fields are absent for the idle stint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StintStats {
    pub ci: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub losses: Option<f64>,
    pub mean: f64,
    pub median: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp: Option<f64>,
}

impl From<PowerStats> for StintStats {
    fn from(power: PowerStats) -> Self {
        Self {
            ci: power.ci,
            gp: None,
            losses: None,
            mean: power.mean,
            median: power.median,
            tp: None,
        }
    }
}

impl From<StintResult> for StintStats {
    fn from(result: StintResult) -> Self {
        Self {
            gp: Some(result.goodput_bps),
            losses: Some(result.loss_ratio),
            tp: Some(result.throughput_bps),
            ..Self::from(result.power)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleStint {
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StintStats>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stint {
    pub bitrate_mbps: f64,
    pub dst: ProbeRef,
    pub duration_s: f64,
    pub packetsize_bytes: u32,
    pub src: ProbeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StintStats>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Stint {
    pub fn target_bitrate_bps(&self) -> f64 {
        self.bitrate_mbps * 1_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub idle: IdleStint,
    pub probes: BTreeMap<String, ProbeSpec>,
    pub stints: Vec<Stint>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Descriptor {
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| DescriptorError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Pretty JSON with four-space indentation and a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Rewrite the descriptor at `path`. The new content is written to a
    /// sibling temp file and renamed over the original.
    pub fn persist(&self, path: &Path) -> Result<(), DescriptorError> {
        let write_err = |source: std::io::Error| DescriptorError::Write {
            path: path.to_path_buf(),
            source,
        };

        let json = self
            .to_json()
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = std::fs::File::create(&tmp_path).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        std::fs::rename(&tmp_path, path).map_err(write_err)?;

        debug!(path = %path.display(), "descriptor persisted");
        Ok(())
    }
}
