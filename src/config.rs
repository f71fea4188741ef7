//! TOML configuration for the profiler.
//!
//! Every section has compiled-in defaults; a config file only needs the
//! fields it changes, and command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "JOULE_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/joule/profiler.toml";

/// Everything the profiler reads from its TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProfilerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read profiler config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("invalid profiler config {}", path.display()))?;
        debug!(path = %path.display(), "profiler config loaded");
        Ok(config)
    }

    /// Pick the configuration for this run.
    ///
    /// An `explicit` path (`--config`) must load. Otherwise `JOULE_CONFIG`
    /// and then [`SYSTEM_CONFIG_PATH`] are tried in turn; a candidate that
    /// fails to load is skipped with a warning. With no usable file the
    /// built-in defaults apply.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .into_iter()
            .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)));

        for path in candidates {
            if !path.exists() {
                debug!(path = %path.display(), "no profiler config here");
                continue;
            }
            match Self::load(&path) {
                Ok(config) => return Ok(config),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "skipping profiler config"
                ),
            }
        }

        debug!("profiler running on built-in defaults");
        Ok(Self::default())
    }
}

/// Medium used by the airtime model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub hwmode: String,
    pub channel: String,
    pub streams: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            hwmode: "11a".to_string(),
            channel: "20".to_string(),
            streams: 1,
        }
    }
}

/// Energino serial meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub device: PathBuf,
    /// Serial line speed.
    pub bps: u32,
    /// Meter reporting interval in milliseconds.
    pub interval_ms: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            bps: 115200,
            interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Campaign descriptor, rewritten with results.
    pub descriptor: PathBuf,
    /// Pause before each stint (seconds).
    pub settle_delay_secs: u64,
    /// Upper bound on a single probe control call (seconds); 0 disables.
    pub call_timeout_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            descriptor: PathBuf::from("./joule.json"),
            settle_delay_secs: 5,
            call_timeout_secs: 10,
        }
    }
}

impl CampaignConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Log to this file (truncated at start) instead of stdout.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = ProfilerConfig::default();

        assert_eq!(cfg.radio.hwmode, "11a");
        assert_eq!(cfg.radio.channel, "20");
        assert_eq!(cfg.radio.streams, 1);

        assert_eq!(cfg.meter.device, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(cfg.meter.bps, 115200);
        assert_eq!(cfg.meter.interval_ms, 200);

        assert_eq!(cfg.campaign.descriptor, PathBuf::from("./joule.json"));
        assert_eq!(cfg.campaign.settle_delay_secs, 5);
        assert_eq!(cfg.campaign.call_timeout(), Some(Duration::from_secs(10)));

        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.logging.file.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[radio]
hwmode = "11g"

[campaign]
call_timeout_secs = 0
"#;
        let cfg: ProfilerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.radio.hwmode, "11g");
        assert_eq!(cfg.radio.channel, "20");
        assert_eq!(cfg.campaign.call_timeout(), None);
        assert_eq!(cfg.campaign.settle_delay_secs, 5);
        assert_eq!(cfg.meter.bps, 115200);
    }

    #[test]
    fn test_explicit_path_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiler.toml");
        assert!(ProfilerConfig::resolve(Some(&path)).is_err());

        std::fs::write(&path, "[meter]\ndevice = \"/dev/ttyUSB1\"\nbps = 57600\n").unwrap();
        let cfg = ProfilerConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.meter.device, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(cfg.meter.bps, 57600);
        assert_eq!(cfg.meter.interval_ms, 200);
    }
}
