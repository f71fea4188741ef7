//! Energino serial power meter.
//!
//! The meter streams one text record per reporting interval:
//!
//! ```text
//! #Energino:<firmware>,<voltage>,<current>,<power>,...
//! ```
//!
//! Lines that don't start with `#` are firmware chatter and are skipped.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use super::{MeterError, PowerMeter};

/// One decoded meter record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnerginoRecord {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl EnerginoRecord {
    pub fn metric(&self, name: &str) -> Result<f64, MeterError> {
        match name {
            "voltage" => Ok(self.voltage),
            "current" => Ok(self.current),
            "power" => Ok(self.power),
            other => Err(MeterError::UnknownMetric(other.to_string())),
        }
    }
}

/// Parse a single record line. Returns `Ok(None)` for non-record lines.
pub fn parse_record(line: &str) -> Result<Option<EnerginoRecord>, MeterError> {
    let line = line.trim();
    let Some(body) = line.strip_prefix('#') else {
        return Ok(None);
    };
    let (_, fields) = body
        .split_once(':')
        .ok_or_else(|| MeterError::Malformed(line.to_string()))?;

    let values: Vec<&str> = fields.split(',').map(str::trim).collect();
    if values.len() < 4 {
        return Err(MeterError::Malformed(line.to_string()));
    }

    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| MeterError::Malformed(line.to_string()))
    };

    Ok(Some(EnerginoRecord {
        voltage: parse(values[1])?,
        current: parse(values[2])?,
        power: parse(values[3])?,
    }))
}

pub struct EnerginoMeter {
    reader: BufReader<File>,
    line: String,
    interval: Duration,
}

impl EnerginoMeter {
    /// Open the meter at `device`. When `device` is a serial port it is put
    /// in raw mode at `bps` and told to report every `interval_ms`.
    pub fn open(device: &Path, bps: u32, interval_ms: u32) -> Result<Self, MeterError> {
        let file = OpenOptions::new().read(true).write(true).open(device)?;

        if configure_serial(&file, bps)? {
            let mut writer = file.try_clone()?;
            writeln!(writer, "#P{}", interval_ms)?;
            info!(device = %device.display(), bps, interval_ms, "energino serial port configured");
        } else {
            debug!(device = %device.display(), "not a tty, reading records as-is");
        }

        Ok(Self {
            reader: BufReader::new(file),
            line: String::new(),
            interval: Duration::from_millis(interval_ms.into()),
        })
    }

    fn next_record(&mut self) -> Result<EnerginoRecord, MeterError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Err(MeterError::Disconnected);
            }
            if let Some(record) = parse_record(&self.line)? {
                return Ok(record);
            }
        }
    }
}

impl PowerMeter for EnerginoMeter {
    fn name(&self) -> &str {
        "energino"
    }

    fn fetch(&mut self, metric: &str) -> Result<f64, MeterError> {
        match self.next_record() {
            Ok(record) => record.metric(metric),
            Err(e @ (MeterError::Disconnected | MeterError::Io(_))) => {
                // a dead stream fails instantly; hold it to the reporting cadence
                std::thread::sleep(self.interval);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Put `file` in raw mode at `bps`. Returns `false` if it is not a terminal.
#[cfg(unix)]
fn configure_serial(file: &File, bps: u32) -> Result<bool, MeterError> {
    use std::os::unix::io::AsRawFd;

    let speed = match bps {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => return Err(MeterError::UnsupportedSpeed(other)),
    };

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid open descriptor owned by `file` for the whole block,
    // and `tio` is a plain C struct fully initialised by tcgetattr before use.
    unsafe {
        if libc::isatty(fd) != 1 {
            return Ok(false);
        }
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(true)
}

#[cfg(not(unix))]
fn configure_serial(_file: &File, _bps: u32) -> Result<bool, MeterError> {
    Ok(false)
}
