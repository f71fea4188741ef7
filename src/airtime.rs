//! Transactional airtime model for OFDM radio modes.
//!
//! Estimates how long one UDP frame occupies the channel (DIFS, data, SIFS,
//! ACK and a worst-case backoff) and derives the highest packet rate the
//! medium can sustain for that frame size.

use std::fmt;

use thiserror::Error;

/// Frames longer than this are modelled as two link-layer fragments.
pub const FRAGMENTATION_THRESHOLD: u32 = 1472;

/// Bytes added to the UDP payload before counting symbols
/// (UDP 8 + IP 20 + MAC 28 + LLC/SNAP 8).
pub const FRAME_OVERHEAD_BYTES: u32 = 8 + 20 + 28 + 8;

/// OFDM tail bits appended to every PSDU.
const TAIL_BITS: u64 = 6;

/// PLCP preamble + header duration (usec).
const PLCP_USECS: u64 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AirtimeError {
    #[error("unknown radio mode ({hwmode}, {channel}, {streams})")]
    UnknownMode {
        hwmode: String,
        channel: String,
        streams: u32,
    },

    #[error("frame of {length} bytes yields zero OFDM symbols")]
    ZeroSymbols { length: u32 },
}

/// Timing constants for one (hardware mode, channel width, streams) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioMode {
    pub hwmode: &'static str,
    pub channel: &'static str,
    pub streams: u32,
    pub difs: u64,
    pub sifs: u64,
    pub slot: u64,
    pub min_cw: u64,
    pub symbol_duration: u64,
    pub bits_per_symbol: u64,
}

static MODES: &[RadioMode] = &[
    RadioMode {
        hwmode: "11a",
        channel: "20",
        streams: 1,
        difs: 34,
        sifs: 16,
        slot: 9,
        min_cw: 15,
        symbol_duration: 4,
        bits_per_symbol: 216,
    },
    // ERP-OFDM with short slot time
    RadioMode {
        hwmode: "11g",
        channel: "20",
        streams: 1,
        difs: 28,
        sifs: 10,
        slot: 9,
        min_cw: 15,
        symbol_duration: 4,
        bits_per_symbol: 216,
    },
];

impl RadioMode {
    /// Look up the timing table. An unknown triple is a configuration error.
    pub fn lookup(hwmode: &str, channel: &str, streams: u32) -> Result<Self, AirtimeError> {
        MODES
            .iter()
            .find(|m| m.hwmode == hwmode && m.channel == channel && m.streams == streams)
            .copied()
            .ok_or_else(|| AirtimeError::UnknownMode {
                hwmode: hwmode.to_string(),
                channel: channel.to_string(),
                streams,
            })
    }

    /// All modes known to the model.
    pub fn all() -> &'static [RadioMode] {
        MODES
    }

    /// Estimated channel time (usec) to deliver one frame of `length` bytes.
    pub fn estimate_airtime_micros(&self, length: u32) -> Result<u64, AirtimeError> {
        if length > FRAGMENTATION_THRESHOLD {
            let half = length / 2;
            return Ok(self.estimate_airtime_micros(half)? + self.estimate_airtime_micros(half)?);
        }

        let bits = (length as u64 + FRAME_OVERHEAD_BYTES as u64) * 8 + TAIL_BITS;
        let symbols = bits.div_ceil(self.bits_per_symbol);
        if symbols == 0 {
            return Err(AirtimeError::ZeroSymbols { length });
        }

        let data = PLCP_USECS + symbols * self.symbol_duration;
        // ACK is a single symbol after its own preamble
        let ack = PLCP_USECS + self.symbol_duration;
        let backoff = self.slot * self.min_cw;

        Ok(self.difs + data + self.sifs + ack + backoff)
    }

    /// Highest frame rate (frames/s) the medium sustains for `length`-byte frames.
    pub fn max_safe_rate_hz(&self, length: u32) -> Result<u64, AirtimeError> {
        let usecs = self.estimate_airtime_micros(length)?;
        Ok(1_000_000 / usecs)
    }
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.hwmode, self.channel, self.streams)
    }
}
