//! Human-readable formatting for log output.

/// Format a bitrate the way the stint logs show it.
pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000.0 {
        format!("{:.6} Mbps", bps / 1_000_000.0)
    } else if bps >= 100_000.0 {
        format!("{:.6} Kbps", bps / 1_000.0)
    } else {
        format!("{} bps", bps.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mbps() {
        assert_eq!(format_bitrate(2_500_000.0), "2.500000 Mbps");
    }

    #[test]
    fn test_format_kbps() {
        assert_eq!(format_bitrate(512_000.0), "512.000000 Kbps");
    }

    #[test]
    fn test_format_bps() {
        assert_eq!(format_bitrate(51_200.0), "51200 bps");
        assert_eq!(format_bitrate(0.0), "0 bps");
    }
}
