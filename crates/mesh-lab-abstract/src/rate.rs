use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshLabError;

/// Data rate in bits per second, written the way ns-3 attributes spell it
/// (`150kbps`, `6Mbps`, `1KBps`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate {
    bits_per_second: u64,
}

const UNITS: &[(&str, u64)] = &[
    ("bps", 1),
    ("b/s", 1),
    ("kbps", 1_000),
    ("kb/s", 1_000),
    ("Kbps", 1_000),
    ("Kb/s", 1_000),
    ("Mbps", 1_000_000),
    ("Mb/s", 1_000_000),
    ("Gbps", 1_000_000_000),
    ("Gb/s", 1_000_000_000),
    ("Bps", 8),
    ("B/s", 8),
    ("kBps", 8_000),
    ("KBps", 8_000),
    ("kB/s", 8_000),
    ("KB/s", 8_000),
    ("MBps", 8_000_000),
    ("MB/s", 8_000_000),
    ("GBps", 8_000_000_000),
    ("GB/s", 8_000_000_000),
];

impl DataRate {
    pub const fn from_bps(bits_per_second: u64) -> Self {
        Self { bits_per_second }
    }

    pub fn bits_per_second(&self) -> u64 {
        self.bits_per_second
    }

    /// Time needed to put `bytes` on the wire at this rate, in seconds.
    pub fn transmission_time(&self, bytes: u32) -> f64 {
        assert!(self.bits_per_second > 0, "zero data rate has no transmission time");
        f64::from(bytes) * 8.0 / self.bits_per_second as f64
    }
}

impl FromStr for DataRate {
    type Err = MeshLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| MeshLabError::config(format!("data rate '{s}' has no unit")))?;
        let (number, unit) = s.split_at(split);
        let unit = unit.trim();
        let value: f64 = number
            .parse()
            .map_err(|_| MeshLabError::config(format!("invalid data rate value in '{s}'")))?;
        let multiplier = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| MeshLabError::config(format!("unknown data rate unit '{unit}'")))?;

        let bits = value * multiplier as f64;
        if !bits.is_finite() || bits < 1.0 {
            return Err(MeshLabError::config(format!(
                "data rate '{s}' must be at least 1bps"
            )));
        }
        Ok(Self::from_bps(bits.round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = MeshLabError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> Self {
        rate.to_string()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.bits_per_second;
        if bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{bps}bps")
        }
    }
}
