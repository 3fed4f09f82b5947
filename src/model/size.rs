//! Storage extent measured in sectors

use crate::utils::error::{Result, SelectionError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Bytes per sector
pub const SECTOR_SIZE: u64 = 512;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([A-Za-z]*)\s*$").expect("size regex is valid")
});

/// Units accepted when parsing a size string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Sectors,
    Bytes,
    Kb,
    Mb,
    Gb,
    Tb,
}

impl Unit {
    fn bytes(self) -> u64 {
        match self {
            Self::Sectors => SECTOR_SIZE,
            Self::Bytes => 1,
            Self::Kb => KB,
            Self::Mb => MB,
            Self::Gb => GB,
            Self::Tb => TB,
        }
    }
}

impl FromStr for Unit {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "s" | "sec" | "secs" | "sector" | "sectors" => Ok(Self::Sectors),
            "b" | "byte" | "bytes" => Ok(Self::Bytes),
            "k" | "kb" => Ok(Self::Kb),
            "m" | "mb" => Ok(Self::Mb),
            "g" | "gb" => Ok(Self::Gb),
            "t" | "tb" => Ok(Self::Tb),
            other => Err(SelectionError::InvalidSize(format!("unknown unit '{}'", other))),
        }
    }
}

/// A storage extent, stored as a sector count.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Size {
    sectors: u64,
}

impl Size {
    pub const ZERO: Size = Size { sectors: 0 };

    pub const fn from_sectors(sectors: u64) -> Self {
        Self { sectors }
    }

    /// Round a byte count down to whole sectors.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self {
            sectors: bytes / SECTOR_SIZE,
        }
    }

    pub const fn from_mb(mb: u64) -> Self {
        Self::from_bytes(mb * MB)
    }

    pub const fn from_gb(gb: u64) -> Self {
        Self::from_bytes(gb * GB)
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn bytes(&self) -> u64 {
        self.sectors.saturating_mul(SECTOR_SIZE)
    }

    pub fn is_zero(&self) -> bool {
        self.sectors == 0
    }

    /// Value expressed in `unit`
    pub fn get(&self, unit: Unit) -> f64 {
        self.bytes() as f64 / unit.bytes() as f64
    }

    /// Scale by a ratio, rounding down to whole sectors
    pub fn scale(&self, ratio: f64) -> Self {
        Self::from_sectors((self.sectors as f64 * ratio) as u64)
    }

    /// Human-readable rendering, e.g. `12.0G`
    pub fn human(&self) -> String {
        let bytes = self.bytes();
        if bytes >= TB {
            format!("{:.1}T", bytes as f64 / TB as f64)
        } else if bytes >= GB {
            format!("{:.1}G", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.1}M", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.1}K", bytes as f64 / KB as f64)
        } else {
            format!("{}B", bytes)
        }
    }
}

impl FromStr for Size {
    type Err = SelectionError;

    /// Parse `<number><unit>`, e.g. `2048secs`, `512mb`, `1.5gb`.
    fn from_str(s: &str) -> Result<Self> {
        let caps = SIZE_RE
            .captures(s)
            .ok_or_else(|| SelectionError::InvalidSize(s.to_string()))?;
        let unit: Unit = caps[2].parse()?;
        let number = &caps[1];

        let bytes = if let Ok(whole) = number.parse::<u64>() {
            whole
                .checked_mul(unit.bytes())
                .ok_or_else(|| SelectionError::InvalidSize(s.to_string()))?
        } else {
            let value: f64 = number
                .parse()
                .map_err(|_| SelectionError::InvalidSize(s.to_string()))?;
            let bytes = value * unit.bytes() as f64;
            if !bytes.is_finite() || bytes > u64::MAX as f64 {
                return Err(SelectionError::InvalidSize(s.to_string()));
            }
            bytes as u64
        };

        Ok(Self::from_bytes(bytes))
    }
}

impl TryFrom<String> for Size {
    type Error = SelectionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Size> for String {
    fn from(size: Size) -> Self {
        size.to_string()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}secs", self.sectors)
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size::from_sectors(self.sectors.saturating_add(rhs.sectors))
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        self.sectors = self.sectors.saturating_add(rhs.sectors);
    }
}

/// Saturates at zero
impl Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size::from_sectors(self.sectors.saturating_sub(rhs.sectors))
    }
}

impl std::iter::Sum for Size {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Size {
        iter.fold(Size::ZERO, |acc, s| acc + s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!("2048secs".parse::<Size>().unwrap().sectors(), 2048);
        assert_eq!("2048".parse::<Size>().unwrap().sectors(), 2048);
        assert_eq!("1kb".parse::<Size>().unwrap().sectors(), 2);
        assert_eq!("512MB".parse::<Size>().unwrap(), Size::from_mb(512));
        assert_eq!("1 gb".parse::<Size>().unwrap(), Size::from_gb(1));
        assert_eq!("1.5g".parse::<Size>().unwrap(), Size::from_mb(1536));
        assert_eq!("1024b".parse::<Size>().unwrap().sectors(), 2);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "gb", "-1gb", "10 zb", "ten gb", "1.2.3mb"] {
            assert!(bad.parse::<Size>().is_err(), "{bad} should not parse");
        }
        assert!("99999999999999999999tb".parse::<Size>().is_err());
    }

    #[test]
    fn arithmetic_and_ordering() {
        let a = Size::from_mb(100);
        let b = Size::from_mb(28);
        assert_eq!(a + b, Size::from_mb(128));
        assert_eq!(b - a, Size::ZERO);
        assert!(b < a);
        assert_eq!(vec![a, b].into_iter().sum::<Size>(), Size::from_mb(128));
    }

    #[test]
    fn display_round_trips_through_serde() {
        let size = Size::from_gb(3);
        let rendered: String = size.into();
        assert_eq!(rendered.parse::<Size>().unwrap(), size);
        assert_eq!(size.human(), "3.0G");
    }
}
