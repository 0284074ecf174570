//! Site identity and metadata types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network/station/channel-root/location key for one three-component site.
///
/// The channel root is the first two characters of the SEED channel code
/// (`LY` for `LYZ`/`LYN`/`LYE`). The third character selects the component
/// and is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteKey {
    pub network: String,
    pub station: String,
    pub channel_root: String,
    pub location: String,
}

impl SiteKey {
    pub fn new(network: &str, station: &str, channel_root: &str, location: &str) -> Self {
        Self {
            network: network.trim().to_string(),
            station: station.trim().to_string(),
            channel_root: channel_root.trim().to_string(),
            location: normalize_location(location),
        }
    }

    /// Build a key from a full channel code (`LYZ` → root `LY`).
    pub fn from_channel(network: &str, station: &str, channel: &str, location: &str) -> Self {
        let chars: Vec<char> = channel.trim().chars().collect();
        let root_len = chars.len().saturating_sub(1).min(2);
        let root: String = chars[..root_len].iter().collect();
        Self::new(network, station, &root, location)
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc = if self.location.is_empty() { "--" } else { &self.location };
        write!(f, "{}.{}.{}?.{}", self.network, self.station, self.channel_root, loc)
    }
}

/// Blank, `--` and whitespace location codes are all the same empty location.
fn normalize_location(location: &str) -> String {
    let trimmed = location.trim();
    if trimmed == "--" {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Displacement component carried by one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    Up,
    North,
    East,
}

impl Component {
    /// Demultiplex from the last character of a channel code.
    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel.trim().chars().last()? {
            'Z' | 'U' | '3' => Some(Self::Up),
            'N' | '1' => Some(Self::North),
            'E' | '2' => Some(Self::East),
            _ => None,
        }
    }

    /// Ordering used for observation rows: north, east, up.
    pub const ROW_ORDER: [Self; 3] = [Self::North, Self::East, Self::Up];
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "Z"),
            Self::North => write!(f, "N"),
            Self::East => write!(f, "E"),
        }
    }
}

/// Static description of a monitored site, resolved at startup from the
/// metadata and mask files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub key: SiteKey,
    /// Latitude (degrees)
    pub latitude: f64,
    /// Longitude (degrees, -180..180)
    pub longitude: f64,
    /// Altitude above the ellipsoid (m)
    pub altitude: f64,
    /// Instrument gain (counts per metre)
    pub gain: f64,
    /// Sampling period (s)
    pub dt: f64,
    /// Excluded from the PGD inversion
    #[serde(default)]
    pub skip_pgd: bool,
    /// Excluded from the CMT inversion
    #[serde(default)]
    pub skip_cmt: bool,
    /// Excluded from the finite-fault inversion
    #[serde(default)]
    pub skip_ff: bool,
    /// Externally supplied PGD weight
    #[serde(default)]
    pub pgd_weight: Option<f64>,
}

impl SiteMetadata {
    pub fn new(key: SiteKey, latitude: f64, longitude: f64, dt: f64) -> Self {
        Self {
            key,
            latitude,
            longitude,
            altitude: 0.0,
            gain: 1.0,
            dt,
            skip_pgd: false,
            skip_cmt: false,
            skip_ff: false,
            pgd_weight: None,
        }
    }
}
