//! API rate-limit tiers
//!
//! A tier selects the minimum spacing between two dispatches to the
//! transformation service. The set is fixed; free-tier quota is 10 requests
//! per minute, paid tiers allow faster pacing.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rate-limit tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    /// 6.0s between requests (10 RPM)
    #[default]
    Free,
    /// 2.0s between requests
    Tier1,
    /// 1.0s between requests
    Tier3,
}

impl RateTier {
    /// All tiers, slowest first
    pub const ALL: [RateTier; 3] = [RateTier::Free, RateTier::Tier1, RateTier::Tier3];

    /// Minimum interval between dispatches for this tier
    pub fn min_interval(self) -> Duration {
        match self {
            RateTier::Free => Duration::from_millis(6000),
            RateTier::Tier1 => Duration::from_millis(2000),
            RateTier::Tier3 => Duration::from_millis(1000),
        }
    }

    /// Configuration key (`free`, `tier1`, `tier3`)
    pub fn key(self) -> &'static str {
        match self {
            RateTier::Free => "free",
            RateTier::Tier1 => "tier1",
            RateTier::Tier3 => "tier3",
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            RateTier::Free => "Free",
            RateTier::Tier1 => "Tier 1",
            RateTier::Tier3 => "Tier 3",
        }
    }
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for RateTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(RateTier::Free),
            "tier1" | "tier-1" | "1" => Ok(RateTier::Tier1),
            "tier3" | "tier-3" | "3" => Ok(RateTier::Tier3),
            other => Err(Error::InvalidInput(format!(
                "Unknown rate tier '{}' (expected one of: free, tier1, tier3)",
                other
            ))),
        }
    }
}
