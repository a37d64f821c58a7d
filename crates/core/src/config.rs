use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::period::LockedMonths;

/// Tolerances used when pairing a bank credit with a pay-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub amount_tolerance_cents: i64,
    pub time_tolerance_secs: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_cents: 1,
            time_tolerance_secs: 60,
        }
    }
}

impl MatchingConfig {
    pub fn amount_tolerance(&self) -> Money {
        Money::from_cents(self.amount_tolerance_cents)
    }

    pub fn time_tolerance(&self) -> Duration {
        Duration::seconds(self.time_tolerance_secs)
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, String> {
        toml::from_str(toml_content).map_err(|e| format!("Failed to parse TOML: {e}"))
    }
}

/// Closed months, written as `"YYYY-MM"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub locked: Vec<String>,
}

impl PeriodConfig {
    pub fn to_locks(&self) -> Result<LockedMonths, String> {
        LockedMonths::parse(&self.locked)
    }
}
