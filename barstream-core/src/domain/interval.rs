//! Kline intervals supported by the exchange feeds.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown interval: {0}")]
pub struct ParseIntervalError(pub String);

/// Bar period. Serialized as the exchange's short form (`"1m"`, `"4h"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "3h")]
    H3,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub const ALL: [Interval; 12] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H3,
        Interval::H4,
        Interval::H6,
        Interval::H12,
        Interval::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H3 => "3h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> u64 {
        match self {
            Interval::M1 => 60,
            Interval::M3 => 3 * 60,
            Interval::M5 => 5 * 60,
            Interval::M15 => 15 * 60,
            Interval::M30 => 30 * 60,
            Interval::H1 => 60 * 60,
            Interval::H2 => 2 * 60 * 60,
            Interval::H3 => 3 * 60 * 60,
            Interval::H4 => 4 * 60 * 60,
            Interval::H6 => 6 * 60 * 60,
            Interval::H12 => 12 * 60 * 60,
            Interval::D1 => 24 * 60 * 60,
        }
    }

    pub fn millis(&self) -> u64 {
        self.seconds() * 1000
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Number of bars of this interval in one day.
    pub fn points_per_day(&self) -> f64 {
        86_400.0 / self.seconds() as f64
    }

    pub fn points_for_days(&self, days: u32) -> f64 {
        f64::from(days) * self.points_per_day()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ParseIntervalError(s.to_string()))
    }
}
