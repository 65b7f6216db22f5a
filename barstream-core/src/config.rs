//! Configuration for a series, its scheduler and the indicators computed
//! over it. Loaded from TOML:
//!
//! ```toml
//! [series]
//! symbol = "BTCUSDT"
//! interval = "1m"
//! max_size = 500
//! publish_deadline_ms = 250
//!
//! [scheduler]
//! mailbox_capacity = 256
//! backfill_from = 0
//!
//! [[indicators]]
//! type = "SMA"
//! period = 20
//!
//! [[indicators]]
//! type = "EMA"
//! period = 12
//! field = "close"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Interval;
use crate::indicators::PriceField;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Construction parameters of a [`crate::series::CircularSeries`].
///
/// `max_size`: absent ⇒ unbounded, `<= 0` ⇒ disabled, otherwise the ring
/// capacity. `interval` is descriptive only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub symbol: Option<String>,
    pub interval: Option<Interval>,
    pub max_size: Option<i64>,
    /// When set, finalized bars are delivered with this deadline instead of
    /// blocking until every subscriber accepts. This opts out of guaranteed
    /// finalized delivery: a subscriber still full at the deadline loses the
    /// bar, its indicator misses that recomputation, and the loss is logged
    /// and counted in `CircularSeries::finalized_undelivered`.
    pub publish_deadline_ms: Option<u64>,
}

impl SeriesConfig {
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_max_size(mut self, max_size: i64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_publish_deadline(mut self, deadline: Duration) -> Self {
        self.publish_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn publish_deadline(&self) -> Option<Duration> {
        self.publish_deadline_ms.map(Duration::from_millis)
    }
}

/// Live-phase settings shared by every indicator started from one config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Listener mailbox size; 0 selects the relay default.
    pub mailbox_capacity: usize,
    /// First position to backfill; `None` skips backfill.
    pub backfill_from: Option<usize>,
}

/// An indicator to compute over the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorConfig {
    Sma {
        period: usize,
        #[serde(default)]
        field: PriceField,
    },
    Ema {
        period: usize,
        #[serde(default)]
        field: PriceField,
    },
}

impl IndicatorConfig {
    pub fn period(&self) -> usize {
        match self {
            IndicatorConfig::Sma { period, .. } | IndicatorConfig::Ema { period, .. } => *period,
        }
    }

    pub fn field(&self) -> PriceField {
        match self {
            IndicatorConfig::Sma { field, .. } | IndicatorConfig::Ema { field, .. } => *field,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub series: SeriesConfig,
    pub scheduler: SchedulerConfig,
    pub indicators: Vec<IndicatorConfig>,
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.series.publish_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "series.publish_deadline_ms must be > 0".into(),
            ));
        }
        if let Some(symbol) = &self.series.symbol {
            if symbol.trim().is_empty() {
                return Err(ConfigError::Invalid("series.symbol must not be blank".into()));
            }
        }
        for (i, indicator) in self.indicators.iter().enumerate() {
            if indicator.period() == 0 {
                return Err(ConfigError::Invalid(format!(
                    "indicators[{i}].period must be >= 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[series]
symbol = "BTCUSDT"
interval = "1m"
max_size = 500
publish_deadline_ms = 250

[scheduler]
mailbox_capacity = 64
backfill_from = 0

[[indicators]]
type = "SMA"
period = 20

[[indicators]]
type = "EMA"
period = 12
field = "high"
"#;

    #[test]
    fn parses_full_document() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.series.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(config.series.interval, Some(Interval::M1));
        assert_eq!(config.series.max_size, Some(500));
        assert_eq!(
            config.series.publish_deadline(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.scheduler.mailbox_capacity, 64);
        assert_eq!(config.scheduler.backfill_from, Some(0));
        assert_eq!(
            config.indicators,
            vec![
                IndicatorConfig::Sma {
                    period: 20,
                    field: PriceField::Close
                },
                IndicatorConfig::Ema {
                    period: 12,
                    field: PriceField::High
                },
            ]
        );
    }

    #[test]
    fn empty_document_is_unbounded_without_backfill() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.series.max_size, None);
        assert_eq!(config.scheduler.backfill_from, None);
        assert!(config.indicators.is_empty());
    }

    #[test]
    fn zero_period_is_rejected() {
        let err = AppConfig::from_toml_str("[[indicators]]\ntype = \"SMA\"\nperiod = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("period")));
    }

    #[test]
    fn unknown_interval_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[series]\ninterval = \"7m\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builder_sets_fields() {
        let config = SeriesConfig::default()
            .with_symbol("ETHUSDT")
            .with_interval(Interval::H4)
            .with_max_size(3)
            .with_publish_deadline(Duration::from_millis(10));
        assert_eq!(config.symbol.as_deref(), Some("ETHUSDT"));
        assert_eq!(config.max_size, Some(3));
        assert_eq!(config.publish_deadline_ms, Some(10));
    }
}
