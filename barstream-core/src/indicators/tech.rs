//! Built-in technical indicators selected from configuration, plus the
//! checked decimal arithmetic they share.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::{AttributeSource, Cached, Ema, Indicator, IndicatorResult, Sma};
use crate::config::IndicatorConfig;
use crate::domain::{Bar, Candle};
use crate::error::SeriesError;
use crate::series::CircularSeries;

pub(crate) fn checked_add(a: Decimal, b: Decimal, context: &str) -> Result<Decimal, SeriesError> {
    a.checked_add(b)
        .ok_or_else(|| SeriesError::arithmetic("add", context))
}

pub(crate) fn checked_sub(a: Decimal, b: Decimal, context: &str) -> Result<Decimal, SeriesError> {
    a.checked_sub(b)
        .ok_or_else(|| SeriesError::arithmetic("sub", context))
}

pub(crate) fn checked_mul(a: Decimal, b: Decimal, context: &str) -> Result<Decimal, SeriesError> {
    a.checked_mul(b)
        .ok_or_else(|| SeriesError::arithmetic("mul", context))
}

pub(crate) fn checked_div(a: Decimal, b: Decimal, context: &str) -> Result<Decimal, SeriesError> {
    a.checked_div(b)
        .ok_or_else(|| SeriesError::arithmetic("div", context))
}

/// A cached built-in indicator.
pub enum TechIndicator<B: Candle = Bar> {
    Sma(Cached<Sma<B>>),
    Ema(Cached<Ema<B>>),
}

impl<B: Candle> TechIndicator<B> {
    /// Build the configured indicator, reading its field from `series`.
    pub fn from_config(config: &IndicatorConfig, series: Arc<CircularSeries<B>>) -> Self {
        let indicator = match config {
            IndicatorConfig::Sma { period, .. } => TechIndicator::Sma(Cached::new(Sma::new(*period))),
            IndicatorConfig::Ema { period, .. } => TechIndicator::Ema(Cached::new(Ema::new(*period))),
        };
        indicator.set_source(AttributeSource::new(series, config.field()));
        indicator
    }

    pub fn unstable_value(&self) -> Option<Decimal> {
        match self {
            TechIndicator::Sma(i) => i.unstable_value(),
            TechIndicator::Ema(i) => i.unstable_value(),
        }
    }
}

impl<B: Candle> Indicator for TechIndicator<B> {
    type Bar = B;
    type Output = Decimal;

    fn name(&self) -> &str {
        match self {
            TechIndicator::Sma(i) => i.name(),
            TechIndicator::Ema(i) => i.name(),
        }
    }

    fn calculate(&self, position: usize) -> Result<Decimal, SeriesError> {
        match self {
            TechIndicator::Sma(i) => i.calculate(position),
            TechIndicator::Ema(i) => i.calculate(position),
        }
    }

    fn set_source(&self, source: AttributeSource<B, Decimal>) {
        match self {
            TechIndicator::Sma(i) => i.set_source(source),
            TechIndicator::Ema(i) => i.set_source(source),
        }
    }

    fn source(&self) -> Option<AttributeSource<B, Decimal>> {
        match self {
            TechIndicator::Sma(i) => i.source(),
            TechIndicator::Ema(i) => i.source(),
        }
    }

    fn results(&self) -> Vec<IndicatorResult<Decimal>> {
        match self {
            TechIndicator::Sma(i) => i.results(),
            TechIndicator::Ema(i) => i.results(),
        }
    }
}
