//! Simple Moving Average (SMA).
//!
//! Mean of the source over the last `period` positions. Near the start of
//! the series the window is shorter and the mean is over what exists.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::tech::{checked_add, checked_div};
use super::{AttributeSource, CacheIndicator, Indicator, IndicatorCache, IndicatorCore, IndicatorResult};
use crate::domain::{Bar, Candle};
use crate::error::SeriesError;

pub struct Sma<B: Candle = Bar> {
    period: usize,
    core: IndicatorCore<B, Decimal>,
}

impl<B: Candle> Sma<B> {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            core: IndicatorCore::new(format!("sma_{period}")),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl<B: Candle> Indicator for Sma<B> {
    type Bar = B;
    type Output = Decimal;

    fn name(&self) -> &str {
        self.core.name()
    }

    fn calculate(&self, position: usize) -> Result<Decimal, SeriesError> {
        let source = self.core.require_source()?;
        let start = (position + 1).saturating_sub(self.period);
        let values = source.values(start, position + 1)?;

        let mut sum = Decimal::ZERO;
        for v in &values {
            sum = checked_add(sum, *v, self.name())?;
        }
        checked_div(sum, Decimal::from(values.len()), self.name())
    }

    fn set_source(&self, source: AttributeSource<B, Decimal>) {
        self.core.set_source(source);
    }

    fn source(&self) -> Option<AttributeSource<B, Decimal>> {
        self.core.source()
    }

    fn results(&self) -> Vec<IndicatorResult<Decimal>> {
        self.core.results()
    }
}

impl<B: Candle> CacheIndicator for Sma<B> {
    fn cache(&self) -> Option<Arc<IndicatorCache<B, Decimal>>> {
        self.core.cache()
    }
}
