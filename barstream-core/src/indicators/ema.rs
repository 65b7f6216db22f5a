//! Exponential Moving Average (EMA).
//!
//! EMA[0] = source[0]
//! EMA[t] = (source[t] - EMA[t-1]) * k + EMA[t-1], k = 2 / (period + 1)
//!
//! The fold starts from the newest cached value before `t`, so a warm cache
//! makes each step O(1). On a cold cache it starts from position 0. The walk
//! is a loop, never recursion, so series length does not bound stack depth.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::tech::{checked_add, checked_mul, checked_sub};
use super::{AttributeSource, CacheIndicator, Indicator, IndicatorCache, IndicatorCore, IndicatorResult};
use crate::domain::{Bar, Candle};
use crate::error::SeriesError;

pub struct Ema<B: Candle = Bar> {
    period: usize,
    multiplier: Decimal,
    core: IndicatorCore<B, Decimal>,
}

impl<B: Candle> Ema<B> {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            multiplier: Decimal::from(2) / Decimal::from(period + 1),
            core: IndicatorCore::new(format!("ema_{period}")),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn multiplier(&self) -> Decimal {
        self.multiplier
    }

    fn step(&self, prev: Decimal, value: Decimal) -> Result<Decimal, SeriesError> {
        let delta = checked_sub(value, prev, self.name())?;
        let scaled = checked_mul(delta, self.multiplier, self.name())?;
        checked_add(scaled, prev, self.name())
    }
}

impl<B: Candle> Indicator for Ema<B> {
    type Bar = B;
    type Output = Decimal;

    fn name(&self) -> &str {
        self.core.name()
    }

    fn calculate(&self, position: usize) -> Result<Decimal, SeriesError> {
        let source = self.core.require_source()?;
        let seed = self.core.require_cache()?.latest_before(position)?;
        let start = seed.as_ref().map_or(0, |(p, _)| p + 1);

        // One consistent read of everything the fold needs.
        let mut values = source.values(start, position + 1)?.into_iter();
        let mut ema = match seed {
            Some((_, cached)) => cached,
            None => values
                .next()
                .ok_or_else(|| SeriesError::out_of_range(position, source.series().len()))?,
        };
        for value in values {
            ema = self.step(ema, value)?;
        }
        Ok(ema)
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

impl<B: Candle> CacheIndicator for Ema<B> {
    fn cache(&self) -> Option<Arc<IndicatorCache<B, Decimal>>> {
        self.core.cache()
    }
}
