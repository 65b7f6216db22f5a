//! Attribute sources: which scalar an indicator reads from each bar.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Candle;
use crate::error::SeriesError;
use crate::series::CircularSeries;

/// Pure extraction `bar -> T`.
pub trait AttributeStrategy<B, T>: Send + Sync {
    fn attribute(&self, bar: &B) -> T;
}

/// OHLCV field of a bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    High,
    Low,
    #[default]
    Close,
    Volume,
}

impl PriceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
            PriceField::Volume => "volume",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<B: Candle> AttributeStrategy<B, Decimal> for PriceField {
    fn attribute(&self, bar: &B) -> Decimal {
        match self {
            PriceField::Open => bar.open(),
            PriceField::High => bar.high(),
            PriceField::Low => bar.low(),
            PriceField::Close => bar.close(),
            PriceField::Volume => bar.volume(),
        }
    }
}

/// Strategy backed by a closure.
pub struct FromFn<F>(pub F);

impl<B, T, F> AttributeStrategy<B, T> for FromFn<F>
where
    F: Fn(&B) -> T + Send + Sync,
{
    fn attribute(&self, bar: &B) -> T {
        (self.0)(bar)
    }
}

/// A strategy paired with the series it reads from.
pub struct AttributeSource<B: Candle, T> {
    series: Arc<CircularSeries<B>>,
    strategy: Arc<dyn AttributeStrategy<B, T>>,
}

impl<B: Candle, T> Clone for AttributeSource<B, T> {
    fn clone(&self) -> Self {
        Self {
            series: Arc::clone(&self.series),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<B: Candle, T: 'static> AttributeSource<B, T> {
    pub fn new(
        series: Arc<CircularSeries<B>>,
        strategy: impl AttributeStrategy<B, T> + 'static,
    ) -> Self {
        Self {
            series,
            strategy: Arc::new(strategy),
        }
    }

    pub fn from_fn(
        series: Arc<CircularSeries<B>>,
        f: impl Fn(&B) -> T + Send + Sync + 'static,
    ) -> Self {
        Self::new(series, FromFn(f))
    }

    pub fn series(&self) -> &Arc<CircularSeries<B>> {
        &self.series
    }

    /// Attribute of the bar at `position`.
    pub fn value(&self, position: usize) -> Result<T, SeriesError> {
        self.series
            .bar(position)
            .map(|bar| self.strategy.attribute(&bar))
            .ok_or_else(|| SeriesError::out_of_range(position, self.series.len()))
    }

    /// Attributes of `start..end`, read from one consistent view of the series.
    pub fn values(&self, start: usize, end: usize) -> Result<Vec<T>, SeriesError> {
        let bars = self
            .series
            .range(start, end)
            .ok_or_else(|| SeriesError::out_of_range(end.saturating_sub(1), self.series.len()))?;
        Ok(bars.iter().map(|bar| self.strategy.attribute(bar)).collect())
    }

    /// Same strategy over a frozen copy of the series.
    pub fn isolated(&self) -> Self {
        Self {
            series: Arc::new(self.series.detached_copy()),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<B: Candle, T> fmt::Debug for AttributeSource<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSource")
            .field("symbol", &self.series.symbol())
            .finish_non_exhaustive()
    }
}
