//! Incremental indicators over a live series.
//!
//! An indicator reads a scalar series out of the bars through an
//! [`AttributeSource`], computes one position at a time, and keeps finalized
//! results in an [`IndicatorCache`] aligned with the series positions.
//! [`Cached`] wraps a concrete indicator and adds the store-after-compute
//! step.

pub mod cache;
pub mod decorator;
pub mod ema;
pub mod sma;
pub mod source;
pub mod tech;

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::Candle;
use crate::error::SeriesError;

pub use cache::IndicatorCache;
pub use decorator::Cached;
pub use ema::Ema;
pub use sma::Sma;
pub use source::{AttributeSource, AttributeStrategy, FromFn, PriceField};
pub use tech::TechIndicator;

/// Finalized result for the bar that begins at `begin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult<T> {
    pub begin: DateTime<Utc>,
    pub value: T,
}

/// Position-addressed indicator over a series.
///
/// Implementations must be `Send + Sync`: the scheduler drives them from a
/// live thread while other threads read results.
pub trait Indicator: Send + Sync {
    type Bar: Candle;
    type Output: Clone + Debug + Send + Sync + 'static;

    /// Short identifier, e.g. "sma_20". Used in logs.
    fn name(&self) -> &str;

    /// Value at `position` of the current source.
    fn calculate(&self, position: usize) -> Result<Self::Output, SeriesError>;

    fn set_source(&self, source: AttributeSource<Self::Bar, Self::Output>);

    fn source(&self) -> Option<AttributeSource<Self::Bar, Self::Output>>;

    /// Finalized results, oldest first.
    fn results(&self) -> Vec<IndicatorResult<Self::Output>>;
}

/// Indicator that owns a result cache.
pub trait CacheIndicator: Indicator {
    /// `None` until a source has been set.
    fn cache(&self) -> Option<Arc<IndicatorCache<Self::Bar, Self::Output>>>;
}

/// Source and cache bookkeeping shared by concrete indicators.
///
/// The cache is created with the first source; later sources rebind it, so
/// results survive a temporary swap to an isolated copy.
pub struct IndicatorCore<B: Candle, T> {
    name: String,
    source: RwLock<Option<AttributeSource<B, T>>>,
    cache: RwLock<Option<Arc<IndicatorCache<B, T>>>>,
}

impl<B: Candle, T: Clone + Send + Sync + 'static> IndicatorCore<B, T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: RwLock::new(None),
            cache: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_source(&self, source: AttributeSource<B, T>) {
        let series = Arc::clone(source.series());
        {
            let mut cache = self.cache.write();
            match cache.as_ref() {
                Some(existing) => existing.rebind(series),
                None => *cache = Some(Arc::new(IndicatorCache::new(series))),
            }
        }
        *self.source.write() = Some(source);
    }

    pub fn source(&self) -> Option<AttributeSource<B, T>> {
        self.source.read().clone()
    }

    /// Current source, or [`SeriesError::SourceNotSet`].
    pub fn require_source(&self) -> Result<AttributeSource<B, T>, SeriesError> {
        self.source()
            .ok_or_else(|| SeriesError::SourceNotSet(self.name.clone()))
    }

    pub fn cache(&self) -> Option<Arc<IndicatorCache<B, T>>> {
        self.cache.read().clone()
    }

    pub fn require_cache(&self) -> Result<Arc<IndicatorCache<B, T>>, SeriesError> {
        self.cache()
            .ok_or_else(|| SeriesError::SourceNotSet(self.name.clone()))
    }

    pub fn results(&self) -> Vec<IndicatorResult<T>> {
        self.cache().map(|c| c.results()).unwrap_or_default()
    }
}

/// Create finalized one-minute bars from close prices for testing.
///
/// open = previous close (or close for the first bar), high/low = close ± 1.
#[cfg(test)]
pub fn make_bars(closes: &[i64]) -> Vec<crate::domain::Bar> {
    use crate::domain::Bar;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            let begin = base + chrono::Duration::minutes(i as i64);
            Bar::new(
                begin,
                Decimal::from(open),
                Decimal::from(open.max(close) + 1),
                Decimal::from(open.min(close) - 1),
                Decimal::from(close),
            )
            .with_end(begin + chrono::Duration::minutes(1))
            .with_volume(Decimal::from(1000))
        })
        .collect()
}

/// Series holding `make_bars(closes)`, bounded to `max_size` when given.
#[cfg(test)]
pub fn make_series(
    closes: &[i64],
    max_size: Option<i64>,
) -> Arc<crate::series::CircularSeries<crate::domain::Bar>> {
    use crate::config::SeriesConfig;
    use crate::series::CircularSeries;

    let config = SeriesConfig {
        symbol: Some("TEST".into()),
        max_size,
        ..SeriesConfig::default()
    };
    let series: Arc<CircularSeries<crate::domain::Bar>> = Arc::new(CircularSeries::new(config));
    series
        .add_or_update(false, make_bars(closes))
        .expect("test bars are never nil");
    series
}
