//! Caching decorator: compute through the cache, then store.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AttributeSource, CacheIndicator, Indicator, IndicatorCache, IndicatorResult};
use crate::error::SeriesError;

/// Wraps a [`CacheIndicator`] so every `calculate` consults the cache first
/// and records what it computed. Calls are serialized.
pub struct Cached<I> {
    inner: I,
    serial: Mutex<()>,
}

impl<I: CacheIndicator> Cached<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            serial: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Latest provisional value, if any.
    pub fn unstable_value(&self) -> Option<I::Output> {
        self.inner.cache().and_then(|c| c.unstable_value())
    }
}

impl<I: CacheIndicator> Indicator for Cached<I> {
    type Bar = I::Bar;
    type Output = I::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn calculate(&self, position: usize) -> Result<Self::Output, SeriesError> {
        let _serial = self.serial.lock();
        let cache = self
            .inner
            .cache()
            .ok_or_else(|| SeriesError::SourceNotSet(self.inner.name().to_string()))?;
        let (value, hit) = cache.resolve(position, |p| self.inner.calculate(p))?;
        if !hit {
            cache.store(position, value.clone())?;
        }
        Ok(value)
    }

    fn set_source(&self, source: AttributeSource<Self::Bar, Self::Output>) {
        let _serial = self.serial.lock();
        self.inner.set_source(source);
    }

    fn source(&self) -> Option<AttributeSource<Self::Bar, Self::Output>> {
        self.inner.source()
    }

    fn results(&self) -> Vec<IndicatorResult<Self::Output>> {
        self.inner.results()
    }
}

impl<I: CacheIndicator> CacheIndicator for Cached<I> {
    fn cache(&self) -> Option<Arc<IndicatorCache<Self::Bar, Self::Output>>> {
        self.inner.cache()
    }
}
