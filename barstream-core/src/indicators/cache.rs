//! Per-indicator memo of finalized results, kept aligned with a series
//! whose positions shift on eviction.
//!
//! Results are index-aligned with the series: `results[i]` belongs to the bar
//! at position `i`, verified by begin time. The cache remembers the series
//! sequence number of its first entry; when the series evicts, the cache's
//! head falls behind the series' head and the difference is trimmed on the
//! next access. Provisional results go to a single overwritable slot.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::trace;

use super::IndicatorResult;
use crate::domain::Candle;
use crate::error::SeriesError;
use crate::series::CircularSeries;

struct CacheState<B: Candle, T> {
    series: Arc<CircularSeries<B>>,
    results: VecDeque<IndicatorResult<T>>,
    /// Series sequence number of `results[0]`.
    head_sequence: u64,
    unstable: Option<T>,
}

enum Lookup<T> {
    Hit(T),
    Miss,
}

impl<B: Candle, T: Clone> CacheState<B, T> {
    fn check_alignment(&mut self) -> bool {
        if self.results.is_empty() {
            return true;
        }
        let Some((series_sequence, first)) = self.series.sequenced(0) else {
            return false;
        };
        if self.head_sequence > series_sequence {
            return false;
        }
        if self.head_sequence < series_sequence {
            let evicted = series_sequence - self.head_sequence;
            let trimmed = usize::try_from(evicted)
                .unwrap_or(usize::MAX)
                .min(self.results.len());
            self.results.drain(..trimmed);
            self.head_sequence = series_sequence;
            trace!(trimmed, "cache trimmed after eviction");
        }
        self.results
            .front()
            .map_or(true, |r| r.begin == first.begin())
    }

    /// Alignment, bounds and hit test. A finalized entry whose begin no longer
    /// matches the bar at `position` is dropped together with everything after
    /// it when `recompute` is allowed.
    fn lookup(&mut self, position: usize, recompute: bool) -> Result<Lookup<T>, SeriesError> {
        if !self.check_alignment() {
            return Err(SeriesError::MisalignedSeries);
        }
        let size = self.series.len();
        let bar = self
            .series
            .bar(position)
            .ok_or_else(|| SeriesError::out_of_range(position, size))?;

        match self.results.get(position) {
            Some(cached) if cached.begin == bar.begin() => Ok(Lookup::Hit(cached.value.clone())),
            Some(_) if !recompute => Err(SeriesError::MisalignedSeries),
            Some(_) => {
                trace!(
                    position,
                    dropped = self.results.len() - position,
                    "stale cache tail dropped"
                );
                self.results.truncate(position);
                Ok(Lookup::Miss)
            }
            None => Ok(Lookup::Miss),
        }
    }

    /// Newest finalized entry before `position`, dropping stale entries met
    /// on the way.
    fn latest_before(&mut self, position: usize) -> Result<Option<(usize, T)>, SeriesError> {
        let size = self.series.len();
        if position >= size {
            return Err(SeriesError::out_of_range(position, size));
        }
        let mut p = position.min(self.results.len());
        while p > 0 {
            p -= 1;
            if let Lookup::Hit(value) = self.lookup(p, true)? {
                return Ok(Some((p, value)));
            }
        }
        Ok(None)
    }
}

/// Finalized results plus one provisional slot for a single indicator.
///
/// All methods take the cache's own reentrant lock, so an indicator whose
/// computation reads its previous value through the cache (EMA) can re-enter
/// from inside `compute`.
pub struct IndicatorCache<B: Candle, T> {
    state: ReentrantMutex<RefCell<CacheState<B, T>>>,
}

impl<B: Candle, T: Clone + Send + 'static> IndicatorCache<B, T> {
    pub fn new(series: Arc<CircularSeries<B>>) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(CacheState {
                series,
                results: VecDeque::new(),
                head_sequence: 0,
                unstable: None,
            })),
        }
    }

    /// Point the cache at another series. Results are kept; alignment is
    /// re-checked on the next access.
    pub fn rebind(&self, series: Arc<CircularSeries<B>>) {
        let guard = self.state.lock();
        guard.borrow_mut().series = series;
    }

    pub fn series(&self) -> Arc<CircularSeries<B>> {
        let guard = self.state.lock();
        let series = Arc::clone(&guard.borrow().series);
        series
    }

    /// Trim entries the series has evicted. `false` when the cache cannot be
    /// mapped onto the series.
    pub fn check_alignment(&self) -> bool {
        let guard = self.state.lock();
        let aligned = guard.borrow_mut().check_alignment();
        aligned
    }

    /// Cached finalized value at `position`, else `compute(position)`.
    /// The computed value is not stored.
    pub fn get_value<F>(&self, position: usize, compute: F) -> Result<T, SeriesError>
    where
        F: FnOnce(usize) -> Result<T, SeriesError>,
    {
        self.resolve(position, compute).map(|(value, _)| value)
    }

    /// Like [`IndicatorCache::get_value`], also reporting whether the value
    /// was a cache hit. Panics inside `compute` come back as
    /// [`SeriesError::CalculationPanicked`].
    pub fn resolve<F>(&self, position: usize, compute: F) -> Result<(T, bool), SeriesError>
    where
        F: FnOnce(usize) -> Result<T, SeriesError>,
    {
        let guard = self.state.lock();
        let lookup = guard.borrow_mut().lookup(position, true)?;
        match lookup {
            Lookup::Hit(value) => Ok((value, true)),
            // The RefCell is not borrowed here; `compute` may re-enter.
            Lookup::Miss => run_guarded(position, compute).map(|value| (value, false)),
        }
    }

    /// Cached finalized value at `position` without any computation.
    /// `Ok(None)` when nothing is cached there yet.
    pub fn finalized_value(&self, position: usize) -> Result<Option<T>, SeriesError> {
        let guard = self.state.lock();
        let lookup = guard.borrow_mut().lookup(position, false)?;
        Ok(match lookup {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
        })
    }

    /// Newest cached finalized value before `position`, with its position.
    /// `Ok(None)` when nothing earlier is cached. Never computes.
    pub fn latest_before(&self, position: usize) -> Result<Option<(usize, T)>, SeriesError> {
        let guard = self.state.lock();
        let found = guard.borrow_mut().latest_before(position);
        found
    }

    /// Record `value` for `position`. A finalized bar at the next free index
    /// is appended; anything else overwrites the provisional slot.
    pub fn store(&self, position: usize, value: T) -> Result<(), SeriesError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.check_alignment() {
            return Err(SeriesError::MisalignedSeries);
        }
        let (sequence, bar) = state
            .series
            .sequenced(position)
            .ok_or_else(|| SeriesError::out_of_range(position, state.series.len()))?;

        if bar.is_finalized() && position == state.results.len() {
            if state.results.is_empty() {
                state.head_sequence = sequence;
            }
            state.results.push_back(IndicatorResult {
                begin: bar.begin(),
                value,
            });
        } else {
            state.unstable = Some(value);
        }
        Ok(())
    }

    /// Finalized results, oldest first.
    pub fn results(&self) -> Vec<IndicatorResult<T>> {
        let guard = self.state.lock();
        let results = guard.borrow().results.iter().cloned().collect();
        results
    }

    /// Latest provisional result.
    pub fn unstable_value(&self) -> Option<T> {
        let guard = self.state.lock();
        let value = guard.borrow().unstable.clone();
        value
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().results.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn run_guarded<T, F>(position: usize, compute: F) -> Result<T, SeriesError>
where
    F: FnOnce(usize) -> Result<T, SeriesError>,
{
    match catch_unwind(AssertUnwindSafe(|| compute(position))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SeriesError::CalculationPanicked(format!(
                "position {position}: {message}"
            )))
        }
    }
}
