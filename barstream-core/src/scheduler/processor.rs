//! Per-indicator event handling for the live phase.
//!
//! Finalized bars are always recomputed, one at a time. Provisional bars are
//! single-flight: if a provisional recomputation is already running, the new
//! event is dropped since a later one supersedes it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::domain::Candle;
use crate::error::SeriesError;
use crate::indicators::Indicator;
use crate::series::SeriesEvent;

/// Live counters for one processor.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    finalized: AtomicU64,
    provisional: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub finalized: u64,
    pub provisional: u64,
    pub provisional_dropped: u64,
    /// Events whose bar had already left the series.
    pub skipped: u64,
}

impl ProcessorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            finalized: self.finalized.load(Ordering::Relaxed),
            provisional: self.provisional.load(Ordering::Relaxed),
            provisional_dropped: self.dropped.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Clears the busy flag when the provisional computation ends, even on
/// error or panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EventProcessor<I: Indicator> {
    indicator: Arc<I>,
    serial: Mutex<()>,
    busy: AtomicBool,
    stats: Arc<ProcessorStats>,
}

impl<I: Indicator> EventProcessor<I> {
    pub fn new(indicator: Arc<I>) -> Self {
        Self {
            indicator,
            serial: Mutex::new(()),
            busy: AtomicBool::new(false),
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    pub fn indicator(&self) -> &Arc<I> {
        &self.indicator
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Recompute for one series event.
    ///
    /// The event's position is re-resolved from its sequence number against
    /// the current series, since evictions after publication shift positions.
    /// Events for bars no longer retained are skipped.
    pub fn process(&self, event: &SeriesEvent<I::Bar>) -> Result<(), SeriesError> {
        let source = self
            .indicator
            .source()
            .ok_or_else(|| SeriesError::SourceNotSet(self.indicator.name().to_string()))?;
        let Some(position) = source.series().current_position(event) else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(
                indicator = self.indicator.name(),
                position = event.position,
                "event bar no longer in series, skipped"
            );
            return Ok(());
        };

        if event.bar.is_finalized() {
            self.process_finalized(position)
        } else {
            self.process_provisional(position).map(|_| ())
        }
    }

    /// Always computes; waits for any computation in progress.
    pub fn process_finalized(&self, position: usize) -> Result<(), SeriesError> {
        let _serial = self.serial.lock();
        self.indicator.calculate(position)?;
        self.stats.finalized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Computes unless a provisional computation is already in flight.
    /// Returns whether it ran.
    pub fn process_provisional(&self, position: usize) -> Result<bool, SeriesError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(
                indicator = self.indicator.name(),
                position,
                "provisional recomputation in flight, event dropped"
            );
            return Ok(false);
        }
        let _busy = BusyGuard(&self.busy);
        let _serial = self.serial.lock();
        self.indicator.calculate(position)?;
        self.stats.provisional.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}
