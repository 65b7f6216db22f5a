//! Starts an indicator: optional backfill, then a live thread that follows
//! the series' events.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::processor::{EventProcessor, ProcessorStats, StatsSnapshot};
use crate::config::SchedulerConfig;
use crate::error::SeriesError;
use crate::indicators::{AttributeSource, Indicator};
use crate::relay::{Listener, ListenerCloser};
use crate::series::SeriesEvent;

/// How a live thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    /// The listener was closed (explicitly or by series teardown).
    Closed,
    /// A calculation failed; the subscription was closed.
    Failed(SeriesError),
}

/// Handle on a running indicator. Dropping it closes the subscription.
pub struct LiveSubscription<B> {
    name: String,
    closer: ListenerCloser<SeriesEvent<B>>,
    handle: Option<JoinHandle<LiveOutcome>>,
    stats: Arc<ProcessorStats>,
}

impl<B> LiveSubscription<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop following the series. Events already buffered are still processed.
    pub fn close(&self) {
        self.closer.close();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters; still readable after [`LiveSubscription::join`].
    pub fn counters(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the live thread to end. Does not close the subscription.
    pub fn join(mut self) -> LiveOutcome {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                LiveOutcome::Failed(SeriesError::CalculationPanicked(format!(
                    "live thread for {} panicked",
                    self.name
                )))
            }),
            None => LiveOutcome::Closed,
        }
    }
}

impl<B> Drop for LiveSubscription<B> {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Starts indicators against their series.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: SchedulerConfig,
}

impl Executor {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start with the configured backfill start.
    pub fn start_configured<I>(&self, indicator: Arc<I>) -> Result<LiveSubscription<I::Bar>, SeriesError>
    where
        I: Indicator + 'static,
    {
        self.start(indicator, self.config.backfill_from)
    }

    /// Subscribe to the indicator's series, backfill `backfill_from..len` on an
    /// isolated copy, then hand the subscription to a named live thread.
    ///
    /// The subscription is taken before the backfill so bars published
    /// meanwhile are processed afterwards. A backfill error closes the
    /// subscription and is returned; the live source is restored either way.
    pub fn start<I>(
        &self,
        indicator: Arc<I>,
        backfill_from: Option<usize>,
    ) -> Result<LiveSubscription<I::Bar>, SeriesError>
    where
        I: Indicator + 'static,
    {
        let live = indicator
            .source()
            .ok_or_else(|| SeriesError::SourceNotSet(indicator.name().to_string()))?;
        let listener = live
            .series()
            .subscribe_with_capacity(self.config.mailbox_capacity);

        if let Some(from) = backfill_from {
            if let Err(err) = backfill(indicator.as_ref(), &live, from) {
                listener.close();
                return Err(err);
            }
        }

        let name = indicator.name().to_string();
        let processor = EventProcessor::new(indicator);
        let stats = processor.stats();
        let closer = listener.closer();
        let handle = thread::Builder::new()
            .name(format!("live-{name}"))
            .spawn(move || run_live(processor, listener))
            .map_err(|e| SeriesError::Spawn(e.to_string()))?;
        debug!(indicator = %name, "live phase started");

        Ok(LiveSubscription {
            name,
            closer,
            handle: Some(handle),
            stats,
        })
    }
}

/// Compute `from..len` sequentially over an isolated copy of the series.
/// Stops at the first error. The live source is always restored.
fn backfill<I: Indicator>(
    indicator: &I,
    live: &AttributeSource<I::Bar, I::Output>,
    from: usize,
) -> Result<usize, SeriesError> {
    let isolated = live.isolated();
    let size = isolated.series().len();
    debug!(indicator = indicator.name(), from, size, "backfill started");

    indicator.set_source(isolated);
    let outcome = (from..size).try_for_each(|position| indicator.calculate(position).map(|_| ()));
    indicator.set_source(live.clone());
    outcome?;

    let computed = size.saturating_sub(from);
    info!(indicator = indicator.name(), computed, "backfill finished");
    Ok(computed)
}

fn run_live<I: Indicator>(
    processor: EventProcessor<I>,
    listener: Listener<SeriesEvent<I::Bar>>,
) -> LiveOutcome {
    for event in listener.iter() {
        if let Err(err) = processor.process(&event) {
            error!(
                position = event.position,
                kind = %event.kind,
                bar = ?event.bar,
                indicator = processor.indicator().name(),
                error = %err,
                "indicator failed to process event, closing subscription"
            );
            listener.close();
            return LiveOutcome::Failed(err);
        }
    }
    debug!(indicator = processor.indicator().name(), "live phase ended");
    LiveOutcome::Closed
}
