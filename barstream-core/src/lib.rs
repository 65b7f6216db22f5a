//! barstream core: live bar series, event relay, indicator cache and
//! incremental scheduler.
//!
//! This crate keeps technical indicators up to date over a live, bounded
//! window of market bars:
//! - A bounded series that silently evicts its oldest bar and publishes one
//!   event per mutation
//! - A publish/subscribe relay with guaranteed and best-effort delivery
//! - A per-indicator result cache kept aligned with the series across
//!   evictions
//! - A scheduler that backfills history once, then recomputes per event:
//!   every finalized bar, and provisional bars single-flight
//! - Built-in SMA/EMA, CSV loading, Binance and OKX kline conversion

pub mod adapters;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod relay;
pub mod scheduler;
pub mod series;

pub use error::SeriesError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared between producer threads and
    /// live threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Interval>();
        require_sync::<domain::Interval>();
        require_send::<adapters::KlineTicker>();
        require_sync::<adapters::KlineTicker>();

        // Series and relay
        require_send::<series::CircularSeries<domain::Bar>>();
        require_sync::<series::CircularSeries<domain::Bar>>();
        require_send::<series::SeriesEvent<domain::Bar>>();
        require_send::<relay::Relay<series::SeriesEvent<domain::Bar>>>();
        require_sync::<relay::Relay<series::SeriesEvent<domain::Bar>>>();
        require_send::<relay::Listener<series::SeriesEvent<domain::Bar>>>();
        require_send::<relay::ListenerCloser<series::SeriesEvent<domain::Bar>>>();
        require_sync::<relay::ListenerCloser<series::SeriesEvent<domain::Bar>>>();

        // Indicators
        require_send::<indicators::IndicatorCache<domain::Bar, rust_decimal::Decimal>>();
        require_sync::<indicators::IndicatorCache<domain::Bar, rust_decimal::Decimal>>();
        require_send::<indicators::AttributeSource<domain::Bar, rust_decimal::Decimal>>();
        require_sync::<indicators::AttributeSource<domain::Bar, rust_decimal::Decimal>>();
        require_send::<indicators::TechIndicator<domain::Bar>>();
        require_sync::<indicators::TechIndicator<domain::Bar>>();

        // Scheduler
        require_send::<scheduler::EventProcessor<indicators::TechIndicator<domain::Bar>>>();
        require_sync::<scheduler::EventProcessor<indicators::TechIndicator<domain::Bar>>>();
        require_send::<scheduler::LiveSubscription<domain::Bar>>();
        require_send::<scheduler::ProcessorStats>();
        require_sync::<scheduler::ProcessorStats>();

        // Config
        require_send::<config::AppConfig>();
        require_sync::<config::AppConfig>();
    }

    /// Architecture contract: the scheduler depends only on the `Indicator`
    /// trait, never on a concrete formula.
    #[test]
    fn executor_accepts_any_indicator() {
        fn _starts<I: indicators::Indicator + 'static>(
            executor: &scheduler::Executor,
            indicator: std::sync::Arc<I>,
        ) -> Result<scheduler::LiveSubscription<I::Bar>, SeriesError> {
            executor.start(indicator, None)
        }
    }
}
