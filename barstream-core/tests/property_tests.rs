//! Property tests for series, cache and relay invariants.
//!
//! Uses proptest to verify:
//! 1. Capacity: a bounded series never holds more than its capacity and
//!    keeps the newest bars in begin order
//! 2. Realtime updates: same-begin bars overwrite, new begins append
//! 3. Cache alignment: after any number of evictions, finalized results
//!    line up with the series by begin time and match a direct computation
//! 4. Broadcast: a mailbox never holds more than its capacity

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use barstream_core::config::SeriesConfig;
use barstream_core::domain::Bar;
use barstream_core::indicators::{AttributeSource, Cached, Indicator, PriceField, Sma};
use barstream_core::relay::Relay;
use barstream_core::series::CircularSeries;

// ── Helpers ──────────────────────────────────────────────────────────

fn t(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 11, 20, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

fn bar(minute: i64, close: i64) -> Bar {
    let c = Decimal::from(close);
    Bar::new(t(minute), c, c, c, c).with_end(t(minute + 1))
}

fn bounded(capacity: i64) -> Arc<CircularSeries<Bar>> {
    Arc::new(CircularSeries::new(
        SeriesConfig::default()
            .with_symbol("PROP")
            .with_max_size(capacity),
    ))
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..1_000, 0..60)
}

/// `true` = tick for the newest bar, `false` = open a new bar.
fn arb_ticks() -> impl Strategy<Value = Vec<(bool, i64)>> {
    prop::collection::vec((any::<bool>(), 1i64..1_000), 1..40)
}

// ── 1. Capacity ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn bounded_series_keeps_newest_bars(capacity in 1i64..12, closes in arb_closes()) {
        let series = bounded(capacity);
        for (i, close) in closes.iter().enumerate() {
            series.add_or_update(false, [bar(i as i64, *close)]).unwrap();
            prop_assert!(series.len() as i64 <= capacity);
        }

        let expected = closes.len().min(capacity as usize);
        prop_assert_eq!(series.len(), expected);

        let snapshot = series.bars_snapshot();
        let first = closes.len() - expected;
        for (offset, b) in snapshot.iter().enumerate() {
            prop_assert_eq!(b.begin, t((first + offset) as i64));
            prop_assert_eq!(b.close, Decimal::from(closes[first + offset]));
        }
        prop_assert!(snapshot.windows(2).all(|w| w[0].begin < w[1].begin));
    }
}

// ── 2. Realtime updates ──────────────────────────────────────────────

proptest! {
    #[test]
    fn realtime_ticks_overwrite_or_append(ticks in arb_ticks()) {
        let series = bounded(1_000);
        let mut minute = 0i64;
        let mut expected_len = 0usize;
        for (same_bar, close) in &ticks {
            if !*same_bar || expected_len == 0 {
                minute += 1;
                expected_len += 1;
            }
            series.add_or_update(true, [bar(minute, *close)]).unwrap();
        }
        prop_assert_eq!(series.len(), expected_len);

        let last = series.last().unwrap();
        prop_assert_eq!(last.begin, t(minute));
        prop_assert_eq!(last.close, Decimal::from(ticks.last().unwrap().1));
    }
}

// ── 3. Cache alignment ───────────────────────────────────────────────

proptest! {
    #[test]
    fn cached_results_align_after_evictions(
        capacity in 3i64..10,
        period in 1usize..5,
        closes in prop::collection::vec(1i64..1_000, 1..50),
    ) {
        let series = bounded(capacity);
        let sma: Cached<Sma> = Cached::new(Sma::new(period));
        sma.set_source(AttributeSource::new(Arc::clone(&series), PriceField::Close));

        for (i, close) in closes.iter().enumerate() {
            series.add_or_update(false, [bar(i as i64, *close)]).unwrap();
            sma.calculate(series.len() - 1).unwrap();
        }

        let results = sma.results();
        let result_begins: Vec<_> = results.iter().map(|r| r.begin).collect();
        let series_begins: Vec<_> = series.bars_snapshot().iter().map(|b| b.begin).collect();
        prop_assert_eq!(result_begins, series_begins);

        // Each value was computed while its whole window was still retained
        // or the window was clipped at the start of the data.
        let first = closes.len() - results.len();
        for (offset, result) in results.iter().enumerate() {
            let i = first + offset;
            let window = &closes[(i + 1).saturating_sub(period.min(capacity as usize))..=i];
            let sum: i64 = window.iter().sum();
            let expected = Decimal::from(sum) / Decimal::from(window.len());
            prop_assert_eq!(result.value, expected);
        }
    }
}

// ── 4. Broadcast ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn broadcast_never_overfills_mailbox(capacity in 1usize..16, events in 0usize..64) {
        let relay: Relay<usize> = Relay::new("prop");
        let listener = relay.listener(capacity);

        let mut delivered = 0;
        for event in 0..events {
            let report = relay.broadcast(event);
            prop_assert_eq!(report.delivered + report.skipped, 1);
            delivered += report.delivered;
        }
        prop_assert_eq!(delivered, events.min(capacity));
        prop_assert_eq!(listener.pending(), events.min(capacity));
        // The first events win; later ones were dropped.
        let received: Vec<_> = std::iter::from_fn(|| listener.try_recv()).collect();
        prop_assert_eq!(received, (0..events.min(capacity)).collect::<Vec<_>>());
    }
}
