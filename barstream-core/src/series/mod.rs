//! Live bar series: a bounded (or unbounded) ordered window of bars that
//! publishes one event per mutated bar.
//!
//! Positions are 0-based from the oldest retained bar. A bounded series
//! evicts silently. Every appended bar also gets a sequence number that never
//! changes; consumers that index by position (the indicator cache, the live
//! scheduler) recover the current position from it after evictions.

mod window;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::SeriesConfig;
use crate::domain::{Bar, Candle, Interval};
use crate::error::SeriesError;
use crate::relay::{DeliveryReport, Listener, Relay};
use window::{Appended, Window};

/// How a bar entered the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesEventKind {
    /// Appended after the previous newest bar.
    AddedAtFront,
    /// First bar of an empty series.
    AddedAtEnd,
    /// Newest bar overwritten in place.
    UpdatedLatest,
    /// Reserved; evictions are silent.
    Evicted,
    /// Reserved; the series never inserts mid-window.
    InsertedMiddle,
}

impl fmt::Display for SeriesEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeriesEventKind::AddedAtFront => "added_at_front",
            SeriesEventKind::AddedAtEnd => "added_at_end",
            SeriesEventKind::UpdatedLatest => "updated_latest",
            SeriesEventKind::Evicted => "evicted",
            SeriesEventKind::InsertedMiddle => "inserted_middle",
        };
        f.write_str(s)
    }
}

/// One mutation of the series, as seen by subscribers.
///
/// `position` is where the bar sat when the event was emitted; later
/// evictions may shift it. `sequence` counts the bars appended before this
/// one and is stable; see [`CircularSeries::current_position`].
#[derive(Debug, Clone)]
pub struct SeriesEvent<B> {
    pub bar: B,
    pub position: usize,
    pub sequence: u64,
    pub kind: SeriesEventKind,
}

/// Descriptive data fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMeta {
    pub symbol: String,
    pub interval: Option<Interval>,
    pub max_size: Option<i64>,
}

/// Ordered store of bars with a single mutation entry point,
/// [`CircularSeries::add_or_update`].
///
/// Mutators are serialized by `gate` for the whole call, so events are
/// published in mutation order. The window itself is written under the
/// exclusive side of its lock, which is released before the event is
/// published. Readers take the shared side.
///
/// Readers are therefore not held back until publication: a reader may see a
/// bar whose event is still waiting on a full subscriber mailbox. Keeping the
/// write side across publication would deadlock any subscriber that reads
/// the series while it computes. Subscribers that need the exact state of an
/// event should read by its sequence ([`CircularSeries::current_position`]),
/// not assume the newest bar is theirs.
pub struct CircularSeries<B: Candle = Bar> {
    meta: SeriesMeta,
    gate: Mutex<()>,
    window: RwLock<Window<B>>,
    relay: Relay<SeriesEvent<B>>,
    publish_deadline: Option<Duration>,
    finalized_undelivered: AtomicU64,
}

impl<B: Candle> CircularSeries<B> {
    pub fn new(config: SeriesConfig) -> Self {
        let symbol = config
            .symbol
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(symbol = %symbol, max_size = ?config.max_size, "series created");
        Self {
            relay: Relay::new(symbol.clone()),
            window: RwLock::new(Window::with_max_size(config.max_size)),
            gate: Mutex::new(()),
            publish_deadline: config.publish_deadline(),
            finalized_undelivered: AtomicU64::new(0),
            meta: SeriesMeta {
                symbol,
                interval: config.interval,
                max_size: config.max_size,
            },
        }
    }

    pub fn meta(&self) -> &SeriesMeta {
        &self.meta
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    /// `Some(0)` when disabled, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.window.read().capacity()
    }

    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bar at `position`, or `None` out of range.
    pub fn bar(&self, position: usize) -> Option<B> {
        self.window.read().get(position).cloned()
    }

    pub fn first(&self) -> Option<B> {
        self.bar(0)
    }

    pub fn last(&self) -> Option<B> {
        self.window.read().last().cloned()
    }

    /// Bars at `start..end`, read under one lock. `None` if the range is not
    /// fully retained.
    pub fn range(&self, start: usize, end: usize) -> Option<Vec<B>> {
        let window = self.window.read();
        if start > end || end > window.len() {
            return None;
        }
        (start..end).map(|i| window.get(i).cloned()).collect()
    }

    /// Sequence number and bar at `position`, read under one lock.
    pub fn sequenced(&self, position: usize) -> Option<(u64, B)> {
        let window = self.window.read();
        window
            .get(position)
            .map(|bar| (window.first_sequence() + position as u64, bar.clone()))
    }

    /// Sequence number of the oldest retained bar.
    pub fn first_sequence(&self) -> u64 {
        self.window.read().first_sequence()
    }

    /// Where the bar of `event` sits now, or `None` once it has been evicted
    /// or replaced by a bar with another begin time.
    ///
    /// Works from the event's sequence, so duplicate or out-of-order begin
    /// times resolve to the exact bar that was published.
    pub fn current_position(&self, event: &SeriesEvent<B>) -> Option<usize> {
        let window = self.window.read();
        let position = usize::try_from(event.sequence.checked_sub(window.first_sequence())?).ok()?;
        match window.get(position) {
            Some(bar) if bar.begin() == event.bar.begin() => Some(position),
            _ => None,
        }
    }

    /// Independent oldest-first copy of the retained window.
    pub fn bars_snapshot(&self) -> Vec<B> {
        self.window.read().to_vec()
    }

    /// Position of the bar that begins at `begin`, by binary search.
    ///
    /// Only meaningful while begin times are strictly increasing; history
    /// mode appends bars in any order. Prefer
    /// [`CircularSeries::current_position`] for events.
    pub fn position_of(&self, begin: DateTime<Utc>) -> Option<usize> {
        let window = self.window.read();
        let (mut lo, mut hi) = (0usize, window.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = window.get(mid)?.begin();
            if candidate < begin {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        match window.get(lo) {
            Some(bar) if bar.begin() == begin => Some(lo),
            _ => None,
        }
    }

    /// Apply `bars` in order. Any absent item fails the call with
    /// [`SeriesError::NilBar`] before the series is touched.
    ///
    /// Per bar: an empty series takes it as `AddedAtEnd`; in realtime mode a
    /// bar with the newest bar's begin time, or any provisional bar, replaces
    /// the newest bar (`UpdatedLatest`); anything else is appended
    /// (`AddedAtFront`), evicting the oldest bar when a bounded series is full.
    pub fn add_or_update<I>(&self, realtime: bool, bars: I) -> Result<(), SeriesError>
    where
        I: IntoIterator,
        I::Item: Into<Option<B>>,
    {
        let bars = bars
            .into_iter()
            .map(Into::into)
            .collect::<Option<Vec<B>>>()
            .ok_or(SeriesError::NilBar)?;

        let _gate = self.gate.lock();
        if self.window.read().is_disabled() {
            return Ok(());
        }

        for bar in bars {
            let event = {
                let mut window = self.window.write();
                apply(&mut window, realtime, bar)
            };
            self.publish(event);
        }
        Ok(())
    }

    /// Listener with the default mailbox size.
    pub fn subscribe(&self) -> Listener<SeriesEvent<B>> {
        self.relay.listener(0)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Listener<SeriesEvent<B>> {
        self.relay.listener(capacity)
    }

    pub fn subscriber_count(&self) -> usize {
        self.relay.listener_count()
    }

    /// Frozen copy of the current window with its own relay. Mutations of
    /// either series are not visible to the other.
    ///
    /// Does not take the mutation gate: a producer blocked on a full mailbox
    /// must not stall the copy.
    pub fn detached_copy(&self) -> Self {
        let window = self.window.read().clone();
        Self {
            meta: self.meta.clone(),
            gate: Mutex::new(()),
            window: RwLock::new(window),
            relay: Relay::new(format!("{}:detached", self.meta.symbol)),
            publish_deadline: self.publish_deadline,
            finalized_undelivered: AtomicU64::new(0),
        }
    }

    /// Finalized-event deliveries given up at the publish deadline (or to
    /// listeners closed while the publisher waited). Always 0 without
    /// [`SeriesConfig::publish_deadline_ms`].
    pub fn finalized_undelivered(&self) -> u64 {
        self.finalized_undelivered.load(Ordering::Relaxed)
    }

    /// Close every subscription. Later mutations still apply but reach no one.
    pub fn close(&self) {
        debug!(symbol = %self.meta.symbol, "series closed");
        self.relay.close();
    }

    fn publish(&self, event: SeriesEvent<B>) -> DeliveryReport {
        let finalized = event.bar.is_finalized();
        let (position, kind) = (event.position, event.kind);
        let report = if !finalized {
            self.relay.broadcast(event)
        } else if let Some(deadline) = self.publish_deadline {
            let report = self.relay.notify_with_deadline(event, deadline);
            if report.skipped > 0 {
                self.finalized_undelivered
                    .fetch_add(report.skipped as u64, Ordering::Relaxed);
                warn!(
                    symbol = %self.meta.symbol,
                    position,
                    skipped = report.skipped,
                    deadline_ms = deadline.as_millis() as u64,
                    "finalized bar lost for slow subscribers at publish deadline"
                );
            }
            report
        } else {
            self.relay.notify(event)
        };
        trace!(
            symbol = %self.meta.symbol,
            position,
            %kind,
            finalized,
            delivered = report.delivered,
            skipped = report.skipped,
            "series event published"
        );
        report
    }
}

fn apply<B: Candle>(window: &mut Window<B>, realtime: bool, bar: B) -> SeriesEvent<B> {
    let Some(last) = window.last() else {
        window.push(bar.clone());
        return SeriesEvent {
            bar,
            position: 0,
            sequence: window.first_sequence(),
            kind: SeriesEventKind::AddedAtEnd,
        };
    };

    let kind = if realtime && (last.begin() == bar.begin() || !bar.is_finalized()) {
        window.replace_last(bar.clone());
        SeriesEventKind::UpdatedLatest
    } else {
        if window.push(bar.clone()) == Appended::Evicted {
            trace!("oldest bar evicted");
        }
        SeriesEventKind::AddedAtFront
    };
    let position = window.len() - 1;
    SeriesEvent {
        position,
        sequence: window.first_sequence() + position as u64,
        bar,
        kind,
    }
}

impl<B: Candle> fmt::Debug for CircularSeries<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularSeries")
            .field("meta", &self.meta)
            .field("len", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn minute(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + chrono::Duration::minutes(i)
    }

    fn bar(i: i64, close: i64) -> Bar {
        let c = Decimal::from(close);
        Bar::new(minute(i), c, c, c, c).with_end(minute(i + 1))
    }

    fn bounded(n: i64) -> CircularSeries<Bar> {
        CircularSeries::new(SeriesConfig::default().with_symbol("TEST").with_max_size(n))
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let series = bounded(3);
        for i in 0..10 {
            series.add_or_update(false, [bar(i, i)]).unwrap();
            assert!(series.len() <= 3);
        }
        let begins: Vec<_> = series.bars_snapshot().iter().map(|b| b.begin).collect();
        assert_eq!(begins, vec![minute(7), minute(8), minute(9)]);
    }

    #[test]
    fn realtime_same_begin_updates_in_place() {
        let series = bounded(5);
        let listener = series.subscribe();
        series.add_or_update(true, [bar(0, 10)]).unwrap();
        series.add_or_update(true, [bar(0, 11)]).unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().close, Decimal::from(11));

        let first = listener.try_recv().unwrap();
        assert_eq!(first.kind, SeriesEventKind::AddedAtEnd);
        assert_eq!(first.position, 0);
        let second = listener.try_recv().unwrap();
        assert_eq!(second.kind, SeriesEventKind::UpdatedLatest);
        assert_eq!(second.position, 0);
    }

    #[test]
    fn realtime_provisional_overwrites_latest() {
        let series = bounded(5);
        series.add_or_update(true, [bar(0, 10)]).unwrap();
        series
            .add_or_update(true, [bar(1, 12).finalized(false)])
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().begin, minute(1));
    }

    #[test]
    fn history_mode_always_appends() {
        let series = bounded(5);
        let listener = series.subscribe();
        series
            .add_or_update(false, [bar(0, 10), bar(0, 11), bar(1, 12)])
            .unwrap();
        assert_eq!(series.len(), 3);

        let kinds: Vec<_> = std::iter::from_fn(|| listener.try_recv())
            .map(|e| (e.kind, e.position))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (SeriesEventKind::AddedAtEnd, 0),
                (SeriesEventKind::AddedAtFront, 1),
                (SeriesEventKind::AddedAtFront, 2),
            ]
        );
    }

    #[test]
    fn eviction_is_silent() {
        let series = bounded(2);
        let listener = series.subscribe();
        series
            .add_or_update(false, (0..4).map(|i| bar(i, i)))
            .unwrap();
        let events: Vec<_> = std::iter::from_fn(|| listener.try_recv()).collect();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.kind != SeriesEventKind::Evicted));
        assert_eq!(events[3].position, 1);
    }

    #[test]
    fn nil_bar_leaves_series_untouched() {
        let series = bounded(3);
        let listener = series.subscribe();
        let err = series
            .add_or_update(false, vec![Some(bar(0, 1)), None, Some(bar(1, 2))])
            .unwrap_err();
        assert_eq!(err, SeriesError::NilBar);
        assert!(series.is_empty());
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn disabled_series_accepts_and_discards() {
        let series = bounded(0);
        let listener = series.subscribe();
        series.add_or_update(false, [bar(0, 1), bar(1, 2)]).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.capacity(), Some(0));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn unbounded_when_no_max_size() {
        let series: CircularSeries<Bar> = CircularSeries::new(SeriesConfig::default());
        series
            .add_or_update(false, (0..50).map(|i| bar(i, i)))
            .unwrap();
        assert_eq!(series.len(), 50);
        assert_eq!(series.capacity(), None);
        // Symbol defaults to a generated UUID.
        assert!(Uuid::parse_str(series.symbol()).is_ok());
    }

    #[test]
    fn snapshot_is_independent() {
        let series = bounded(3);
        series.add_or_update(false, [bar(0, 1), bar(1, 2)]).unwrap();
        let mut snapshot = series.bars_snapshot();
        snapshot[0].close = Decimal::from(99);
        snapshot.push(bar(5, 5));
        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().close, Decimal::from(1));
    }

    #[test]
    fn position_of_finds_begin_after_wrap() {
        let series = bounded(4);
        series
            .add_or_update(false, (0..7).map(|i| bar(i, i)))
            .unwrap();
        assert_eq!(series.position_of(minute(3)), Some(0));
        assert_eq!(series.position_of(minute(6)), Some(3));
        assert_eq!(series.position_of(minute(2)), None);
        assert_eq!(series.position_of(minute(9)), None);
    }

    #[test]
    fn range_reads_consistent_slice() {
        let series = bounded(3);
        series
            .add_or_update(false, (0..5).map(|i| bar(i, i)))
            .unwrap();
        let slice = series.range(1, 3).unwrap();
        assert_eq!(slice[0].begin, minute(3));
        assert_eq!(slice[1].begin, minute(4));
        assert!(series.range(2, 4).is_none());
    }

    #[test]
    fn detached_copy_is_frozen() {
        let series = bounded(3);
        series.add_or_update(false, [bar(0, 1)]).unwrap();
        let copy = series.detached_copy();
        let copy_listener = copy.subscribe();

        series.add_or_update(false, [bar(1, 2)]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(copy.len(), 1);
        assert!(copy_listener.try_recv().is_none());
        assert_eq!(copy.symbol(), "TEST");
    }

    #[test]
    fn provisional_events_are_dropped_when_mailbox_full() {
        let series = bounded(5);
        let listener = series.subscribe_with_capacity(1);
        series.add_or_update(true, [bar(0, 1)]).unwrap();
        for close in 2..6 {
            series
                .add_or_update(true, [bar(1, close).finalized(false)])
                .unwrap();
        }
        // The finalized first bar filled the mailbox; provisional ones were dropped.
        assert_eq!(listener.pending(), 1);
        assert_eq!(listener.try_recv().unwrap().kind, SeriesEventKind::AddedAtEnd);
    }

    #[test]
    fn sequence_resolves_position_after_eviction() {
        let series = bounded(2);
        let listener = series.subscribe();
        series
            .add_or_update(false, (0..4).map(|i| bar(i, i)))
            .unwrap();
        let events: Vec<_> = std::iter::from_fn(|| listener.try_recv()).collect();
        let sequences: Vec<_> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(series.first_sequence(), 2);

        let now: Vec<_> = events.iter().map(|e| series.current_position(e)).collect();
        assert_eq!(now, vec![None, None, Some(0), Some(1)]);
        assert_eq!(series.sequenced(1).map(|(seq, b)| (seq, b.begin)), Some((3, minute(3))));
    }

    #[test]
    fn duplicate_and_out_of_order_begins_resolve_exactly() {
        let series: CircularSeries<Bar> = CircularSeries::new(SeriesConfig::default());
        let listener = series.subscribe();
        // t0, t1, t1 again, then t5 and a late t2.
        series
            .add_or_update(false, [bar(0, 0), bar(1, 1), bar(1, 2), bar(5, 3), bar(2, 4)])
            .unwrap();
        let positions: Vec<_> = std::iter::from_fn(|| listener.try_recv())
            .map(|e| series.current_position(&e))
            .collect();
        assert_eq!(positions, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
        // Begin search cannot tell the duplicates apart.
        assert_ne!(series.position_of(minute(1)), Some(2));
    }

    #[test]
    fn replaced_bar_no_longer_resolves() {
        let series = bounded(3);
        let listener = series.subscribe();
        series.add_or_update(true, [bar(0, 1)]).unwrap();
        series
            .add_or_update(true, [bar(1, 2).finalized(false)])
            .unwrap();
        let first = listener.try_recv().unwrap();
        let second = listener.try_recv().unwrap();
        assert_eq!(series.current_position(&first), None);
        assert_eq!(series.current_position(&second), Some(0));
    }

    #[test]
    fn readers_are_not_held_back_by_a_blocked_publish() {
        let series = Arc::new(bounded(5));
        let listener = series.subscribe_with_capacity(1);
        series.add_or_update(false, [bar(0, 1)]).unwrap();

        let producer = {
            let series = Arc::clone(&series);
            std::thread::spawn(move || series.add_or_update(false, [bar(1, 2)]).unwrap())
        };
        // The second bar is readable while its event waits on the full mailbox.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while series.len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(series.len(), 2);
        assert_eq!(listener.pending(), 1);

        assert_eq!(listener.recv().unwrap().position, 0);
        producer.join().unwrap();
        assert_eq!(listener.recv().unwrap().position, 1);
    }

    #[test]
    fn publish_deadline_gives_up_finalized_delivery() {
        let series: CircularSeries<Bar> = CircularSeries::new(
            SeriesConfig::default()
                .with_max_size(5)
                .with_publish_deadline(Duration::from_millis(10)),
        );
        let listener = series.subscribe_with_capacity(1);
        series
            .add_or_update(false, [bar(0, 1), bar(1, 2), bar(2, 3)])
            .unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(listener.pending(), 1);
        assert_eq!(series.finalized_undelivered(), 2);

        let guaranteed = bounded(5);
        assert_eq!(guaranteed.finalized_undelivered(), 0);
    }

    #[test]
    fn close_ends_subscriptions() {
        let series = bounded(3);
        let listener = series.subscribe();
        series.close();
        assert!(listener.is_closed());
        assert_eq!(series.subscriber_count(), 0);
        series.add_or_update(false, [bar(0, 1)]).unwrap();
        assert_eq!(series.len(), 1);
    }
}
