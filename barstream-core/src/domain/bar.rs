//! Bar: the fundamental market data unit.

use std::cmp::Ordering;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Read-only contract every bar stored in a series must satisfy.
///
/// Positions in a series are ordered by `begin`; two bars with the same
/// `begin` describe the same period.
pub trait Candle: Clone + Debug + Send + Sync + 'static {
    fn begin(&self) -> DateTime<Utc>;
    fn end(&self) -> DateTime<Utc>;
    fn open(&self) -> Decimal;
    fn high(&self) -> Decimal;
    fn low(&self) -> Decimal;
    fn close(&self) -> Decimal;
    fn volume(&self) -> Decimal;

    /// True once the period has closed and the values are final.
    fn is_finalized(&self) -> bool;
}

/// OHLCV bar for one period of one symbol.
///
/// A provisional bar (`finalized == false`) is an in-progress snapshot that
/// later updates replace. The trailing optional fields are filled only by
/// feeds that report them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub finalized: bool,
    /// Turnover in the quote asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// Taker buy volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_volume: Option<Decimal>,
    /// Taker buy turnover in the quote asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trades_count: Option<u64>,
}

impl Bar {
    /// Finalized bar with `end == begin` and zero volume.
    pub fn new(
        begin: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Self {
        Self {
            begin,
            end: begin,
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
            finalized: true,
            amount: None,
            buy_volume: None,
            buy_amount: None,
            trades_count: None,
        }
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = end;
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_buy_volume(mut self, buy_volume: Decimal) -> Self {
        self.buy_volume = Some(buy_volume);
        self
    }

    pub fn with_buy_amount(mut self, buy_amount: Decimal) -> Self {
        self.buy_amount = Some(buy_amount);
        self
    }

    pub fn with_trades_count(mut self, trades_count: u64) -> Self {
        self.trades_count = Some(trades_count);
        self
    }

    pub fn finalized(mut self, finalized: bool) -> Self {
        self.finalized = finalized;
        self
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.end >= self.begin
    }
}

impl Candle for Bar {
    fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    fn end(&self) -> DateTime<Utc> {
        self.end
    }

    fn open(&self) -> Decimal {
        self.open
    }

    fn high(&self) -> Decimal {
        self.high
    }

    fn low(&self) -> Decimal {
        self.low
    }

    fn close(&self) -> Decimal {
        self.close
    }

    fn volume(&self) -> Decimal {
        self.volume
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

// Identity is the period, not the values.
impl PartialEq for Bar {
    fn eq(&self, other: &Self) -> bool {
        self.begin == other.begin
    }
}

impl Eq for Bar {}

impl PartialOrd for Bar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.begin.cmp(&other.begin)
    }
}
